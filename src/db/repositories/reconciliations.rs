use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{join_verdict, parse_datetime, split_verdict, to_i64, to_u64},
};
use crate::models::ReconciliationRecord;

fn row_to_reconciliation(row: &Row) -> Result<ReconciliationRecord> {
    let at: String = row.get("at")?;
    let verdict: String = row.get("verdict")?;

    Ok(ReconciliationRecord {
        session_id: row.get("session_id")?,
        at: parse_datetime(&at, "at")?,
        observed_xp: row.get("observed_xp")?,
        expected_xp: row.get("expected_xp")?,
        kills_before: to_u64(row.get("kills_before")?, "kills_before")?,
        kills_after: to_u64(row.get("kills_after")?, "kills_after")?,
        verdict: join_verdict(&verdict, row.get("kill_delta")?, row.get("xp_adjustment")?)?,
    })
}

impl Database {
    pub async fn insert_reconciliation(&self, record: &ReconciliationRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let (verdict, kill_delta, xp_adjustment) = split_verdict(&record.verdict);
            conn.execute(
                "INSERT INTO reconciliations (session_id, at, observed_xp, expected_xp,
                     kills_before, kills_after, verdict, kill_delta, xp_adjustment)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.session_id,
                    record.at.to_rfc3339(),
                    record.observed_xp,
                    record.expected_xp,
                    to_i64(record.kills_before)?,
                    to_i64(record.kills_after)?,
                    verdict,
                    kill_delta,
                    xp_adjustment,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Oldest first.
    pub async fn list_reconciliations(&self, session_id: &str) -> Result<Vec<ReconciliationRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, at, observed_xp, expected_xp, kills_before, kills_after,
                        verdict, kill_delta, xp_adjustment
                 FROM reconciliations
                 WHERE session_id = ?1
                 ORDER BY at ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_reconciliation(row)?);
            }

            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SessionArchive;
    use crate::models::ReconcileVerdict;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn reconciliations_listed_per_session_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("archive.db")).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();

        let corrected = ReconciliationRecord {
            session_id: "s1".into(),
            at: t0 + Duration::minutes(5),
            observed_xp: 20.6,
            expected_xp: 20.25,
            kills_before: 15,
            kills_after: 22,
            verdict: ReconcileVerdict::Corrected {
                kill_delta: 7,
                xp_adjustment: 0.35,
            },
        };
        let calm = ReconciliationRecord {
            session_id: "s1".into(),
            at: t0 + Duration::minutes(10),
            observed_xp: 21.0,
            expected_xp: 21.0,
            kills_before: 30,
            kills_after: 30,
            verdict: ReconcileVerdict::WithinTolerance,
        };
        let other = ReconciliationRecord {
            session_id: "s2".into(),
            verdict: ReconcileVerdict::LevelUp,
            ..calm.clone()
        };

        db.record_reconciliation(&calm).await.unwrap();
        db.record_reconciliation(&corrected).await.unwrap();
        db.record_reconciliation(&other).await.unwrap();

        let listed = db.list_reconciliations("s1").await.unwrap();
        assert_eq!(listed, vec![corrected, calm]);
        assert_eq!(listed[0].correction(), Some(7));
        assert_eq!(
            db.list_reconciliations("s2").await.unwrap()[0].verdict,
            ReconcileVerdict::LevelUp
        );
    }
}
