use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{
        encode_stop_reason, parse_datetime, parse_mode, parse_stop_reason, to_i64, to_u32, to_u64,
    },
};
use crate::models::SessionRecord;

const SESSION_COLUMNS: &str = "id, mode, started_at, ended_at, duration_ms, kills, xp_sum, \
     xp_per_hour, xp_per_kill, level_ups, diff_kills, corrections, notes, stop_reason";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let mode: String = row.get("mode")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: String = row.get("ended_at")?;
    let stop_reason: String = row.get("stop_reason")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        mode: parse_mode(&mode)?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_datetime(&ended_at, "ended_at")?,
        duration_ms: to_u64(row.get("duration_ms")?, "duration_ms")?,
        kills: to_u64(row.get("kills")?, "kills")?,
        xp_sum: row.get("xp_sum")?,
        xp_per_hour: row.get("xp_per_hour")?,
        xp_per_kill: row.get("xp_per_kill")?,
        level_ups: to_u32(row.get("level_ups")?, "level_ups")?,
        diff_kills: to_u64(row.get("diff_kills")?, "diff_kills")?,
        corrections: to_u32(row.get("corrections")?, "corrections")?,
        notes: row.get("notes")?,
        stop_reason: parse_stop_reason(&stop_reason)?,
    })
}

impl Database {
    /// A session paused and resumed is archived again under the same id; the
    /// later record wins.
    pub async fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (id, mode, started_at, ended_at, duration_ms, kills, xp_sum,
                     xp_per_hour, xp_per_kill, level_ups, diff_kills, corrections, notes, stop_reason,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                     ended_at = excluded.ended_at,
                     duration_ms = excluded.duration_ms,
                     kills = excluded.kills,
                     xp_sum = excluded.xp_sum,
                     xp_per_hour = excluded.xp_per_hour,
                     xp_per_kill = excluded.xp_per_kill,
                     level_ups = excluded.level_ups,
                     diff_kills = excluded.diff_kills,
                     corrections = excluded.corrections,
                     notes = excluded.notes,
                     stop_reason = excluded.stop_reason,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.mode.as_str(),
                    record.started_at.to_rfc3339(),
                    record.ended_at.to_rfc3339(),
                    to_i64(record.duration_ms)?,
                    to_i64(record.kills)?,
                    record.xp_sum,
                    record.xp_per_hour,
                    record.xp_per_kill,
                    record.level_ups,
                    to_i64(record.diff_kills)?,
                    record.corrections,
                    record.notes,
                    encode_stop_reason(&record.stop_reason)?,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }

    /// Newest first.
    pub async fn list_sessions_paginated(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionRecord>> {
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 ORDER BY started_at DESC
                 LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare(&sql)?;

            let mut rows = stmt.query(params![limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn update_session_notes(&self, session_id: &str, notes: String) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions
                 SET notes = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![notes, Utc::now().to_rfc3339(), session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session not found"));
            }

            Ok(())
        })
        .await
    }
}
