use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

/// Schema steps in order; entry `i` moves the archive to version `i + 1`.
const MIGRATIONS: &[&str] = &[include_str!("schemas/schema_v1.sql")];

fn schema_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read archive schema version")?;
    usize::try_from(version).with_context(|| format!("negative schema version {version}"))
}

/// Apply every pending step in one transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let from = schema_version(conn)?;
    let target = MIGRATIONS.len();
    if from > target {
        bail!("archive schema v{from} is newer than this build understands (v{target})");
    }
    if from == target {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (step, sql) in MIGRATIONS.iter().enumerate().skip(from) {
        tx.execute_batch(sql)
            .with_context(|| format!("archive migration to v{} failed", step + 1))?;
    }
    tx.pragma_update(None, "user_version", target as i64)
        .context("failed to record archive schema version")?;
    tx.commit().context("failed to commit archive migrations")?;

    info!("session archive migrated v{from} -> v{target}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrating_twice_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len());
    }

    #[test]
    fn newer_database_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
        let err = run_migrations(&mut conn).unwrap_err();
        assert!(err.to_string().contains("v99"));
    }
}
