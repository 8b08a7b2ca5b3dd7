use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

/// Archive writes come from the controller while the replay CLI may be
/// reading the same file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type ArchiveJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum ArchiveCommand {
    Run(ArchiveJob),
    Close,
}

struct ArchiveWorker {
    commands: mpsc::Sender<ArchiveCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ArchiveWorker {
    /// Ask the thread to finish its queue and wait for it. Later calls are
    /// no-ops.
    fn close(&self) -> Result<()> {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        if self.commands.send(ArchiveCommand::Close).is_err() {
            warn!("archive thread exited before close was requested");
        }
        handle
            .join()
            .map_err(|panic| anyhow!("archive thread panicked: {panic:?}"))
    }
}

impl Drop for ArchiveWorker {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("{err:#}");
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open session archive {}", path.display()))?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("archive stays in rollback-journal mode: {err}");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous mode")?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;

    run_migrations(&mut conn).context("failed to migrate session archive")?;
    Ok(conn)
}

fn serve(mut conn: Connection, commands: mpsc::Receiver<ArchiveCommand>) {
    let mut jobs = 0u64;
    while let Ok(command) = commands.recv() {
        match command {
            ArchiveCommand::Run(job) => {
                job(&mut conn);
                jobs += 1;
            }
            ArchiveCommand::Close => break,
        }
    }
    info!("archive thread closing after {jobs} jobs");
}

/// SQLite session archive. One connection lives on a dedicated thread;
/// async callers hand it closures and await the reply.
#[derive(Clone)]
pub struct Database {
    worker: Arc<ArchiveWorker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the archive at `path` and bring its schema
    /// up to date.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create archive directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_path = path.clone();

        let thread = thread::Builder::new()
            .name("xptrack-archive".into())
            .spawn(move || match open_connection(&thread_path) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        serve(conn, command_rx);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn archive thread")?;

        ready_rx
            .recv()
            .context("archive thread exited before it was ready")??;
        info!("session archive opened at {}", path.display());

        Ok(Self {
            worker: Arc::new(ArchiveWorker {
                commands: command_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Drain queued work and stop the archive thread. Every clone shares the
    /// thread, so calls made afterwards through any clone fail.
    pub fn close(&self) -> Result<()> {
        self.worker.close()
    }

    pub async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = ArchiveCommand::Run(Box::new(move |conn| {
            // The caller may have given up waiting.
            let _ = reply_tx.send(job(conn));
        }));

        self.worker
            .commands
            .send(command)
            .map_err(|_| anyhow!("session archive {} is closed", self.path.display()))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("session archive {} is closed", self.path.display()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn archive_schema_is_ready_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("nested").join("archive.db")).unwrap();

        let (version, tables) = db
            .execute(|conn| {
                let version: i32 =
                    conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
                let tables: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master
                     WHERE type = 'table' AND name IN ('sessions', 'reconciliations')",
                    [],
                    |row| row.get(0),
                )?;
                Ok((version, tables))
            })
            .await
            .unwrap();

        assert_eq!(version, 1);
        assert_eq!(tables, 2);
        assert!(db.path().ends_with("nested/archive.db"));
    }

    #[tokio::test]
    async fn closed_archive_refuses_work_from_every_clone() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("archive.db")).unwrap();
        let clone = db.clone();

        db.execute(|conn| Ok(conn.execute_batch("SELECT 1")?))
            .await
            .unwrap();
        db.close().unwrap();
        db.close().unwrap();

        let err = clone.execute(|_| Ok(())).await.unwrap_err();
        assert!(err.to_string().contains("is closed"));
    }
}
