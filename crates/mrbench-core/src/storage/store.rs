use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::rows::{
    CapabilitySnapshot, JobOutcome, JobRow, JobStatus, MetricRow, NewJob, NewMetric, RunRow,
    RunStatus,
};
use super::now_rfc3339;
use crate::discovery::AuthStatus;
use crate::error::{MrbenchError, Result};
use crate::routing::ProviderHistory;

const RUN_COLUMNS: &str = "id, created_at, suite_path, config_snapshot, status, completed_at";
const JOB_COLUMNS: &str = "id, run_id, provider, model, prompt_hash, prompt_preview, \
     prompt_stored, status, created_at, started_at, completed_at, error_message, exit_code";

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::wrap(conn)
    }

    pub fn memory() -> Result<Self> {
        Self::wrap(Connection::open_in_memory()?)
    }

    fn wrap(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(super::schema::DDL)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself usable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- runs ---

    pub fn create_run(
        &self,
        suite_path: Option<&str>,
        config_snapshot: Option<&str>,
    ) -> Result<RunRow> {
        let row = RunRow {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now_rfc3339(),
            suite_path: suite_path.map(str::to_string),
            config_snapshot: config_snapshot.map(str::to_string),
            status: RunStatus::Running,
            completed_at: None,
        };
        let conn = self.lock();
        conn.execute(
            "INSERT INTO runs(id, created_at, suite_path, config_snapshot, status) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id,
                row.created_at,
                row.suite_path,
                row.config_snapshot,
                row.status
            ],
        )?;
        tracing::debug!(run_id = %row.id, "run created");
        Ok(row)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<RunRow>> {
        let conn = self.lock();
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// Most recent first.
    pub fn list_runs(&self, limit: u32) -> Result<Vec<RunRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Moves a running run to a terminal status. A run finishes exactly once.
    pub fn finish_run(&self, id: &str, status: RunStatus) -> Result<()> {
        let conn = self.lock();
        let current: Option<RunStatus> = conn
            .query_row("SELECT status FROM runs WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        let current = current
            .ok_or_else(|| MrbenchError::StorageIntegrity(format!("run '{id}' does not exist")))?;
        if current != RunStatus::Running || !status.is_terminal() {
            return Err(MrbenchError::InvalidTransition {
                id: id.to_string(),
                from: current.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        conn.execute(
            "UPDATE runs SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params![status, now_rfc3339(), id],
        )?;
        tracing::debug!(run_id = id, status = status.as_str(), "run finished");
        Ok(())
    }

    // --- jobs ---

    /// Inserts a `pending` job. The parent run must exist.
    pub fn create_job(&self, job: &NewJob) -> Result<JobRow> {
        let conn = self.lock();
        if !exists(&conn, "SELECT 1 FROM runs WHERE id = ?1", &job.run_id)? {
            return Err(MrbenchError::StorageIntegrity(format!(
                "job references missing run '{}'",
                job.run_id
            )));
        }
        let row = JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: job.run_id.clone(),
            provider: job.provider.clone(),
            model: job.model.clone(),
            prompt_hash: job.prompt_hash.clone(),
            prompt_preview: job.prompt_preview.clone(),
            prompt_stored: job.prompt_stored,
            status: JobStatus::Pending,
            created_at: now_rfc3339(),
            started_at: None,
            completed_at: None,
            error_message: None,
            exit_code: None,
        };
        conn.execute(
            "INSERT INTO jobs(id, run_id, provider, model, prompt_hash, prompt_preview, \
             prompt_stored, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.id,
                row.run_id,
                row.provider,
                row.model,
                row.prompt_hash,
                row.prompt_preview,
                row.prompt_stored,
                row.status,
                row.created_at
            ],
        )?;
        Ok(row)
    }

    /// `pending -> running`.
    pub fn start_job(&self, id: &str) -> Result<()> {
        let conn = self.lock();
        check_transition(&conn, id, JobStatus::Running)?;
        conn.execute(
            "UPDATE jobs SET status = ?1, started_at = ?2 WHERE id = ?3",
            params![JobStatus::Running, now_rfc3339(), id],
        )?;
        Ok(())
    }

    /// `running -> terminal`, writing the outcome and its metrics in one transaction.
    pub fn finish_job(&self, id: &str, outcome: &JobOutcome, metrics: &[NewMetric]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        check_transition(&tx, id, outcome.status)?;
        tx.execute(
            "UPDATE jobs SET status = ?1, completed_at = ?2, error_message = ?3, exit_code = ?4 \
             WHERE id = ?5",
            params![
                outcome.status,
                now_rfc3339(),
                outcome.error_message,
                outcome.exit_code,
                id
            ],
        )?;
        for metric in metrics {
            insert_metric(&tx, id, metric)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobRow>> {
        let conn = self.lock();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Jobs of a run in creation order.
    pub fn jobs_for_run(&self, run_id: &str) -> Result<Vec<JobRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE run_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![run_id], job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // --- metrics ---

    /// Attaches a metric to an existing job.
    pub fn add_metric(&self, job_id: &str, metric: &NewMetric) -> Result<i64> {
        let conn = self.lock();
        if !exists(&conn, "SELECT 1 FROM jobs WHERE id = ?1", job_id)? {
            return Err(MrbenchError::StorageIntegrity(format!(
                "metric references missing job '{job_id}'"
            )));
        }
        insert_metric(&conn, job_id, metric)
    }

    pub fn metrics_for_job(&self, job_id: &str) -> Result<Vec<MetricRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, metric_name, metric_value, metric_unit, is_estimated \
             FROM metrics WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id], |r| {
            Ok(MetricRow {
                id: r.get(0)?,
                job_id: r.get(1)?,
                name: r.get(2)?,
                value: r.get(3)?,
                unit: r.get(4)?,
                is_estimated: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Lowest recorded value of `metric` across the provider's completed jobs.
    pub fn historical_best(&self, provider: &str, metric: &str) -> Result<Option<f64>> {
        let conn = self.lock();
        let best: Option<f64> = conn.query_row(
            "SELECT MIN(m.metric_value) FROM metrics m \
             JOIN jobs j ON m.job_id = j.id \
             WHERE j.provider = ?1 AND m.metric_name = ?2 AND j.status = 'completed'",
            params![provider, metric],
            |r| r.get(0),
        )?;
        Ok(best)
    }

    // --- capabilities ---

    /// Upserts on `(provider, binary_path)`.
    pub fn save_capabilities(&self, snapshot: &CapabilitySnapshot) -> Result<()> {
        let models_json = serde_json::to_string(&snapshot.models)?;
        let features_json = serde_json::to_string(&snapshot.features)?;
        let detected_at = snapshot.detected_at.clone().unwrap_or_else(now_rfc3339);
        let conn = self.lock();
        conn.execute(
            "INSERT INTO capabilities(detected_at, provider, binary_path, binary_version, \
             auth_status, models_json, features_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(provider, binary_path) DO UPDATE SET \
             detected_at = excluded.detected_at, binary_version = excluded.binary_version, \
             auth_status = excluded.auth_status, models_json = excluded.models_json, \
             features_json = excluded.features_json",
            params![
                detected_at,
                snapshot.provider,
                snapshot.binary_path,
                snapshot.binary_version,
                snapshot.auth_status.as_str(),
                models_json,
                features_json
            ],
        )?;
        Ok(())
    }

    pub fn capabilities(&self, provider: Option<&str>) -> Result<Vec<CapabilitySnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT provider, binary_path, binary_version, auth_status, models_json, \
             features_json, detected_at FROM capabilities \
             WHERE ?1 IS NULL OR provider = ?1 ORDER BY provider, binary_path",
        )?;
        let raw = stmt
            .query_map(params![provider], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(raw.len());
        for (provider, binary_path, binary_version, auth, models, features, detected_at) in raw {
            let models = match models.as_deref() {
                Some(s) if !s.trim().is_empty() => serde_json::from_str(s)?,
                _ => Vec::new(),
            };
            let features = match features.as_deref() {
                Some(s) if !s.trim().is_empty() => serde_json::from_str(s)?,
                _ => serde_json::json!({}),
            };
            out.push(CapabilitySnapshot {
                provider,
                binary_path,
                binary_version,
                auth_status: auth.as_deref().map(AuthStatus::parse).unwrap_or_default(),
                models,
                features,
                detected_at: Some(detected_at),
            });
        }
        Ok(out)
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl ProviderHistory for Store {
    fn best_metric(&self, provider: &str, metric: &str) -> Option<f64> {
        match self.historical_best(provider, metric) {
            Ok(best) => best,
            Err(e) => {
                tracing::warn!(provider, metric, error = %e, "history lookup failed");
                None
            }
        }
    }
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool> {
    Ok(conn
        .query_row(sql, params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn check_transition(conn: &Connection, id: &str, next: JobStatus) -> Result<()> {
    let current: Option<JobStatus> = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |r| {
            r.get(0)
        })
        .optional()?;
    let current =
        current.ok_or_else(|| MrbenchError::StorageIntegrity(format!("job '{id}' does not exist")))?;
    if !current.can_transition_to(next) {
        return Err(MrbenchError::InvalidTransition {
            id: id.to_string(),
            from: current.as_str().to_string(),
            to: next.as_str().to_string(),
        });
    }
    Ok(())
}

fn insert_metric(conn: &Connection, job_id: &str, metric: &NewMetric) -> Result<i64> {
    conn.execute(
        "INSERT INTO metrics(job_id, metric_name, metric_value, metric_unit, is_estimated) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            job_id,
            metric.name,
            metric.value,
            metric.unit,
            metric.is_estimated
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn run_from_row(r: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: r.get(0)?,
        created_at: r.get(1)?,
        suite_path: r.get(2)?,
        config_snapshot: r.get(3)?,
        status: r.get(4)?,
        completed_at: r.get(5)?,
    })
}

fn job_from_row(r: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: r.get(0)?,
        run_id: r.get(1)?,
        provider: r.get(2)?,
        model: r.get(3)?,
        prompt_hash: r.get(4)?,
        prompt_preview: r.get(5)?,
        prompt_stored: r.get(6)?,
        status: r.get(7)?,
        created_at: r.get(8)?,
        started_at: r.get(9)?,
        completed_at: r.get(10)?,
        error_message: r.get(11)?,
        exit_code: r.get(12)?,
    })
}
