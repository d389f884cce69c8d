use std::collections::HashSet;
use std::path::Path;

use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;
use vantage_core::{
    AnalysisRecord, AuthKind, DnsQuery, Finding, Flow, RunMode, Session, Severity, VantageError,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// The relational flow store: sessions, flows, findings, analysis records,
/// and DNS queries (§3, §4.4). Single-writer semantics per transactional
/// batch — every multi-row write in this module happens inside one
/// `sqlx` transaction.
pub struct FlowStore {
    pool: SqlitePool,
}

impl FlowStore {
    /// Open the database and reconcile the schema against the migration
    /// ledger. In `RunMode::Dev`, pending migrations are applied
    /// automatically; in `RunMode::Production`, any pending migration is a
    /// fatal `ConfigurationError` — the operator must run migrations out
    /// of band (§4.4).
    pub async fn connect(database_path: &Path, pool_size: u32, mode: RunMode) -> Result<Self, VantageError> {
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite://{}?mode=rwc", database_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect(&url)
            .await?;

        if mode.auto_migrate() {
            MIGRATOR.run(&pool).await.map_err(|e| {
                VantageError::Configuration(format!("migration failed: {e}"))
            })?;
        } else {
            Self::verify_no_pending_migrations(&pool).await?;
        }

        Ok(Self { pool })
    }

    async fn verify_no_pending_migrations(pool: &SqlitePool) -> Result<(), VantageError> {
        let applied: HashSet<i64> = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await
            .map(|rows| rows.iter().map(|r: &SqliteRow| r.get::<i64, _>(0)).collect())
            .unwrap_or_default();

        let pending: Vec<_> = MIGRATOR
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .map(|m| m.description.to_string())
            .collect();

        if !pending.is_empty() {
            return Err(VantageError::Configuration(format!(
                "pending migrations in production mode: {}",
                pending.join(", ")
            )));
        }

        Ok(())
    }

    /// Persist a flow together with every finding and analysis record
    /// produced for it, atomically. On failure the batch rolls back and
    /// the error is returned to the caller — it is the caller's
    /// responsibility (the orchestrator, the interception hook) not to
    /// let this propagate into the capture path (§4.4).
    pub async fn store(
        &self,
        flow: &Flow,
        findings: &[Finding],
        analysis_records: &[AnalysisRecord],
    ) -> Result<(), VantageError> {
        let mut tx = self.pool.begin().await?;

        let request_headers = serde_json::to_string(&flow.request_headers)?;
        let response_headers = serde_json::to_string(&flow.response_headers)?;
        let tls_json = flow.tls.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO flows (id, session_id, timestamp, client_addr, method, url,
                request_headers, response_status, response_headers, auth_kind, tls,
                request_body_size, response_body_size, duration_ms, sensitive_data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(flow.id.to_string())
        .bind(flow.session_id.to_string())
        .bind(flow.timestamp)
        .bind(&flow.client_addr)
        .bind(&flow.method)
        .bind(&flow.url)
        .bind(request_headers)
        .bind(flow.response_status)
        .bind(response_headers)
        .bind(auth_kind_str(flow.auth_kind))
        .bind(tls_json)
        .bind(flow.request_body_size as i64)
        .bind(flow.response_body_size as i64)
        .bind(flow.duration_ms as i64)
        .bind(flow.sensitive_data)
        .execute(&mut *tx)
        .await?;

        for finding in findings {
            insert_finding(&mut tx, finding).await?;
        }

        for record in analysis_records {
            let metadata = serde_json::to_string(&record.metadata)?;
            sqlx::query(
                "INSERT INTO analysis_results (id, flow_id, analyzer, started_at, duration_ms, finding_count, error, metadata)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.id.to_string())
            .bind(record.flow_id.to_string())
            .bind(&record.analyzer)
            .bind(record.started_at)
            .bind(record.duration_ms as i64)
            .bind(record.finding_count as i64)
            .bind(&record.error)
            .bind(metadata)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Persist findings with no owning flow row to batch them into — the
    /// DNS analyzer's output, fed from C12 (§3, §4.6.4). Rolls back as one
    /// set on failure, same as `store`'s finding loop.
    pub async fn store_findings(&self, findings: &[Finding]) -> Result<(), VantageError> {
        if findings.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for finding in findings {
            insert_finding(&mut tx, finding).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert a session row.
    pub async fn store_session(&self, session: &Session) -> Result<(), VantageError> {
        sqlx::query(
            "INSERT INTO sessions (id, client_addr, link_addr, user_agent, first_seen, last_seen, flow_count)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET last_seen = excluded.last_seen, flow_count = excluded.flow_count",
        )
        .bind(session.id.to_string())
        .bind(&session.client_addr)
        .bind(&session.link_addr)
        .bind(&session.user_agent)
        .bind(session.first_seen)
        .bind(session.last_seen)
        .bind(session.flow_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk insert DNS queries. The whole set rolls back together on
    /// failure (§4.4).
    pub async fn store_dns(&self, queries: &[DnsQuery]) -> Result<(), VantageError> {
        if queries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(
                "INSERT INTO dns_queries (id, session_id, timestamp, client_addr, query_name, query_type, response_code)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(query.id.to_string())
            .bind(query.session_id.map(|id| id.to_string()))
            .bind(query.timestamp)
            .bind(&query.client_addr)
            .bind(&query.query_name)
            .bind(&query.query_type)
            .bind(query.response_code)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Whether any administrator identity exists yet (§4.4 bootstrap).
    pub async fn has_administrator(&self) -> Result<bool, VantageError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?
            .get(0);
        Ok(count > 0)
    }

    pub async fn create_administrator(&self, username: &str, password_hash: &str) -> Result<(), VantageError> {
        sqlx::query("INSERT INTO users (id, username, password_hash, is_admin, created_at) VALUES (?, ?, ?, 1, ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(username)
            .bind(password_hash)
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await?;
        info!(username, "administrator account created");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn insert_finding(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    finding: &Finding,
) -> Result<(), VantageError> {
    let metadata = serde_json::to_string(&finding.metadata)?;
    sqlx::query(
        "INSERT INTO findings (id, session_id, flow_id, analyzer, severity, category, title, description, recommendation, detected_at, metadata)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(finding.id.to_string())
    .bind(finding.session_id.to_string())
    .bind(finding.flow_id.map(|id| id.to_string()))
    .bind(&finding.analyzer)
    .bind(severity_str(finding.severity))
    .bind(&finding.category)
    .bind(&finding.title)
    .bind(&finding.description)
    .bind(&finding.recommendation)
    .bind(finding.detected_at)
    .bind(metadata)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn auth_kind_str(kind: AuthKind) -> &'static str {
    match kind {
        AuthKind::None => "none",
        AuthKind::Basic => "basic",
        AuthKind::Bearer => "bearer",
        AuthKind::OAuth => "oauth",
        AuthKind::Other => "other",
    }
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;
    use vantage_core::{Flow, Headers, Severity};

    async fn test_store() -> (FlowStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = FlowStore::connect(&db_path, 1, RunMode::Dev).await.unwrap();
        (store, dir)
    }

    fn sample_flow() -> Flow {
        Flow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            client_addr: "10.0.0.1:4000".into(),
            method: "GET".into(),
            url: "https://example.com/".into(),
            request_headers: Headers::new(),
            response_status: Some(200),
            response_headers: Headers::new(),
            auth_kind: AuthKind::None,
            tls: None,
            request_body_size: 0,
            response_body_size: 128,
            duration_ms: 42,
            sensitive_data: false,
        }
    }

    #[tokio::test]
    async fn store_persists_a_flow_with_no_findings() {
        let (store, _dir) = test_store().await;
        let flow = sample_flow();
        store.store(&flow, &[], &[]).await.unwrap();
    }

    #[tokio::test]
    async fn store_session_upserts_on_conflict() {
        let (store, _dir) = test_store().await;
        let mut session = Session::new("10.0.0.1:4000", Some("aa:bb:cc:dd:ee:ff".to_string()), Some("curl/8.0".to_string()));
        store.store_session(&session).await.unwrap();
        session.touch();
        store.store_session(&session).await.unwrap();
    }

    #[tokio::test]
    async fn no_administrator_on_a_fresh_store() {
        let (store, _dir) = test_store().await;
        assert!(!store.has_administrator().await.unwrap());
    }

    #[tokio::test]
    async fn create_administrator_is_reflected_in_has_administrator() {
        let (store, _dir) = test_store().await;
        store.create_administrator("admin", "hashed").await.unwrap();
        assert!(store.has_administrator().await.unwrap());
    }

    #[tokio::test]
    async fn store_findings_persists_findings_with_no_owning_flow() {
        let (store, _dir) = test_store().await;
        let finding = Finding {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            flow_id: None,
            analyzer: "dns".into(),
            severity: Severity::High,
            category: "dns_tunneling".into(),
            title: "possible DNS tunneling".into(),
            description: "TXT query exceeds 100 characters".into(),
            recommendation: None,
            detected_at: Utc::now(),
            metadata: json!({"query_type": "TXT"}),
        };
        store.store_findings(&[finding]).await.unwrap();
    }

    #[tokio::test]
    async fn production_mode_fails_fast_on_an_unmigrated_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let result = FlowStore::connect(&db_path, 1, RunMode::Production).await;
        assert!(result.is_err());
    }
}
