//! PostgreSQL-backed sweeping output store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::instance::{ScopeIds, SweepingOutputInquiry, SweepingOutputInstance, SweepingOutputScope};
use super::store::SweepingOutputService;
use crate::error::{EngineError, EngineResult};

/// DDL for the sweeping output table.
pub const CREATE_TABLE_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS conveyor;
CREATE TABLE IF NOT EXISTS conveyor.sweeping_output (
    uuid                  TEXT PRIMARY KEY,
    app_id                TEXT NOT NULL,
    name                  TEXT NOT NULL,
    scope                 TEXT NOT NULL,
    pipeline_execution_id TEXT,
    workflow_execution_id TEXT NOT NULL,
    phase_execution_id    TEXT,
    state_execution_id    TEXT,
    value                 JSONB NOT NULL,
    created_at            TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS sweeping_output_name_idx
    ON conveyor.sweeping_output (app_id, name, created_at DESC);
"#;

#[derive(Debug, Clone, FromRow)]
struct SweepingOutputRow {
    uuid: String,
    app_id: String,
    name: String,
    scope: String,
    pipeline_execution_id: Option<String>,
    workflow_execution_id: String,
    phase_execution_id: Option<String>,
    state_execution_id: Option<String>,
    value: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<SweepingOutputRow> for SweepingOutputInstance {
    type Error = EngineError;

    fn try_from(row: SweepingOutputRow) -> Result<Self, Self::Error> {
        let scope = SweepingOutputScope::parse(&row.scope).ok_or_else(|| {
            EngineError::Persistence(format!(
                "Unknown sweeping output scope '{}' for {}",
                row.scope, row.uuid
            ))
        })?;
        Ok(Self {
            uuid: row.uuid,
            app_id: row.app_id,
            name: row.name,
            scope,
            ids: ScopeIds {
                pipeline_execution_id: row.pipeline_execution_id,
                workflow_execution_id: row.workflow_execution_id,
                phase_execution_id: row.phase_execution_id,
                state_execution_id: row.state_execution_id,
            },
            value: row.value,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT uuid, app_id, name, scope, pipeline_execution_id, workflow_execution_id,
           phase_execution_id, state_execution_id, value, created_at
    FROM conveyor.sweeping_output
"#;

/// Insert-only store over `conveyor.sweeping_output`.
#[derive(Clone)]
pub struct PgSweepingOutputStore {
    pool: PgPool,
}

impl PgSweepingOutputStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the schema and table if missing.
    pub async fn ensure_schema(&self) -> EngineResult<()> {
        sqlx::raw_sql(CREATE_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}

fn persistence(err: sqlx::Error) -> EngineError {
    EngineError::Persistence(err.to_string())
}

/// Column holding the recorded id for `scope`.
fn scope_column(scope: SweepingOutputScope) -> &'static str {
    match scope {
        SweepingOutputScope::Pipeline => "COALESCE(pipeline_execution_id, workflow_execution_id)",
        SweepingOutputScope::Workflow => "workflow_execution_id",
        SweepingOutputScope::Phase => "phase_execution_id",
        SweepingOutputScope::State => "state_execution_id",
    }
}

#[async_trait]
impl SweepingOutputService for PgSweepingOutputStore {
    async fn save(&self, instance: SweepingOutputInstance) -> EngineResult<SweepingOutputInstance> {
        sqlx::query(
            r#"
            INSERT INTO conveyor.sweeping_output (
                uuid, app_id, name, scope, pipeline_execution_id, workflow_execution_id,
                phase_execution_id, state_execution_id, value, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&instance.uuid)
        .bind(&instance.app_id)
        .bind(&instance.name)
        .bind(instance.scope.as_str())
        .bind(&instance.ids.pipeline_execution_id)
        .bind(&instance.ids.workflow_execution_id)
        .bind(&instance.ids.phase_execution_id)
        .bind(&instance.ids.state_execution_id)
        .bind(&instance.value)
        .bind(instance.created_at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        tracing::debug!(name = %instance.name, scope = %instance.scope, uuid = %instance.uuid, "Sweeping output saved");
        Ok(instance)
    }

    async fn find(&self, inquiry: &SweepingOutputInquiry) -> EngineResult<Option<SweepingOutputInstance>> {
        let sql = format!(
            r#"{}
            WHERE app_id = $1 AND name = $2 AND (
                (scope = 'PIPELINE' AND COALESCE(pipeline_execution_id, workflow_execution_id) = $3)
                OR (scope = 'WORKFLOW' AND workflow_execution_id = $4)
                OR (scope = 'PHASE' AND phase_execution_id = $5)
                OR (scope = 'STATE' AND state_execution_id = $6)
            )
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            SELECT_COLUMNS
        );

        let row = sqlx::query_as::<_, SweepingOutputRow>(&sql)
            .bind(&inquiry.app_id)
            .bind(&inquiry.name)
            .bind(inquiry.ids.id_for(SweepingOutputScope::Pipeline))
            .bind(inquiry.ids.id_for(SweepingOutputScope::Workflow))
            .bind(inquiry.ids.id_for(SweepingOutputScope::Phase))
            .bind(inquiry.ids.id_for(SweepingOutputScope::State))
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;

        row.map(SweepingOutputInstance::try_from).transpose()
    }

    async fn find_many_with_name_prefix(
        &self,
        inquiry: &SweepingOutputInquiry,
        scope: SweepingOutputScope,
    ) -> EngineResult<Vec<SweepingOutputInstance>> {
        let Some(scope_id) = inquiry.ids.id_for(scope) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"{}
            WHERE app_id = $1 AND starts_with(name, $2) AND {} = $3
            ORDER BY created_at ASC
            "#,
            SELECT_COLUMNS,
            scope_column(scope)
        );

        let rows = sqlx::query_as::<_, SweepingOutputRow>(&sql)
            .bind(&inquiry.app_id)
            .bind(&inquiry.name)
            .bind(scope_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;

        rows.into_iter().map(SweepingOutputInstance::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_column() {
        assert_eq!(scope_column(SweepingOutputScope::Workflow), "workflow_execution_id");
        assert!(scope_column(SweepingOutputScope::Pipeline).starts_with("COALESCE"));
    }

    #[test]
    fn test_row_with_unknown_scope_is_rejected() {
        let row = SweepingOutputRow {
            uuid: "u-1".to_string(),
            app_id: "app-1".to_string(),
            name: "setup".to_string(),
            scope: "GALAXY".to_string(),
            pipeline_execution_id: None,
            workflow_execution_id: "wf-1".to_string(),
            phase_execution_id: None,
            state_execution_id: None,
            value: serde_json::json!({}),
            created_at: Utc::now(),
        };
        let err = SweepingOutputInstance::try_from(row).unwrap_err();
        assert!(err.to_string().contains("GALAXY"));
    }
}
