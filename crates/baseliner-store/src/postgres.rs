use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use baseliner_audit::{AuditContext, Cursor};
use baseliner_domain::{
    AssignmentId, AssignmentMode, Actor, AuditFilter, AuditLogEntry, AuditLogId, Device,
    DeviceAuthToken, DeviceAuthTokenId, DeviceId, DeviceMetadata, DeviceStatus, EnrollToken,
    EnrollTokenId, LogEvent, LogEventId, LogLevel, MintedToken, Policy, PolicyAssignment,
    PolicyDocument, PolicyId, Run, RunId, RunItem, RunItemError, RunItemId, TenantId,
    TokenVerification, DEFAULT_TENANT_ID,
};
use baseliner_ingest::RunSubmission;

use crate::error::StoreError;
use crate::page::Page;
use crate::store::{EnrollOutcome, IngestOutcome, PruneReport, Store};

const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id   UUID PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    id             UUID PRIMARY KEY,
    tenant_id      UUID NOT NULL REFERENCES tenants(id),
    device_key     TEXT NOT NULL,
    hostname       TEXT NOT NULL,
    os             TEXT NOT NULL,
    os_version     TEXT NOT NULL,
    arch           TEXT NOT NULL,
    agent_version  TEXT NOT NULL,
    tags           JSONB NOT NULL DEFAULT '{}',
    status         TEXT NOT NULL,
    last_seen_at   TIMESTAMPTZ,
    deleted_at     TIMESTAMPTZ,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (tenant_id, device_key)
);

CREATE TABLE IF NOT EXISTS enroll_tokens (
    id          UUID PRIMARY KEY,
    tenant_id   UUID NOT NULL REFERENCES tenants(id),
    token_hash  BYTEA NOT NULL,
    expires_at  TIMESTAMPTZ,
    used_at     TIMESTAMPTZ,
    revoked_at  TIMESTAMPTZ,
    note        TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_enroll_tokens_hash ON enroll_tokens(token_hash);

CREATE TABLE IF NOT EXISTS device_auth_tokens (
    id            UUID PRIMARY KEY,
    device_id     UUID NOT NULL REFERENCES devices(id),
    tenant_id     UUID NOT NULL REFERENCES tenants(id),
    token_hash    BYTEA NOT NULL,
    prefix        TEXT NOT NULL,
    issued_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    revoked_at    TIMESTAMPTZ,
    last_used_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_device_auth_tokens_hash ON device_auth_tokens(token_hash);
CREATE UNIQUE INDEX IF NOT EXISTS idx_device_auth_tokens_active
    ON device_auth_tokens(device_id) WHERE revoked_at IS NULL;

CREATE TABLE IF NOT EXISTS policies (
    id              UUID PRIMARY KEY,
    tenant_id       UUID NOT NULL REFERENCES tenants(id),
    name            TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    schema_version  INT NOT NULL DEFAULT 1,
    is_active       BOOLEAN NOT NULL DEFAULT TRUE,
    document        JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (tenant_id, name)
);

CREATE TABLE IF NOT EXISTS policy_assignments (
    id          UUID PRIMARY KEY,
    tenant_id   UUID NOT NULL REFERENCES tenants(id),
    device_id   UUID NOT NULL REFERENCES devices(id),
    policy_id   UUID NOT NULL REFERENCES policies(id),
    priority    INT NOT NULL,
    mode        TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (device_id, policy_id)
);
CREATE INDEX IF NOT EXISTS idx_policy_assignments_device
    ON policy_assignments(device_id, priority, created_at, id);

CREATE TABLE IF NOT EXISTS runs (
    id                     UUID PRIMARY KEY,
    tenant_id              UUID NOT NULL REFERENCES tenants(id),
    device_id              UUID NOT NULL REFERENCES devices(id),
    started_at             TIMESTAMPTZ NOT NULL,
    ended_at               TIMESTAMPTZ NOT NULL,
    status                 TEXT NOT NULL,
    agent_version          TEXT NOT NULL,
    effective_policy_hash  TEXT NOT NULL,
    policy_snapshot        JSONB NOT NULL,
    summary                JSONB NOT NULL,
    correlation_id         TEXT,
    created_at             TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_device_correlation
    ON runs(device_id, correlation_id) WHERE correlation_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_runs_device_created ON runs(device_id, created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_runs_tenant_created ON runs(tenant_id, created_at DESC, id DESC);

CREATE TABLE IF NOT EXISTS run_items (
    id                UUID PRIMARY KEY,
    run_id            UUID NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    ordinal           INT NOT NULL,
    resource_type     TEXT NOT NULL,
    resource_id       TEXT NOT NULL,
    name              TEXT NOT NULL,
    status_detect     TEXT NOT NULL,
    status_remediate  TEXT,
    status_validate   TEXT,
    compliant_before  BOOLEAN,
    compliant_after   BOOLEAN,
    changed           BOOLEAN NOT NULL,
    evidence          JSONB NOT NULL,
    error             JSONB
);
CREATE INDEX IF NOT EXISTS idx_run_items_run ON run_items(run_id, ordinal);

CREATE TABLE IF NOT EXISTS log_events (
    id       UUID PRIMARY KEY,
    run_id   UUID NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    ts       TIMESTAMPTZ NOT NULL,
    level    TEXT NOT NULL,
    message  TEXT NOT NULL,
    data     JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_log_events_run ON log_events(run_id);

CREATE TABLE IF NOT EXISTS audit_logs (
    id             UUID PRIMARY KEY,
    tenant_id      UUID NOT NULL REFERENCES tenants(id),
    ts             TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    actor          TEXT NOT NULL,
    action         TEXT NOT NULL,
    target_type    TEXT NOT NULL,
    target_id      TEXT NOT NULL,
    before         JSONB,
    after          JSONB,
    correlation_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_logs_tenant_ts ON audit_logs(tenant_id, ts DESC, id DESC);
"#;

/// Persistent [`Store`] backed by PostgreSQL. Every mutating method that
/// touches more than one table runs in a single [`sqlx::Transaction`] under
/// the default `READ COMMITTED` isolation level, using `SELECT ... FOR
/// UPDATE` to serialize concurrent writers on the same device row (spec 5).
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url).await.map_err(|e| StoreError::Internal(format!("postgres connect: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(MIGRATIONS).execute(&self.pool).await.map_err(|e| StoreError::Internal(format!("migration: {e}")))?;
        sqlx::query("INSERT INTO tenants (id, name) VALUES ($1, 'default') ON CONFLICT (id) DO NOTHING")
            .bind(DEFAULT_TENANT_ID.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(format!("seed tenant: {e}")))?;
        Ok(())
    }
}

fn internal(e: sqlx::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

fn device_from_row(row: &sqlx::postgres::PgRow) -> Result<Device, StoreError> {
    let status: String = row.try_get("status").map_err(internal)?;
    let tags: Json<HashMap<String, String>> = row.try_get("tags").map_err(internal)?;
    Ok(Device {
        id: DeviceId(row.try_get("id").map_err(internal)?),
        tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
        device_key: row.try_get("device_key").map_err(internal)?,
        hostname: row.try_get("hostname").map_err(internal)?,
        os: row.try_get("os").map_err(internal)?,
        os_version: row.try_get("os_version").map_err(internal)?,
        arch: row.try_get("arch").map_err(internal)?,
        agent_version: row.try_get("agent_version").map_err(internal)?,
        tags: tags.0,
        status: parse_device_status(&status),
        last_seen_at: row.try_get("last_seen_at").map_err(internal)?,
        deleted_at: row.try_get("deleted_at").map_err(internal)?,
        created_at: row.try_get("created_at").map_err(internal)?,
    })
}

fn parse_device_status(s: &str) -> DeviceStatus {
    match s {
        "active" => DeviceStatus::Active,
        _ => DeviceStatus::Inactive,
    }
}

fn parse_assignment_mode(s: &str) -> AssignmentMode {
    match s {
        "enforce" => AssignmentMode::Enforce,
        _ => AssignmentMode::Audit,
    }
}

fn parse_actor(s: &str) -> Actor {
    match s {
        "admin" => Actor::Admin,
        "device" => Actor::Device,
        _ => Actor::System,
    }
}

fn policy_from_row(row: &sqlx::postgres::PgRow) -> Result<Policy, StoreError> {
    let document: Json<PolicyDocument> = row.try_get("document").map_err(internal)?;
    Ok(Policy {
        id: PolicyId(row.try_get("id").map_err(internal)?),
        tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
        name: row.try_get("name").map_err(internal)?,
        description: row.try_get("description").map_err(internal)?,
        schema_version: row.try_get("schema_version").map_err(internal)?,
        is_active: row.try_get("is_active").map_err(internal)?,
        document: document.0,
        created_at: row.try_get("created_at").map_err(internal)?,
        updated_at: row.try_get("updated_at").map_err(internal)?,
    })
}

fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<Run, StoreError> {
    let status: String = row.try_get("status").map_err(internal)?;
    let policy_snapshot: serde_json::Value = row.try_get("policy_snapshot").map_err(internal)?;
    let summary: serde_json::Value = row.try_get("summary").map_err(internal)?;
    Ok(Run {
        id: RunId(row.try_get("id").map_err(internal)?),
        tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
        device_id: DeviceId(row.try_get("device_id").map_err(internal)?),
        started_at: row.try_get("started_at").map_err(internal)?,
        ended_at: row.try_get("ended_at").map_err(internal)?,
        status: parse_run_status(&status),
        agent_version: row.try_get("agent_version").map_err(internal)?,
        effective_policy_hash: row.try_get("effective_policy_hash").map_err(internal)?,
        policy_snapshot,
        summary,
        correlation_id: row.try_get("correlation_id").map_err(internal)?,
        created_at: row.try_get("created_at").map_err(internal)?,
    })
}

fn parse_run_status(s: &str) -> baseliner_domain::RunStatus {
    use baseliner_domain::RunStatus::*;
    match s {
        "succeeded" => Succeeded,
        "partial" => Partial,
        "failed" => Failed,
        _ => Error,
    }
}

fn parse_log_level(s: &str) -> LogLevel {
    use LogLevel::*;
    match s {
        "trace" => Trace,
        "debug" => Debug,
        "info" => Info,
        "warn" => Warn,
        _ => LogLevel::Error,
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_enroll_token(
        &self,
        tenant_id: TenantId,
        minted: &MintedToken,
        expires_at: Option<DateTime<Utc>>,
        note: Option<String>,
        ctx: &AuditContext,
    ) -> Result<EnrollTokenId, StoreError> {
        let id = EnrollTokenId::new();
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query(
            "INSERT INTO enroll_tokens (id, tenant_id, token_hash, expires_at, note) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id.0)
        .bind(tenant_id.0)
        .bind(&minted.hash)
        .bind(expires_at)
        .bind(&note)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        insert_audit(&mut tx, &ctx.entry("enroll_token.create", "enroll_token", id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(id)
    }

    async fn find_enroll_token_by_hash(&self, token_hash: &[u8]) -> Result<Option<EnrollToken>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, token_hash, expires_at, used_at, revoked_at, note, created_at
             FROM enroll_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        row.map(|row| {
            Ok(EnrollToken {
                id: EnrollTokenId(row.try_get("id").map_err(internal)?),
                tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
                token_hash: row.try_get("token_hash").map_err(internal)?,
                expires_at: row.try_get("expires_at").map_err(internal)?,
                used_at: row.try_get("used_at").map_err(internal)?,
                revoked_at: row.try_get("revoked_at").map_err(internal)?,
                note: row.try_get("note").map_err(internal)?,
                created_at: row.try_get("created_at").map_err(internal)?,
            })
        })
        .transpose()
    }

    async fn list_enroll_tokens(&self, tenant_id: TenantId) -> Result<Vec<EnrollToken>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, token_hash, expires_at, used_at, revoked_at, note, created_at
             FROM enroll_tokens WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter()
            .map(|row| {
                Ok(EnrollToken {
                    id: EnrollTokenId(row.try_get("id").map_err(internal)?),
                    tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
                    token_hash: row.try_get("token_hash").map_err(internal)?,
                    expires_at: row.try_get("expires_at").map_err(internal)?,
                    used_at: row.try_get("used_at").map_err(internal)?,
                    revoked_at: row.try_get("revoked_at").map_err(internal)?,
                    note: row.try_get("note").map_err(internal)?,
                    created_at: row.try_get("created_at").map_err(internal)?,
                })
            })
            .collect()
    }

    async fn revoke_enroll_token(&self, id: EnrollTokenId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let result = sqlx::query(
            "UPDATE enroll_tokens SET revoked_at = NOW(), expires_at = LEAST(COALESCE(expires_at, NOW()), NOW())
             WHERE id = $1",
        )
        .bind(id.0)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::EnrollTokenNotFound(id));
        }
        insert_audit(&mut tx, &ctx.entry("enroll_token.revoke", "enroll_token", id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn enroll_device(
        &self,
        tenant_id: TenantId,
        enroll_token_id: EnrollTokenId,
        device_key: &str,
        metadata: &DeviceMetadata,
        device_token: &MintedToken,
        ctx: &AuditContext,
    ) -> Result<(DeviceId, EnrollOutcome, TokenVerification<()>), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;

        let token_row = sqlx::query(
            "SELECT expires_at, used_at, revoked_at FROM enroll_tokens WHERE id = $1 FOR UPDATE",
        )
        .bind(enroll_token_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?;

        let Some(token_row) = token_row else {
            return Ok((DeviceId::default(), EnrollOutcome::Created, TokenVerification::NotFound));
        };
        let expires_at: Option<DateTime<Utc>> = token_row.try_get("expires_at").map_err(internal)?;
        let used_at: Option<DateTime<Utc>> = token_row.try_get("used_at").map_err(internal)?;
        let revoked_at: Option<DateTime<Utc>> = token_row.try_get("revoked_at").map_err(internal)?;
        if revoked_at.is_some() {
            return Ok((DeviceId::default(), EnrollOutcome::Created, TokenVerification::Revoked));
        }
        if used_at.is_some() {
            return Ok((DeviceId::default(), EnrollOutcome::Created, TokenVerification::Used));
        }
        if expires_at.is_some_and(|exp| exp <= Utc::now()) {
            return Ok((DeviceId::default(), EnrollOutcome::Created, TokenVerification::Expired));
        }

        let existing_row = sqlx::query("SELECT id FROM devices WHERE tenant_id = $1 AND device_key = $2 FOR UPDATE")
            .bind(tenant_id.0)
            .bind(device_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?;

        let (device_id, outcome) = match existing_row {
            Some(row) => {
                let id: Uuid = row.try_get("id").map_err(internal)?;
                sqlx::query(
                    "UPDATE devices SET hostname = $2, os = $3, os_version = $4, arch = $5,
                     agent_version = $6, tags = $7, status = 'active', deleted_at = NULL
                     WHERE id = $1",
                )
                .bind(id)
                .bind(&metadata.hostname)
                .bind(&metadata.os)
                .bind(&metadata.os_version)
                .bind(&metadata.arch)
                .bind(&metadata.agent_version)
                .bind(Json(&metadata.tags))
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                (DeviceId(id), EnrollOutcome::Reenrolled)
            }
            None => {
                let id = DeviceId::new();
                sqlx::query(
                    "INSERT INTO devices
                     (id, tenant_id, device_key, hostname, os, os_version, arch, agent_version, tags, status)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active')",
                )
                .bind(id.0)
                .bind(tenant_id.0)
                .bind(device_key)
                .bind(&metadata.hostname)
                .bind(&metadata.os)
                .bind(&metadata.os_version)
                .bind(&metadata.arch)
                .bind(&metadata.agent_version)
                .bind(Json(&metadata.tags))
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                (id, EnrollOutcome::Created)
            }
        };

        sqlx::query("UPDATE device_auth_tokens SET revoked_at = NOW() WHERE device_id = $1 AND revoked_at IS NULL")
            .bind(device_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;

        let auth_id = DeviceAuthTokenId::new();
        sqlx::query(
            "INSERT INTO device_auth_tokens (id, device_id, tenant_id, token_hash, prefix) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(auth_id.0)
        .bind(device_id.0)
        .bind(tenant_id.0)
        .bind(&device_token.hash)
        .bind(&device_token.prefix)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;

        sqlx::query("UPDATE enroll_tokens SET used_at = NOW() WHERE id = $1")
            .bind(enroll_token_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;

        insert_audit(&mut tx, &ctx.entry("device.enroll", "device", device_id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;

        Ok((device_id, outcome, TokenVerification::Valid(())))
    }

    async fn verify_device_token(
        &self,
        raw_token_hash: &[u8],
    ) -> Result<TokenVerification<(Device, DeviceAuthToken)>, StoreError> {
        let row = sqlx::query(
            "SELECT t.id AS tid, t.device_id, t.tenant_id, t.token_hash, t.prefix, t.issued_at,
                    t.revoked_at, t.last_used_at,
                    d.id, d.device_key, d.hostname, d.os, d.os_version, d.arch, d.agent_version,
                    d.tags, d.status, d.last_seen_at, d.deleted_at, d.created_at
             FROM device_auth_tokens t JOIN devices d ON d.id = t.device_id
             WHERE t.token_hash = $1",
        )
        .bind(raw_token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;

        let Some(row) = row else { return Ok(TokenVerification::NotFound) };
        let revoked_at: Option<DateTime<Utc>> = row.try_get("revoked_at").map_err(internal)?;
        let device = device_from_row(&row)?;
        if revoked_at.is_some() {
            return Ok(TokenVerification::Revoked);
        }
        if !device.is_active() {
            return Ok(TokenVerification::DeviceInactive);
        }
        let token = DeviceAuthToken {
            id: DeviceAuthTokenId(row.try_get("tid").map_err(internal)?),
            device_id: device.id,
            tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
            token_hash: row.try_get("token_hash").map_err(internal)?,
            prefix: row.try_get("prefix").map_err(internal)?,
            issued_at: row.try_get("issued_at").map_err(internal)?,
            revoked_at,
            last_used_at: row.try_get("last_used_at").map_err(internal)?,
        };
        Ok(TokenVerification::Valid((device, token)))
    }

    async fn rotate_device_token(
        &self,
        device_id: DeviceId,
        new_token: &MintedToken,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query("SELECT id FROM devices WHERE id = $1 FOR UPDATE")
            .bind(device_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .ok_or(StoreError::DeviceNotFound(device_id))?;

        let tenant_row = sqlx::query("SELECT tenant_id FROM devices WHERE id = $1")
            .bind(device_id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;
        let tenant_id: Uuid = tenant_row.try_get("tenant_id").map_err(internal)?;

        sqlx::query("UPDATE device_auth_tokens SET revoked_at = NOW() WHERE device_id = $1 AND revoked_at IS NULL")
            .bind(device_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        let id = DeviceAuthTokenId::new();
        sqlx::query(
            "INSERT INTO device_auth_tokens (id, device_id, tenant_id, token_hash, prefix) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id.0)
        .bind(device_id.0)
        .bind(tenant_id)
        .bind(&new_token.hash)
        .bind(&new_token.prefix)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        insert_audit(&mut tx, &ctx.entry("device.rotate_token", "device", device_id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn revoke_device_token(&self, device_id: DeviceId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query("SELECT id FROM devices WHERE id = $1 FOR UPDATE")
            .bind(device_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .ok_or(StoreError::DeviceNotFound(device_id))?;
        sqlx::query("UPDATE device_auth_tokens SET revoked_at = NOW() WHERE device_id = $1 AND revoked_at IS NULL")
            .bind(device_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        insert_audit(&mut tx, &ctx.entry("device.revoke_token", "device", device_id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn list_device_tokens(&self, device_id: DeviceId) -> Result<Vec<DeviceAuthToken>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, device_id, tenant_id, token_hash, prefix, issued_at, revoked_at, last_used_at
             FROM device_auth_tokens WHERE device_id = $1 ORDER BY issued_at DESC",
        )
        .bind(device_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter()
            .map(|row| {
                Ok(DeviceAuthToken {
                    id: DeviceAuthTokenId(row.try_get("id").map_err(internal)?),
                    device_id: DeviceId(row.try_get("device_id").map_err(internal)?),
                    tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
                    token_hash: row.try_get("token_hash").map_err(internal)?,
                    prefix: row.try_get("prefix").map_err(internal)?,
                    issued_at: row.try_get("issued_at").map_err(internal)?,
                    revoked_at: row.try_get("revoked_at").map_err(internal)?,
                    last_used_at: row.try_get("last_used_at").map_err(internal)?,
                })
            })
            .collect()
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = $1").bind(id.0).fetch_optional(&self.pool).await.map_err(internal)?;
        row.map(|r| device_from_row(&r)).transpose()
    }

    async fn list_devices(
        &self,
        tenant_id: TenantId,
        status: Option<DeviceStatus>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Device>, StoreError> {
        let after = cursor.map(Cursor::decode).transpose().map_err(|_| StoreError::InvalidCursor)?;
        let status_filter = status.map(|s| s.to_string());

        let rows = sqlx::query(
            "SELECT * FROM devices
             WHERE tenant_id = $1
               AND ($2::text IS NULL OR status = $2)
               AND ($3::timestamptz IS NULL OR (created_at, id) < ($3, $4))
             ORDER BY created_at DESC, id DESC
             LIMIT $5",
        )
        .bind(tenant_id.0)
        .bind(&status_filter)
        .bind(after.map(|a| a.ts))
        .bind(after.map(|a| a.id).unwrap_or(Uuid::nil()))
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        paginate(rows, limit, |d: &Device| Cursor { ts: d.created_at, id: d.id.0 }, device_from_row)
    }

    async fn soft_delete_device(&self, device_id: DeviceId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query("SELECT id FROM devices WHERE id = $1 FOR UPDATE")
            .bind(device_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .ok_or(StoreError::DeviceNotFound(device_id))?;
        sqlx::query("UPDATE devices SET status = 'inactive', deleted_at = NOW() WHERE id = $1")
            .bind(device_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        sqlx::query("UPDATE device_auth_tokens SET revoked_at = NOW() WHERE device_id = $1 AND revoked_at IS NULL")
            .bind(device_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        insert_audit(&mut tx, &ctx.entry("device.soft_delete", "device", device_id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn restore_device(&self, device_id: DeviceId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query("SELECT id FROM devices WHERE id = $1 FOR UPDATE")
            .bind(device_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .ok_or(StoreError::DeviceNotFound(device_id))?;
        sqlx::query("UPDATE devices SET status = 'active', deleted_at = NULL WHERE id = $1")
            .bind(device_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        insert_audit(&mut tx, &ctx.entry("device.restore", "device", device_id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn touch_device_last_seen(&self, device_id: DeviceId) -> Result<(), StoreError> {
        sqlx::query("UPDATE devices SET last_seen_at = GREATEST(COALESCE(last_seen_at, NOW()), NOW()) WHERE id = $1")
            .bind(device_id.0)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn upsert_policy(
        &self,
        tenant_id: TenantId,
        name: &str,
        description: &str,
        document: &PolicyDocument,
        ctx: &AuditContext,
    ) -> Result<PolicyId, StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let row = sqlx::query(
            "INSERT INTO policies (id, tenant_id, name, description, document)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (tenant_id, name) DO UPDATE
               SET description = EXCLUDED.description, document = EXCLUDED.document,
                   schema_version = policies.schema_version + 1, updated_at = NOW()
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id.0)
        .bind(name)
        .bind(description)
        .bind(Json(document))
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        let id = PolicyId(row.try_get("id").map_err(internal)?);
        insert_audit(&mut tx, &ctx.entry("policy.upsert", "policy", id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(id)
    }

    async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query("SELECT * FROM policies WHERE id = $1").bind(id.0).fetch_optional(&self.pool).await.map_err(internal)?;
        row.map(|r| policy_from_row(&r)).transpose()
    }

    async fn list_policies(&self, tenant_id: TenantId) -> Result<Vec<Policy>, StoreError> {
        let rows = sqlx::query("SELECT * FROM policies WHERE tenant_id = $1 ORDER BY name")
            .bind(tenant_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.iter().map(policy_from_row).collect()
    }

    async fn upsert_assignment(
        &self,
        device_id: DeviceId,
        policy_id: PolicyId,
        priority: i32,
        mode: AssignmentMode,
        ctx: &AuditContext,
    ) -> Result<AssignmentId, StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let tenant_row = sqlx::query("SELECT tenant_id FROM devices WHERE id = $1")
            .bind(device_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .ok_or(StoreError::DeviceNotFound(device_id))?;
        let tenant_id: Uuid = tenant_row.try_get("tenant_id").map_err(internal)?;

        let row = sqlx::query(
            "INSERT INTO policy_assignments (id, tenant_id, device_id, policy_id, priority, mode)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (device_id, policy_id) DO UPDATE
               SET priority = EXCLUDED.priority, mode = EXCLUDED.mode
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(device_id.0)
        .bind(policy_id.0)
        .bind(priority)
        .bind(mode.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        let id = AssignmentId(row.try_get("id").map_err(internal)?);
        insert_audit(&mut tx, &ctx.entry("assignment.upsert", "assignment", id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(id)
    }

    async fn delete_assignment(&self, id: AssignmentId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query("DELETE FROM policy_assignments WHERE id = $1").bind(id.0).execute(&mut *tx).await.map_err(internal)?;
        insert_audit(&mut tx, &ctx.entry("assignment.delete", "assignment", id.to_string(), None::<()>, None::<()>)).await?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn list_assignments_for_device(
        &self,
        device_id: DeviceId,
    ) -> Result<Vec<(PolicyAssignment, Option<Policy>)>, StoreError> {
        let rows = sqlx::query(
            "SELECT a.id, a.tenant_id, a.device_id, a.policy_id, a.priority, a.mode, a.created_at,
                    p.id AS p_id, p.name AS p_name, p.description AS p_description,
                    p.schema_version AS p_schema_version, p.is_active AS p_is_active,
                    p.document AS p_document, p.created_at AS p_created_at, p.updated_at AS p_updated_at
             FROM policy_assignments a
             LEFT JOIN policies p ON p.id = a.policy_id
             WHERE a.device_id = $1
             ORDER BY a.priority ASC, a.created_at ASC, a.id ASC",
        )
        .bind(device_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        rows.iter()
            .map(|row| {
                let mode: String = row.try_get("mode").map_err(internal)?;
                let assignment = PolicyAssignment {
                    id: AssignmentId(row.try_get("id").map_err(internal)?),
                    tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
                    device_id: DeviceId(row.try_get("device_id").map_err(internal)?),
                    policy_id: PolicyId(row.try_get("policy_id").map_err(internal)?),
                    priority: row.try_get("priority").map_err(internal)?,
                    mode: parse_assignment_mode(&mode),
                    created_at: row.try_get("created_at").map_err(internal)?,
                };
                let p_id: Option<Uuid> = row.try_get("p_id").map_err(internal)?;
                let policy = p_id.map(|id| -> Result<Policy, StoreError> {
                    let document: Json<PolicyDocument> = row.try_get("p_document").map_err(internal)?;
                    Ok(Policy {
                        id: PolicyId(id),
                        tenant_id: assignment.tenant_id,
                        name: row.try_get("p_name").map_err(internal)?,
                        description: row.try_get("p_description").map_err(internal)?,
                        schema_version: row.try_get("p_schema_version").map_err(internal)?,
                        is_active: row.try_get("p_is_active").map_err(internal)?,
                        document: document.0,
                        created_at: row.try_get("p_created_at").map_err(internal)?,
                        updated_at: row.try_get("p_updated_at").map_err(internal)?,
                    })
                }).transpose()?;
                Ok((assignment, policy))
            })
            .collect()
    }

    async fn ingest_run(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        submission: &RunSubmission,
        correlation_id: Option<String>,
    ) -> Result<IngestOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;

        if let Some(cid) = &correlation_id {
            let existing = sqlx::query("SELECT id FROM runs WHERE device_id = $1 AND correlation_id = $2")
                .bind(device_id.0)
                .bind(cid)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?;
            if let Some(row) = existing {
                let id: Uuid = row.try_get("id").map_err(internal)?;
                tx.commit().await.map_err(internal)?;
                return Ok(IngestOutcome::Duplicate(RunId(id)));
            }
        }

        let run_id = RunId::new();
        sqlx::query(
            "INSERT INTO runs
             (id, tenant_id, device_id, started_at, ended_at, status, agent_version,
              effective_policy_hash, policy_snapshot, summary, correlation_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(run_id.0)
        .bind(tenant_id.0)
        .bind(device_id.0)
        .bind(submission.started_at)
        .bind(submission.ended_at)
        .bind(submission.status.to_string())
        .bind(&submission.agent_version)
        .bind(&submission.effective_policy_hash)
        .bind(&submission.policy_snapshot)
        .bind(&submission.summary)
        .bind(&correlation_id)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;

        for (ordinal, item) in submission.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO run_items
                 (id, run_id, ordinal, resource_type, resource_id, name, status_detect,
                  status_remediate, status_validate, compliant_before, compliant_after,
                  changed, evidence, error)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            )
            .bind(RunItemId::new().0)
            .bind(run_id.0)
            .bind(ordinal as i32)
            .bind(&item.resource_type)
            .bind(&item.resource_id)
            .bind(&item.name)
            .bind(&item.status_detect)
            .bind(&item.status_remediate)
            .bind(&item.status_validate)
            .bind(item.compliant_before)
            .bind(item.compliant_after)
            .bind(item.changed)
            .bind(&item.evidence)
            .bind(item.error.as_ref().map(|e| serde_json::to_value(e).expect("RunItemError serializes")))
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        }

        for log in &submission.logs {
            sqlx::query("INSERT INTO log_events (id, run_id, ts, level, message, data) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(LogEventId::new().0)
                .bind(run_id.0)
                .bind(log.ts)
                .bind(log.level.to_string())
                .bind(&log.message)
                .bind(&log.data)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
        }

        sqlx::query("UPDATE devices SET last_seen_at = GREATEST(COALESCE(last_seen_at, NOW()), NOW()) WHERE id = $1")
            .bind(device_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        sqlx::query("UPDATE device_auth_tokens SET last_used_at = NOW() WHERE device_id = $1 AND revoked_at IS NULL")
            .bind(device_id.0)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;

        tx.commit().await.map_err(internal)?;
        Ok(IngestOutcome::Created(run_id))
    }

    async fn get_run(&self, id: RunId) -> Result<Option<(Run, Vec<RunItem>, Vec<LogEvent>)>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM runs WHERE id = $1").bind(id.0).fetch_optional(&self.pool).await.map_err(internal)? else {
            return Ok(None);
        };
        let run = run_from_row(&row)?;

        let item_rows = sqlx::query("SELECT * FROM run_items WHERE run_id = $1 ORDER BY ordinal").bind(id.0).fetch_all(&self.pool).await.map_err(internal)?;
        let items = item_rows
            .iter()
            .map(|r| {
                let error: Option<serde_json::Value> = r.try_get("error").map_err(internal)?;
                Ok(RunItem {
                    id: RunItemId(r.try_get("id").map_err(internal)?),
                    run_id: id,
                    ordinal: r.try_get("ordinal").map_err(internal)?,
                    resource_type: r.try_get("resource_type").map_err(internal)?,
                    resource_id: r.try_get("resource_id").map_err(internal)?,
                    name: r.try_get("name").map_err(internal)?,
                    status_detect: r.try_get("status_detect").map_err(internal)?,
                    status_remediate: r.try_get("status_remediate").map_err(internal)?,
                    status_validate: r.try_get("status_validate").map_err(internal)?,
                    compliant_before: r.try_get("compliant_before").map_err(internal)?,
                    compliant_after: r.try_get("compliant_after").map_err(internal)?,
                    changed: r.try_get("changed").map_err(internal)?,
                    evidence: r.try_get("evidence").map_err(internal)?,
                    error: error.map(serde_json::from_value::<RunItemError>).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let log_rows = sqlx::query("SELECT * FROM log_events WHERE run_id = $1 ORDER BY id").bind(id.0).fetch_all(&self.pool).await.map_err(internal)?;
        let logs = log_rows
            .iter()
            .map(|r| {
                let level: String = r.try_get("level").map_err(internal)?;
                Ok(LogEvent {
                    id: LogEventId(r.try_get("id").map_err(internal)?),
                    run_id: id,
                    ts: r.try_get("ts").map_err(internal)?,
                    level: parse_log_level(&level),
                    message: r.try_get("message").map_err(internal)?,
                    data: r.try_get("data").map_err(internal)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some((run, items, logs)))
    }

    async fn list_runs(
        &self,
        tenant_id: TenantId,
        device_id: Option<DeviceId>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Run>, StoreError> {
        let after = cursor.map(Cursor::decode).transpose().map_err(|_| StoreError::InvalidCursor)?;

        let rows = sqlx::query(
            "SELECT * FROM runs
             WHERE tenant_id = $1
               AND ($2::uuid IS NULL OR device_id = $2)
               AND ($3::timestamptz IS NULL OR (created_at, id) < ($3, $4))
             ORDER BY created_at DESC, id DESC
             LIMIT $5",
        )
        .bind(tenant_id.0)
        .bind(device_id.map(|d| d.0))
        .bind(after.map(|a| a.ts))
        .bind(after.map(|a| a.id).unwrap_or(Uuid::nil()))
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        paginate(rows, limit, |r: &Run| Cursor { ts: r.created_at, id: r.id.0 }, run_from_row)
    }

    async fn append_audit(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        insert_audit(&mut tx, &entry).await?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn list_audit(
        &self,
        tenant_id: TenantId,
        filter: &AuditFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<AuditLogEntry>, StoreError> {
        let after = cursor.map(Cursor::decode).transpose().map_err(|_| StoreError::InvalidCursor)?;

        let rows = sqlx::query(
            "SELECT * FROM audit_logs
             WHERE tenant_id = $1
               AND ($2::text IS NULL OR action = $2)
               AND ($3::text IS NULL OR target_type = $3)
               AND ($4::text IS NULL OR target_id = $4)
               AND ($5::timestamptz IS NULL OR (ts, id) < ($5, $6))
             ORDER BY ts DESC, id DESC
             LIMIT $7",
        )
        .bind(tenant_id.0)
        .bind(&filter.action)
        .bind(&filter.target_type)
        .bind(&filter.target_id)
        .bind(after.map(|a| a.ts))
        .bind(after.map(|a| a.id).unwrap_or(Uuid::nil()))
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        paginate(
            rows,
            limit,
            |e: &AuditLogEntry| Cursor { ts: e.ts, id: e.id.0 },
            |row| {
                let actor: String = row.try_get("actor").map_err(internal)?;
                Ok(AuditLogEntry {
                    id: AuditLogId(row.try_get("id").map_err(internal)?),
                    tenant_id: TenantId(row.try_get("tenant_id").map_err(internal)?),
                    ts: row.try_get("ts").map_err(internal)?,
                    actor: parse_actor(&actor),
                    action: row.try_get("action").map_err(internal)?,
                    target_type: row.try_get("target_type").map_err(internal)?,
                    target_id: row.try_get("target_id").map_err(internal)?,
                    before: row.try_get("before").map_err(internal)?,
                    after: row.try_get("after").map_err(internal)?,
                    correlation_id: row.try_get("correlation_id").map_err(internal)?,
                })
            },
        )
    }

    async fn prune(
        &self,
        keep_days: i64,
        keep_runs_per_device: u32,
        batch_size: u32,
        dry_run: bool,
    ) -> Result<PruneReport, StoreError> {
        // Candidates: older than keep_days AND not among the keep_runs_per_device
        // most-recent for their device. Chunked by batch_size to bound lock
        // duration (spec 4.7).
        let candidate_ids: Vec<Uuid> = sqlx::query(
            "SELECT id FROM (
                 SELECT id, created_at,
                        row_number() OVER (PARTITION BY device_id ORDER BY created_at DESC) AS rn
                 FROM runs
             ) ranked
             WHERE rn > $1 AND created_at < NOW() - make_interval(days => $2)
             LIMIT $3",
        )
        .bind(keep_runs_per_device as i64)
        .bind(keep_days as i32)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|row| row.try_get::<Uuid, _>("id").expect("id column present"))
        .collect();

        let mut report = PruneReport { dry_run, ..Default::default() };
        if candidate_ids.is_empty() {
            return Ok(report);
        }

        let item_count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM run_items WHERE run_id = ANY($1)")
            .bind(&candidate_ids)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?
            .try_get("c")
            .map_err(internal)?;
        let log_count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM log_events WHERE run_id = ANY($1)")
            .bind(&candidate_ids)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?
            .try_get("c")
            .map_err(internal)?;

        report.runs_deleted = candidate_ids.len() as u64;
        report.run_items_deleted = item_count as u64;
        report.log_events_deleted = log_count as u64;

        if !dry_run {
            sqlx::query("DELETE FROM runs WHERE id = ANY($1)").bind(&candidate_ids).execute(&self.pool).await.map_err(internal)?;
        }

        Ok(report)
    }
}

async fn insert_audit(tx: &mut Transaction<'_, Postgres>, entry: &AuditLogEntry) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO audit_logs (id, tenant_id, ts, actor, action, target_type, target_id, before, after, correlation_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(entry.id.0)
    .bind(entry.tenant_id.0)
    .bind(entry.ts)
    .bind(entry.actor.to_string())
    .bind(&entry.action)
    .bind(&entry.target_type)
    .bind(&entry.target_id)
    .bind(&entry.before)
    .bind(&entry.after)
    .bind(&entry.correlation_id)
    .execute(&mut **tx)
    .await
    .map_err(internal)?;
    Ok(())
}

/// Shared keyset-pagination helper: `rows` was fetched with `LIMIT limit+1`;
/// trims back to `limit` and derives `next_cursor` from the last kept row.
fn paginate<T>(
    rows: Vec<sqlx::postgres::PgRow>,
    limit: u32,
    cursor_of: impl Fn(&T) -> Cursor,
    from_row: impl Fn(&sqlx::postgres::PgRow) -> Result<T, StoreError>,
) -> Result<Page<T>, StoreError> {
    let mut items = rows.iter().map(from_row).collect::<Result<Vec<T>, StoreError>>()?;
    let has_more = items.len() > limit as usize;
    items.truncate(limit as usize);
    let next_cursor = if has_more { items.last().map(|t| cursor_of(t).encode()) } else { None };
    Ok(Page { items, next_cursor })
}
