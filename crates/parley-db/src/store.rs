//! [`Datastore`] implementation over the pooled SQLite database.

use crate::{admin, billing, calls, memory, tenants, DbPool};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_types::{
    AdminAccess, BillingReceipt, BillingRequest, CallRecordMatch, CallRecordUpdate,
    CollectedData, ConversationMemory, Datastore, NewCallRecord, PortError, SimilarMemory,
    TenantConfig, TranscriptEntry,
};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unreadable value in {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("database task failed: {0}")]
    Join(String),
}

impl From<StoreError> for PortError {
    fn from(e: StoreError) -> Self {
        PortError::Store(e.to_string())
    }
}

/// Async adapter that runs each query on the blocking pool.
#[derive(Clone)]
pub struct SqliteDatastore {
    pool: DbPool,
}

impl SqliteDatastore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, PortError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))
        .and_then(|r| r);

        result.map_err(|e| {
            tracing::warn!(op, error = %e, "datastore operation failed");
            PortError::from(e)
        })
    }
}

#[async_trait]
impl Datastore for SqliteDatastore {
    async fn tenant_for_service_number(&self, number: &str) -> Result<Option<String>, PortError> {
        let number = number.to_string();
        self.with_conn("tenant_for_service_number", move |conn| {
            tenants::tenant_for_service_number(conn, &number)
        })
        .await
    }

    async fn tenant_for_external_number(
        &self,
        number: &str,
    ) -> Result<Option<String>, PortError> {
        let number = number.to_string();
        self.with_conn("tenant_for_external_number", move |conn| {
            tenants::tenant_for_external_number(conn, &number)
        })
        .await
    }

    async fn tenant_config(
        &self,
        tenant_id: &str,
        config_id: Option<&str>,
    ) -> Result<Option<TenantConfig>, PortError> {
        let tenant_id = tenant_id.to_string();
        let config_id = config_id.map(str::to_string);
        self.with_conn("tenant_config", move |conn| {
            tenants::tenant_config(conn, &tenant_id, config_id.as_deref())
        })
        .await
    }

    async fn call_record_by_provider_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecordMatch>, PortError> {
        let provider_call_id = provider_call_id.to_string();
        self.with_conn("call_record_by_provider_id", move |conn| {
            calls::call_record_by_provider_id(conn, &provider_call_id)
        })
        .await
    }

    async fn recent_call_record(
        &self,
        tenant_id: &str,
        service_number: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Option<CallRecordMatch>, PortError> {
        let tenant_id = tenant_id.to_string();
        let service_number = service_number.map(str::to_string);
        self.with_conn("recent_call_record", move |conn| {
            calls::recent_call_record(conn, &tenant_id, service_number.as_deref(), since)
        })
        .await
    }

    async fn create_call_record(&self, record: &NewCallRecord) -> Result<String, PortError> {
        let record = record.clone();
        let id = self
            .with_conn("create_call_record", move |conn| {
                calls::create_call_record(conn, &record)
            })
            .await?;
        tracing::info!(call_record_id = %id, "call record created");
        Ok(id)
    }

    async fn update_call_record(
        &self,
        id: &str,
        update: &CallRecordUpdate,
    ) -> Result<(), PortError> {
        let id = id.to_string();
        let update = update.clone();
        self.with_conn("update_call_record", move |conn| {
            calls::update_call_record(conn, &id, &update)
        })
        .await
    }

    async fn save_partial_transcript(
        &self,
        id: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<(), PortError> {
        let owned_id = id.to_string();
        let transcript = transcript.to_vec();
        let written = self
            .with_conn("save_partial_transcript", move |conn| {
                calls::save_partial_transcript(conn, &owned_id, &transcript)
            })
            .await?;
        if !written {
            tracing::debug!(call_record_id = %id, "partial transcript skipped for finished record");
        }
        Ok(())
    }

    async fn conversation_memory(
        &self,
        tenant_id: &str,
        contact_phone: &str,
        config_id: &str,
    ) -> Result<Option<ConversationMemory>, PortError> {
        let (tenant_id, contact_phone, config_id) = (
            tenant_id.to_string(),
            contact_phone.to_string(),
            config_id.to_string(),
        );
        self.with_conn("conversation_memory", move |conn| {
            memory::conversation_memory(conn, &tenant_id, &contact_phone, &config_id)
        })
        .await
    }

    async fn similar_memories(
        &self,
        tenant_id: &str,
        config_id: &str,
        embedding: &[f32],
        exclude_phone: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarMemory>, PortError> {
        let (tenant_id, config_id, exclude_phone) = (
            tenant_id.to_string(),
            config_id.to_string(),
            exclude_phone.to_string(),
        );
        let embedding = embedding.to_vec();
        self.with_conn("similar_memories", move |conn| {
            memory::similar_memories(
                conn,
                &tenant_id,
                &config_id,
                &embedding,
                &exclude_phone,
                threshold,
                limit,
            )
        })
        .await
    }

    async fn save_conversation_memory(
        &self,
        memory: &ConversationMemory,
    ) -> Result<(), PortError> {
        let record = memory.clone();
        self.with_conn("save_conversation_memory", move |conn| {
            memory::save_conversation_memory(conn, &record)
        })
        .await
    }

    async fn admin_access(
        &self,
        tenant_id: &str,
        phone: &str,
    ) -> Result<Option<AdminAccess>, PortError> {
        let (tenant_id, phone) = (tenant_id.to_string(), phone.to_string());
        self.with_conn("admin_access", move |conn| {
            admin::admin_access(conn, &tenant_id, &phone)
        })
        .await
    }

    async fn save_admin_lockout(&self, access: &AdminAccess) -> Result<(), PortError> {
        let access = access.clone();
        self.with_conn("save_admin_lockout", move |conn| {
            admin::save_admin_lockout(conn, &access)
        })
        .await
    }

    async fn record_collected_data(&self, data: &CollectedData) -> Result<(), PortError> {
        let data = data.clone();
        self.with_conn("record_collected_data", move |conn| {
            calls::record_collected_data(conn, &data)
        })
        .await
    }

    async fn calendar_credential(&self, tenant_id: &str) -> Result<Option<String>, PortError> {
        let tenant_id = tenant_id.to_string();
        self.with_conn("calendar_credential", move |conn| {
            tenants::calendar_credential(conn, &tenant_id)
        })
        .await
    }

    async fn deduct(&self, request: &BillingRequest) -> Result<BillingReceipt, PortError> {
        let request = request.clone();
        self.with_conn("deduct", move |conn| billing::deduct(conn, &request))
            .await
    }
}
