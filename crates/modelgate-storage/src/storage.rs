use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Schema,
};
use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::db::connect_shared;
use crate::entities::{audit, credentials, global_config, mappings, providers, users};
use crate::snapshot::StorageSnapshot;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct NewProvider {
    pub name: String,
    pub kind: String,
    pub base_url: String,
    pub config: Value,
    pub status: String,
    pub request_timeout_seconds: i32,
    pub max_in_flight_retries: i32,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub provider_id: i64,
    pub key_id: String,
    pub key_ciphertext: Vec<u8>,
    pub priority: i32,
    pub status: String,
    pub requests_per_minute: Option<i32>,
    pub tokens_per_minute: Option<i32>,
    pub daily_quota: Option<i64>,
    pub monthly_quota: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewMapping {
    pub alias_name: String,
    pub provider_id: i64,
    pub upstream_model: String,
    pub order_index: i32,
    pub is_default: bool,
    pub config_overlay: Value,
}

#[derive(Debug, Clone)]
pub struct AuditRecordInput {
    pub request_id: String,
    pub client_addr: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub model_alias: String,
    pub status: i32,
    pub latency_ms: i64,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub error_class: Option<String>,
    pub attempts: Value,
}

/// Persistent storage for Providers, Credentials, Mappings, Audit, and
/// Users. The core only ever reads an immutable `StorageSnapshot`; writes
/// happen through this trait from the admin surface and the
/// usage-recording path.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn sync(&self) -> StorageResult<()>;
    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    async fn upsert_provider(&self, provider: NewProvider) -> StorageResult<i64>;
    async fn upsert_credential(&self, credential: NewCredential) -> StorageResult<i64>;
    async fn upsert_mapping(&self, mapping: NewMapping) -> StorageResult<i64>;

    /// Applies the Credential Store's `record()` contract: increments
    /// request/token counters, resets or advances the
    /// consecutive-failure count, and forces `status = failed` at the
    /// 10-failure threshold.
    async fn record_credential_usage(
        &self,
        credential_id: i64,
        tokens: i64,
        success: bool,
    ) -> StorageResult<()>;

    async fn insert_audit_record(&self, record: AuditRecordInput) -> StorageResult<()>;

    async fn find_admin_user_by_token_hash(
        &self,
        token_hash: &str,
    ) -> StorageResult<Option<users::Model>>;

    /// The singleton `global_config` row, if one has been persisted yet
    /// (the bootstrap merge order is CLI > ENV > DB, then persisted back).
    async fn load_global_config(&self) -> StorageResult<Option<Value>>;
    async fn upsert_global_config(&self, config: &Value) -> StorageResult<()>;
}

pub struct SeaOrmStorage {
    conn: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let conn = connect_shared(dsn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        let backend = self.conn.get_database_backend();
        let schema = Schema::new(backend);
        for statement in [
            backend.build(schema.create_table_from_entity(providers::Entity).if_not_exists()),
            backend.build(schema.create_table_from_entity(credentials::Entity).if_not_exists()),
            backend.build(schema.create_table_from_entity(mappings::Entity).if_not_exists()),
            backend.build(schema.create_table_from_entity(audit::Entity).if_not_exists()),
            backend.build(schema.create_table_from_entity(users::Entity).if_not_exists()),
            backend.build(schema.create_table_from_entity(global_config::Entity).if_not_exists()),
        ] {
            self.conn.execute(statement).await?;
        }
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let provider_rows = providers::Entity::find().all(&self.conn).await?;
        let credential_rows = credentials::Entity::find()
            .order_by_asc(credentials::Column::Id)
            .all(&self.conn)
            .await?;
        let mapping_rows = mappings::Entity::find()
            .order_by_asc(mappings::Column::OrderIndex)
            .order_by_asc(mappings::Column::Id)
            .all(&self.conn)
            .await?;

        let mut providers = HashMap::new();
        for row in provider_rows {
            providers.insert(row.id, row.into());
        }

        let mut credentials_by_provider: HashMap<i64, Vec<_>> = HashMap::new();
        for row in credential_rows {
            credentials_by_provider
                .entry(row.provider_id)
                .or_default()
                .push(row.into());
        }

        let mut mappings_by_alias: HashMap<String, Vec<_>> = HashMap::new();
        for row in mapping_rows {
            mappings_by_alias
                .entry(row.alias_name.clone())
                .or_default()
                .push(row.into());
        }

        Ok(StorageSnapshot {
            providers,
            credentials_by_provider,
            mappings_by_alias,
        })
    }

    async fn upsert_provider(&self, provider: NewProvider) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let existing = providers::Entity::find()
            .filter(providers::Column::Name.eq(provider.name.clone()))
            .one(&self.conn)
            .await?;

        let model = providers::ActiveModel {
            id: existing.as_ref().map(|e| Set(e.id)).unwrap_or_default(),
            name: Set(provider.name),
            kind: Set(provider.kind),
            base_url: Set(provider.base_url),
            config_json: Set(provider.config),
            status: Set(provider.status),
            request_timeout_seconds: Set(provider.request_timeout_seconds),
            max_in_flight_retries: Set(provider.max_in_flight_retries),
            created_at: existing.as_ref().map(|e| Set(e.created_at)).unwrap_or(Set(now)),
            updated_at: Set(now),
        };

        let saved = model.save(&self.conn).await?;
        Ok(saved.id.unwrap())
    }

    async fn upsert_credential(&self, credential: NewCredential) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let existing = credentials::Entity::find()
            .filter(credentials::Column::ProviderId.eq(credential.provider_id))
            .filter(credentials::Column::KeyId.eq(credential.key_id.clone()))
            .one(&self.conn)
            .await?;

        let model = credentials::ActiveModel {
            id: existing.as_ref().map(|e| Set(e.id)).unwrap_or_default(),
            provider_id: Set(credential.provider_id),
            key_id: Set(credential.key_id),
            key_ciphertext: Set(credential.key_ciphertext),
            priority: Set(credential.priority),
            status: Set(credential.status),
            requests_per_minute: Set(credential.requests_per_minute),
            tokens_per_minute: Set(credential.tokens_per_minute),
            daily_quota: Set(credential.daily_quota),
            monthly_quota: Set(credential.monthly_quota),
            current_daily_usage: existing.as_ref().map(|e| Set(e.current_daily_usage)).unwrap_or(Set(0)),
            current_monthly_usage: existing.as_ref().map(|e| Set(e.current_monthly_usage)).unwrap_or(Set(0)),
            consecutive_failures: existing.as_ref().map(|e| Set(e.consecutive_failures)).unwrap_or(Set(0)),
            last_used_at: existing.as_ref().map(|e| Set(e.last_used_at)).unwrap_or(Set(None)),
            last_failed_at: existing.as_ref().map(|e| Set(e.last_failed_at)).unwrap_or(Set(None)),
            created_at: existing.as_ref().map(|e| Set(e.created_at)).unwrap_or(Set(now)),
            updated_at: Set(now),
        };

        let saved = model.save(&self.conn).await?;
        Ok(saved.id.unwrap())
    }

    async fn upsert_mapping(&self, mapping: NewMapping) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let model = mappings::ActiveModel {
            id: Default::default(),
            alias_name: Set(mapping.alias_name),
            provider_id: Set(mapping.provider_id),
            upstream_model: Set(mapping.upstream_model),
            order_index: Set(mapping.order_index),
            is_default: Set(mapping.is_default),
            config_overlay_json: Set(mapping.config_overlay),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let saved = model.save(&self.conn).await?;
        Ok(saved.id.unwrap())
    }

    async fn record_credential_usage(
        &self,
        credential_id: i64,
        tokens: i64,
        success: bool,
    ) -> StorageResult<()> {
        let Some(existing) = credentials::Entity::find_by_id(credential_id)
            .one(&self.conn)
            .await?
        else {
            return Ok(());
        };

        let now = OffsetDateTime::now_utc();
        let mut model: credentials::ActiveModel = existing.clone().into();
        model.current_daily_usage = Set(existing.current_daily_usage + 1);
        model.current_monthly_usage = Set(existing.current_monthly_usage + 1);
        let _ = tokens;

        if success {
            model.consecutive_failures = Set(0);
            model.last_used_at = Set(Some(now));
        } else {
            let failures = existing.consecutive_failures + 1;
            model.consecutive_failures = Set(failures);
            model.last_failed_at = Set(Some(now));
            if failures >= 10 {
                model.status = Set("failed".to_string());
            }
        }
        model.updated_at = Set(now);
        model.update(&self.conn).await?;
        Ok(())
    }

    async fn insert_audit_record(&self, record: AuditRecordInput) -> StorageResult<()> {
        let model = audit::ActiveModel {
            id: Default::default(),
            request_id: Set(record.request_id),
            client_addr: Set(record.client_addr),
            user_agent: Set(record.user_agent),
            endpoint: Set(record.endpoint),
            method: Set(record.method),
            model_alias: Set(record.model_alias),
            status: Set(record.status),
            latency_ms: Set(record.latency_ms),
            prompt_tokens: Set(record.prompt_tokens),
            completion_tokens: Set(record.completion_tokens),
            error_class: Set(record.error_class),
            attempts_json: Set(record.attempts),
            at: Set(OffsetDateTime::now_utc()),
        };
        model.insert(&self.conn).await?;
        Ok(())
    }

    async fn find_admin_user_by_token_hash(
        &self,
        token_hash: &str,
    ) -> StorageResult<Option<users::Model>> {
        Ok(users::Entity::find()
            .filter(users::Column::TokenHash.eq(token_hash.to_string()))
            .filter(users::Column::IsAdmin.eq(true))
            .filter(users::Column::Enabled.eq(true))
            .one(&self.conn)
            .await?)
    }

    async fn load_global_config(&self) -> StorageResult<Option<Value>> {
        Ok(global_config::Entity::find_by_id(0)
            .one(&self.conn)
            .await?
            .map(|row| row.config_json))
    }

    async fn upsert_global_config(&self, config: &Value) -> StorageResult<()> {
        let now = OffsetDateTime::now_utc();
        let model = global_config::ActiveModel {
            id: Set(0),
            config_json: Set(config.clone()),
            updated_at: Set(now),
        };
        global_config::Entity::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(global_config::Column::Id)
                    .update_columns([global_config::Column::ConfigJson, global_config::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }
}
