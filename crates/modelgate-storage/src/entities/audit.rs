use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One row per completed request, emitted by the Audit Recorder.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "audit_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
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
    /// JSON-encoded `Vec<AttemptRecord>`, ordered as executed.
    pub attempts_json: Json,
    pub at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
