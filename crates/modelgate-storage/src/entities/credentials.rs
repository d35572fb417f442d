use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub provider_id: i64,
    /// Opaque key identifier, unique per (provider_id, key_id).
    pub key_id: String,
    pub key_ciphertext: Vec<u8>,
    pub priority: i32,
    /// `active` | `disabled` | `exhausted` | `failed`.
    pub status: String,
    pub requests_per_minute: Option<i32>,
    pub tokens_per_minute: Option<i32>,
    pub daily_quota: Option<i64>,
    pub monthly_quota: Option<i64>,
    pub current_daily_usage: i64,
    pub current_monthly_usage: i64,
    pub consecutive_failures: i32,
    pub last_used_at: Option<OffsetDateTime>,
    pub last_failed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::providers::Entity",
        from = "Column::ProviderId",
        to = "super::providers::Column::Id",
        on_delete = "Cascade"
    )]
    Provider,
}

impl Related<super::providers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Provider.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
