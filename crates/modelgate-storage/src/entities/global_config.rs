use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Singleton row (id = 0) holding the merged `GlobalConfig`: CLI > ENV > DB,
/// then persisted back.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "global_config")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub config_json: Json,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
