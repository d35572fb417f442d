use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// A Model Mapping row: client-visible alias → one provider's upstream
/// model name, with fallback ordering and a per-mapping overlay.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "mappings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub alias_name: String,
    pub provider_id: i64,
    pub upstream_model: String,
    pub order_index: i32,
    pub is_default: bool,
    pub config_overlay_json: Json,
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
