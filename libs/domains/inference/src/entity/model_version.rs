use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Read-only after seeding; referenced by every `Job`. Deletion is blocked
/// at the repository layer while any `Job` references the row (enforced in
/// application code, not a DB-level `ON DELETE RESTRICT`, since sea-orm's
/// migration for this workspace never issues a `DELETE` against this table).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "model_versions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub weights_ref: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::job::Entity")]
    Job,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
