use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Exists only when the owning `Job` is `COMPLETED`. `job_id` doubles as the
/// primary key so a second `insert_result` for the same job is rejected by
/// the unique-violation path rather than needing an extra existence check
/// (see `PgJobRepository::insert_result`).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inference_results")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_id: i64,
    pub output: Json,
    #[sea_orm(indexed)]
    pub top_label: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::JobId",
        to = "super::job::Column::Id"
    )]
    Job,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
