//! Schema for the three tables spec §3 names, applied via sea-orm-migration
//! so `test_utils::TestDatabase::new::<Migrator>()` can stand up a throwaway
//! Postgres for integration tests. Migration/seed tooling proper is out of
//! scope (spec §1); this module exists only to make the schema runnable.

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(M20240101_000001CreateInferenceTables)]
    }
}

#[derive(DeriveMigrationName)]
pub struct M20240101_000001CreateInferenceTables;

#[async_trait::async_trait]
impl MigrationTrait for M20240101_000001CreateInferenceTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ModelVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ModelVersions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ModelVersions::Name).string().not_null())
                    .col(ColumnDef::new(ModelVersions::WeightsRef).string().not_null())
                    .col(
                        ColumnDef::new(ModelVersions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_model_versions_name")
                    .table(ModelVersions::Table)
                    .col(ModelVersions::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(InferenceJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InferenceJobs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(InferenceJobs::ModelId).big_integer().not_null())
                    .col(
                        ColumnDef::new(InferenceJobs::Status)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InferenceJobs::InputSha256)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InferenceJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InferenceJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inference_jobs_model_id")
                            .from(InferenceJobs::Table, InferenceJobs::ModelId)
                            .to(ModelVersions::Table, ModelVersions::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_sha")
                    .table(InferenceJobs::Table)
                    .col(InferenceJobs::InputSha256)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_status_created")
                    .table(InferenceJobs::Table)
                    .col(InferenceJobs::Status)
                    .col(InferenceJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(InferenceResults::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InferenceResults::JobId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(InferenceResults::Output).json().not_null())
                    .col(
                        ColumnDef::new(InferenceResults::TopLabel)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InferenceResults::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inference_results_job_id")
                            .from(InferenceResults::Table, InferenceResults::JobId)
                            .to(InferenceJobs::Table, InferenceJobs::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_results_top_label")
                    .table(InferenceResults::Table)
                    .col(InferenceResults::TopLabel)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InferenceResults::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(InferenceJobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ModelVersions::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum ModelVersions {
    Table,
    Id,
    Name,
    WeightsRef,
    CreatedAt,
}

#[derive(DeriveIden)]
enum InferenceJobs {
    Table,
    Id,
    ModelId,
    Status,
    InputSha256,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum InferenceResults {
    Table,
    JobId,
    Output,
    TopLabel,
    CreatedAt,
}
