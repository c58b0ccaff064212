use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Progress::Table)
                    .if_not_exists()
                    .col(pk_auto(Progress::Id))
                    .col(string(Progress::UserId))
                    .col(string(Progress::VideoId))
                    .col(json(Progress::WatchedIntervals))
                    .col(double(Progress::Progress).default(0.0))
                    .col(big_integer(Progress::LastWatchedTime).default(0))
                    .col(big_integer(Progress::TotalDuration))
                    .col(timestamp_with_time_zone(Progress::CreatedAt))
                    .col(timestamp_with_time_zone(Progress::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_progress_user_video")
                    .table(Progress::Table)
                    .col(Progress::UserId)
                    .col(Progress::VideoId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Progress::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Progress {
    Table,
    Id,
    UserId,
    VideoId,
    WatchedIntervals,
    Progress,
    LastWatchedTime,
    TotalDuration,
    CreatedAt,
    UpdatedAt,
}
