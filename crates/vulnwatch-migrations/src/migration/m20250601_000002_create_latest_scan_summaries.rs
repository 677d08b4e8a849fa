use sea_orm_migration::prelude::*;

/// Read view for the dashboard: the latest completed scan job per
/// (image_name, image_tag, registry).
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE VIEW latest_scan_summaries AS
                SELECT s.*
                FROM scan_jobs s
                JOIN (
                    SELECT image_name, image_tag, registry, MAX(created_at) AS max_created_at
                    FROM scan_jobs
                    WHERE status = 'completed'
                    GROUP BY image_name, image_tag, registry
                ) latest
                  ON s.image_name = latest.image_name
                 AND s.image_tag = latest.image_tag
                 AND s.registry = latest.registry
                 AND s.created_at = latest.max_created_at
                WHERE s.status = 'completed'
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP VIEW IF EXISTS latest_scan_summaries")
            .await?;

        Ok(())
    }
}
