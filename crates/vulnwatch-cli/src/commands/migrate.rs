use clap::Args;
use colored::Colorize;
use sea_orm::Database;
use tracing::info;
use vulnwatch_migrations::{Migrator, MigratorTrait};

#[derive(Args)]
pub struct MigrateCommand {
    /// Database connection URL
    #[arg(long, env = "VULNWATCH_DATABASE_URL")]
    pub database_url: String,

    /// Drop everything and re-apply all migrations
    #[arg(long)]
    pub fresh: bool,
}

impl MigrateCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        let db = Database::connect(&self.database_url).await?;

        if self.fresh {
            info!("dropping schema and re-applying all migrations");
            Migrator::fresh(&db).await?;
        } else {
            Migrator::up(&db, None).await?;
        }

        println!("{}", "Migrations applied.".bright_green());
        Ok(())
    }
}
