//! Database migrations for the Vulnwatch scanner

pub use sea_orm_migration::prelude::*;

mod migration;

pub use migration::Migrator;
