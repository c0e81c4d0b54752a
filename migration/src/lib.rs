//! Database migrations for the publishing service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_000100_create_oauth_connections;
mod m2025_12_01_000200_create_oauth_states;
mod m2025_12_01_000300_create_published_videos;
mod m2025_12_01_000400_create_credential_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_000100_create_oauth_connections::Migration),
            Box::new(m2025_12_01_000200_create_oauth_states::Migration),
            Box::new(m2025_12_01_000300_create_published_videos::Migration),
            Box::new(m2025_12_01_000400_create_credential_tables::Migration),
        ]
    }
}
