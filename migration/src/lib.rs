pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_app_users;
mod m20261001_000002_create_data_groups;
mod m20261001_000003_create_data_sources;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_app_users::Migration),
            Box::new(m20261001_000002_create_data_groups::Migration),
            Box::new(m20261001_000003_create_data_sources::Migration),
        ]
    }
}
