//! Database connection and table creation.
//!
//! Tables are generated from the entity definitions with `SeaORM`'s
//! `Schema::create_table_from_entity`, so the schema always matches the models.
//! Creation is idempotent (`IF NOT EXISTS`) and runs on every start.

use crate::config::Settings;
use crate::entities::{
    Booking, BookingReview, MentorProfile, PaymentTransaction, ScheduledJob, Wallet, WalletEntry,
};
use crate::errors::Result;
use sea_orm::sea_query::TableCreateStatement;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::path::Path;

/// Creates the directory of a file-backed `sqlite://` URL so `mode=rwc` can create the file.
fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let file = rest.split('?').next().unwrap_or_default();
    if let Some(dir) = Path::new(file).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Opens the pool described by `settings`.
pub async fn create_connection(settings: &Settings) -> Result<DatabaseConnection> {
    ensure_sqlite_dir(&settings.database_url)?;
    let mut options = ConnectOptions::new(settings.database_url.clone());
    options
        .max_connections(settings.max_connections)
        .sqlx_logging(false);

    tracing::debug!("Connecting to database: {}", settings.database_url);
    Database::connect(options).await.map_err(Into::into)
}

/// Creates every table this crate owns if it does not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut tables: Vec<TableCreateStatement> = vec![
        schema.create_table_from_entity(Wallet),
        schema.create_table_from_entity(WalletEntry),
        schema.create_table_from_entity(PaymentTransaction),
        schema.create_table_from_entity(Booking),
        schema.create_table_from_entity(BookingReview),
        schema.create_table_from_entity(MentorProfile),
        schema.create_table_from_entity(ScheduledJob),
    ];

    for table in &mut tables {
        table.if_not_exists();
        db.execute(builder.build(&*table)).await?;
    }

    Ok(())
}
