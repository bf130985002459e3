use anyhow::Context;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use tracing::info;

/// Opens the MySQL pool and optionally applies the bundled migrations.
pub async fn connection_manager(
    uri: &str,
    max_connections: u32,
    min_connections: u32,
    run_migrations: bool,
) -> anyhow::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .connect(uri)
        .await
        .context("error while initializing the database connection pool")?;

    if run_migrations {
        info!("applying pending database migrations");
        sqlx::migrate!()
            .run(&pool)
            .await
            .context("error while running database migrations")?;
    }

    Ok(pool)
}
