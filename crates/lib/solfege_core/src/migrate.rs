//! Schema migrations, embedded from `solfege_core/migrations/`.

use sqlx::PgPool;
use tracing::info;

/// Apply any pending migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let migrator = sqlx::migrate!("./migrations");
    info!(count = migrator.iter().count(), "applying embedded migrations");
    migrator.run(pool).await
}
