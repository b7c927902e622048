use std::path::Path;

// Migrations ship with the server crate; the daemon may be started from the
// workspace root or from `server/` itself.
const MIGRATION_LAYOUTS: [&str; 2] = ["server/migrations", "migrations"];

fn migrations_dir() -> &'static Path {
    for layout in MIGRATION_LAYOUTS {
        let path = Path::new(layout);
        if path.exists() {
            return path;
        }
    }
    Path::new(MIGRATION_LAYOUTS[0])
}

pub async fn run(pool: &sqlx::PgPool) -> Result<(), sqlx_core::migrate::MigrateError> {
    let migrator = sqlx_core::migrate::Migrator::new(migrations_dir()).await?;
    migrator.run(pool).await
}
