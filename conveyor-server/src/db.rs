use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{error, info, warn};

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Creates the pool, retrying with exponential backoff while the database
/// is still coming up
pub async fn connect_with_retry(
    database_url: &str,
    max_connections: u32,
    max_attempts: u32,
) -> Result<PgPool, sqlx::Error> {
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match create_pool(database_url, max_connections).await {
            Ok(pool) => {
                if attempt > 1 {
                    info!("Connected to database after {} attempt(s)", attempt);
                }
                return Ok(pool);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    error!("Failed to connect to database after {} attempts", attempt);
                    return Err(e);
                }

                warn!(
                    "Failed to connect to database (attempt {}/{}): {}",
                    attempt, max_attempts, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS "user" (
            user_id BIGSERIAL PRIMARY KEY,
            username VARCHAR(255) NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline (
            pipeline_id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status VARCHAR(20) NOT NULL DEFAULT 'Pending',
            start_time TIMESTAMPTZ,
            end_time TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create tasks table; the order constraint is checked at commit so a
    // swap can pass through a transient duplicate
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task (
            task_id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT NOT NULL REFERENCES pipeline(pipeline_id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status VARCHAR(20) NOT NULL DEFAULT 'Pending',
            "order" INTEGER NOT NULL,
            progress_percentage INTEGER NOT NULL DEFAULT 0,
            assigned_to BIGINT REFERENCES "user"(user_id) ON DELETE SET NULL,
            tags TEXT[] NOT NULL DEFAULT '{}',
            start_time TIMESTAMPTZ,
            end_time TIMESTAMPTZ,
            last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT task_pipeline_order_key UNIQUE (pipeline_id, "order")
                DEFERRABLE INITIALLY DEFERRED
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create dependency edges table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_dependency (
            task_id BIGINT NOT NULL REFERENCES task(task_id) ON DELETE CASCADE,
            depends_on_task_id BIGINT NOT NULL REFERENCES task(task_id) ON DELETE CASCADE,
            PRIMARY KEY (task_id, depends_on_task_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create task metrics table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_metrics (
            task_id BIGINT PRIMARY KEY REFERENCES task(task_id) ON DELETE CASCADE,
            error_count INTEGER NOT NULL DEFAULT 0,
            warning_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_pipeline_id ON task(pipeline_id, \"order\")")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_status ON task(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_task_dependency_depends_on ON task_dependency(depends_on_task_id)",
    )
    .execute(pool)
    .await?;

    info!("Database migrations completed successfully");
    Ok(())
}
