use sqlx::SqlitePool;

use crate::auth;

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // Enable WAL mode for better concurrent access
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;

    // Create migrations tracking table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    // 001: base schema
    if !applied(pool, "001_init").await? {
        let migration_sql = include_str!("../migrations/001_init.sql");
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(pool).await?;
            }
        }
        mark_applied(pool, "001_init").await?;
        tracing::info!("Applied migration: 001_init");
    }

    // 002: per-channel delivery tracking on tickets
    if !applied(pool, "002_delivery_tracking").await? {
        sqlx::query("ALTER TABLE tickets ADD COLUMN email_sent INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await
            .ok();
        sqlx::query("ALTER TABLE tickets ADD COLUMN email_sent_at TEXT")
            .execute(pool)
            .await
            .ok();
        sqlx::query("ALTER TABLE tickets ADD COLUMN email_attempts INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await
            .ok();
        sqlx::query("ALTER TABLE tickets ADD COLUMN whatsapp_sent INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await
            .ok();
        sqlx::query("ALTER TABLE tickets ADD COLUMN whatsapp_sent_at TEXT")
            .execute(pool)
            .await
            .ok();
        sqlx::query("ALTER TABLE tickets ADD COLUMN whatsapp_attempts INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await
            .ok();

        mark_applied(pool, "002_delivery_tracking").await?;
        tracing::info!("Applied migration: 002_delivery_tracking");
    }

    // 003: indexes for the hot lookups (availability window, order ref, owner)
    if !applied(pool, "003_indexes").await? {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tickets_date_slot
             ON tickets(ride_date, time_slot, status)",
        )
        .execute(pool)
        .await
        .ok();
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tickets_order ON tickets(razorpay_order_id)",
        )
        .execute(pool)
        .await
        .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_email ON tickets(user_email)")
            .execute(pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status)")
            .execute(pool)
            .await
            .ok();

        mark_applied(pool, "003_indexes").await?;
        tracing::info!("Applied migration: 003_indexes");
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

async fn applied(pool: &SqlitePool, name: &str) -> anyhow::Result<bool> {
    let found: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(found)
}

async fn mark_applied(pool: &SqlitePool, name: &str) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

/// First-run bootstrap: create the superadmin account from the environment
/// if no superadmin exists yet. No-op otherwise.
pub async fn seed_super_admin(pool: &SqlitePool, email: &str, password: &str) -> anyhow::Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM users WHERE role = 'superadmin'")
            .fetch_one(pool)
            .await?;
    if exists {
        return Ok(());
    }

    let hash = auth::hash_password(password)?;
    sqlx::query(
        "INSERT INTO users (email, role, password_hash) VALUES (?, 'superadmin', ?)
         ON CONFLICT(email) DO UPDATE SET role = 'superadmin', password_hash = excluded.password_hash",
    )
    .bind(email)
    .bind(&hash)
    .execute(pool)
    .await?;

    tracing::info!("Seeded superadmin account for {}", email);
    Ok(())
}
