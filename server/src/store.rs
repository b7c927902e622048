use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deathwatch_shared::Subscription;

use crate::error::{PortError, Result};
use crate::ports::Store;

/// Postgres-backed store.
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn store_err(context: &str, e: impl std::fmt::Display) -> PortError {
    PortError::Store(format!("{context}: {e}"))
}

fn row_to_subscription(row: (i64, String, Vec<String>)) -> Subscription {
    Subscription {
        chat_guild_id: row.0 as u64,
        world: row.1,
        watched_guilds: row.2,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows: Vec<(i64, String, Vec<String>)> =
            sqlx::query_as("SELECT chat_guild_id, world, watched_guilds FROM subscriptions")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| store_err("load subscriptions", e))?;
        Ok(rows.into_iter().map(row_to_subscription).collect())
    }

    async fn subscription(&self, chat_guild_id: u64) -> Result<Option<Subscription>> {
        let row: Option<(i64, String, Vec<String>)> = sqlx::query_as(
            "SELECT chat_guild_id, world, watched_guilds FROM subscriptions \
             WHERE chat_guild_id = $1",
        )
        .bind(chat_guild_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("load subscription", e))?;
        Ok(row.map(row_to_subscription))
    }

    async fn save_subscription(&self, sub: &Subscription) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscriptions (chat_guild_id, world, watched_guilds) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (chat_guild_id) DO UPDATE \
             SET world = EXCLUDED.world, \
                 watched_guilds = EXCLUDED.watched_guilds, \
                 updated_at = now()",
        )
        .bind(sub.chat_guild_id as i64)
        .bind(&sub.world)
        .bind(&sub.watched_guilds)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("save subscription", e))?;
        Ok(())
    }

    async fn delete_subscription(&self, chat_guild_id: u64) -> Result<()> {
        sqlx::query("DELETE FROM subscriptions WHERE chat_guild_id = $1")
            .bind(chat_guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("delete subscription", e))?;
        Ok(())
    }

    async fn add_watched_guild(&self, chat_guild_id: u64, guild: &str) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions \
             SET watched_guilds = array_append(watched_guilds, $2), updated_at = now() \
             WHERE chat_guild_id = $1 AND NOT ($2 = ANY(watched_guilds))",
        )
        .bind(chat_guild_id as i64)
        .bind(guild)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("append watched guild", e))?;
        Ok(())
    }

    async fn remove_watched_guild(&self, chat_guild_id: u64, guild: &str) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions \
             SET watched_guilds = array_remove(watched_guilds, $2), updated_at = now() \
             WHERE chat_guild_id = $1",
        )
        .bind(chat_guild_id as i64)
        .bind(guild)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("remove watched guild", e))?;
        Ok(())
    }

    async fn levels_by_world(&self, world: &str) -> Result<HashMap<String, u32>> {
        let rows: Vec<(String, i32)> =
            sqlx::query_as("SELECT name, level FROM levels WHERE world = $1")
                .bind(world)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| store_err("load level baselines", e))?;
        Ok(rows
            .into_iter()
            .map(|(name, level)| (name, level.max(0) as u32))
            .collect())
    }

    async fn upsert_level(&self, name: &str, level: u32, world: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO levels (name, level, world) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO UPDATE \
             SET level = EXCLUDED.level, world = EXCLUDED.world, updated_at = now()",
        )
        .bind(name)
        .bind(level as i32)
        .bind(world)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("upsert level baseline", e))?;
        Ok(())
    }

    async fn touch_levels(&self, world: &str, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE levels SET updated_at = now() WHERE world = $1 AND name = ANY($2)")
            .bind(world)
            .bind(names)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("touch level baselines", e))?;
        Ok(())
    }

    async fn delete_stale_levels(&self, world: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM levels WHERE world = $1 AND updated_at < $2")
            .bind(world)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("prune stale level baselines", e))?;
        Ok(result.rows_affected())
    }

    async fn offline_levels(&self, world: &str, online: &[String]) -> Result<HashMap<String, u32>> {
        let rows: Vec<(String, i32)> = sqlx::query_as(
            "SELECT name, level FROM levels WHERE world = $1 AND NOT (name = ANY($2))",
        )
        .bind(world)
        .bind(online)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("load offline baselines", e))?;
        Ok(rows
            .into_iter()
            .map(|(name, level)| (name, level.max(0) as u32))
            .collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
