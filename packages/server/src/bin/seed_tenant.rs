// Provision (or re-key) a tenant row. Tenants are created out-of-band;
// this is that band.
//
// Usage: seed_tenant <tenant-id> [api-key] [max-concurrent] [rate-per-minute]

use anyhow::{Context, Result};
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let tenant_id = args
        .next()
        .context("usage: seed_tenant <tenant-id> [api-key] [max-concurrent] [rate-per-minute]")?;
    let api_key = args
        .next()
        .unwrap_or_else(|| format!("key-{}", Uuid::new_v4().simple()));
    let max_concurrent: Option<i32> = args
        .next()
        .map(|raw| raw.parse().context("max-concurrent must be a number"))
        .transpose()?;
    let rate_limit: Option<i32> = args
        .next()
        .map(|raw| raw.parse().context("rate-per-minute must be a number"))
        .transpose()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::query(
        r#"
        INSERT INTO users (tenant_id, api_key, max_concurrent_jobs, rate_limit_per_minute)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (tenant_id)
        DO UPDATE SET api_key = EXCLUDED.api_key,
                      max_concurrent_jobs = EXCLUDED.max_concurrent_jobs,
                      rate_limit_per_minute = EXCLUDED.rate_limit_per_minute,
                      updated_at = NOW()
        "#,
    )
    .bind(&tenant_id)
    .bind(&api_key)
    .bind(max_concurrent)
    .bind(rate_limit)
    .execute(&pool)
    .await
    .context("Failed to upsert tenant")?;

    println!("tenant_id: {}", tenant_id);
    println!("api_key:   {}", api_key);
    Ok(())
}
