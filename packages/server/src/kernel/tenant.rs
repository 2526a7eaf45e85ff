//! Tenant model and effective admission limits.
//!
//! Tenants are provisioned out-of-band (see the `seed_tenant` binary) and
//! read on every submission. The bearer credential is stored in cleartext
//! in the `users` table, matching the original deployment; treat the
//! database as credential-sensitive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An isolated principal with its own credential and admission limits.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub api_key: String,
    /// NULL means "use the server default".
    pub max_concurrent_jobs: Option<i32>,
    pub rate_limit_per_minute: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Effective rate limit: the tenant row's value or the server default.
    pub fn effective_rate_limit(&self, default: i32) -> i32 {
        self.rate_limit_per_minute.unwrap_or(default)
    }

    /// Effective concurrency cap: the tenant row's value or the server default.
    pub fn effective_max_concurrent(&self, default: i32) -> i32 {
        self.max_concurrent_jobs.unwrap_or(default)
    }
}
