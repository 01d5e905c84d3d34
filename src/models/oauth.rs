//! OAuth account link model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A provider account linked to a local user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAccount {
    pub id: i64,
    pub user_id: i64,
    /// Provider name, e.g. `google` or `github`
    pub provider: String,
    /// Account id assigned by the provider
    pub provider_account_id: String,
    pub created_at: DateTime<Utc>,
}

/// An identity asserted by an external provider after a completed OAuth flow
#[derive(Debug, Clone)]
pub struct OAuthIdentity {
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
}
