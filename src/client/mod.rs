//! Client side of the ledger.
//!
//! [`ApiClient`] wraps the HTTP API and keeps the access token in a
//! [`TokenStore`]. [`ProviderAuth`] mirrors the provider session and
//! broadcasts [`AuthChange`] notifications, which [`AuthContext`] folds into
//! the observable authentication state that gates the dashboard.

pub mod api;
pub mod context;
pub mod dashboard;
mod error;
pub mod provider_auth;
pub mod token_store;

pub use api::{ApiClient, EntryDraft};
pub use context::{AuthContext, AuthState, Route, RouteDecision, SessionSource};
pub use error::ClientError;
pub use provider_auth::{AuthChange, ProviderAuth};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore, AUTH_TOKEN_KEY};

use crate::models::{AuthResponse, User};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, sync::Arc};
use tracing::warn;

const DEFAULT_API_URL: &str = "http://localhost:3000/api";
const DEFAULT_TOKEN_PATH: &str = ".drivers-ledger/storage.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl Session {
    pub fn from_auth_response(response: AuthResponse, issued_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: response
                .session
                .expires_in
                .map(|secs| issued_at + Duration::seconds(secs)),
            access_token: response.session.access_token,
            refresh_token: response.session.refresh_token,
            user: response.user,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub provider_url: Option<String>,
    pub provider_anon_key: Option<String>,
    pub token_path: PathBuf,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider_url = var("SUPABASE_URL");
        let provider_anon_key = var("SUPABASE_ANON_KEY");
        if provider_url.is_none() || provider_anon_key.is_none() {
            warn!("SUPABASE_URL/SUPABASE_ANON_KEY not set; sessions go through the ledger API");
        }

        Self {
            api_base_url: var("LEDGER_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            provider_url,
            provider_anon_key,
            token_path: var("LEDGER_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
        }
    }

    /// Wires the token store, provider session handle and API client together.
    pub fn connect(&self) -> Result<Arc<ApiClient>, ClientError> {
        let tokens: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(&self.token_path));
        let auth = match (&self.provider_url, &self.provider_anon_key) {
            (Some(url), Some(key)) => ProviderAuth::direct(url, key.clone(), tokens.clone())?,
            _ => ProviderAuth::via_api(&self.api_base_url, tokens.clone()),
        };
        Ok(Arc::new(ApiClient::new(
            &self.api_base_url,
            tokens,
            Arc::new(auth),
        )))
    }
}
