//! The external authentication and storage service.
//!
//! Everything the API knows about users, sessions and entry rows goes
//! through [`Provider`]. [`SupabaseProvider`] talks to a hosted project;
//! [`LocalProvider`] keeps the same data in process for development and tests.

mod local;
mod supabase;

pub use local::LocalProvider;
pub use supabase::SupabaseProvider;
pub(crate) use supabase::{RemoteSession, RemoteUser};

use crate::models::{AuthResponse, Credentials, Entry, NewEntry, User};
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid or expired token")]
    InvalidToken,

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Unsupported(String),

    #[error("failed to persist provider data: {0}")]
    Storage(String),
}

impl ProviderError {
    /// The text surfaced to API callers.
    pub fn message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Resolves a bearer token to the user it was issued for.
    async fn user_for_token(&self, token: &str) -> Result<User, ProviderError>;

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthResponse, ProviderError>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<User, ProviderError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthResponse, ProviderError>;

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError>;

    fn oauth_authorize_url(
        &self,
        provider: &str,
        redirect_to: Option<&str>,
    ) -> Result<Url, ProviderError>;

    /// Entries owned by `user_id`, newest date first.
    async fn list_entries(&self, user_id: &str) -> Result<Vec<Entry>, ProviderError>;

    async fn insert_entry(&self, entry: &NewEntry) -> Result<Entry, ProviderError>;

    /// Removes the row only when both `id` and `user_id` match; a miss is not an error.
    async fn delete_entry(&self, id: i64, user_id: &str) -> Result<(), ProviderError>;
}
