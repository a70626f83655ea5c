use super::{ClientError, ProviderAuth, Session, TokenStore};
use crate::models::{AuthResponse, Credentials, Entry, EntryType, SignupResponse, User};
use crate::summary::DailySummary;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Entry payload as submitted to `POST /entries`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryDraft {
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    auth: Arc<ProviderAuth>,
}

impl ApiClient {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenStore>, auth: Arc<ProviderAuth>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            auth,
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn auth(&self) -> &Arc<ProviderAuth> {
        &self.auth
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.tokens.load().ok_or(ClientError::NotAuthenticated)?;
        Ok(builder.bearer_auth(token))
    }

    async fn parse<T: DeserializeOwned>(response: Response, fallback: &str) -> Result<T, ClientError> {
        if !response.status().is_success() {
            return Err(ClientError::from_response(response, fallback).await);
        }
        Ok(response.json().await?)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&Credentials::new(email, password))
            .send()
            .await?;
        let auth: AuthResponse = Self::parse(response, "Failed to login").await?;

        self.tokens.save(&auth.session.access_token)?;
        self.auth
            .set_session(Session::from_auth_response(auth.clone(), Utc::now()));
        Ok(auth)
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let response = self
            .http
            .post(self.url("/auth/signup"))
            .json(&Credentials::new(email, password))
            .send()
            .await?;
        let body: SignupResponse = Self::parse(response, "Failed to sign up").await?;
        Ok(body.user)
    }

    /// URL the user has to open to sign in with Google; the session arrives
    /// later through [`ProviderAuth::complete_oauth_redirect`].
    pub fn sign_in_with_google(&self, redirect_to: Option<&str>) -> Result<Url, ClientError> {
        self.auth.oauth_url("google", redirect_to)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.auth.sign_out().await;
        self.tokens.clear()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.load().is_some()
    }

    pub async fn get_entries(&self) -> Result<Vec<Entry>, ClientError> {
        let response = self
            .authorized(self.http.get(self.url("/entries")))?
            .send()
            .await?;
        Self::parse(response, "Failed to fetch entries").await
    }

    pub async fn add_entry(&self, draft: &EntryDraft) -> Result<Entry, ClientError> {
        let response = self
            .authorized(self.http.post(self.url("/entries")))?
            .json(draft)
            .send()
            .await?;
        let entry: Entry = Self::parse(response, "Failed to add entry").await?;
        debug!(entry_id = entry.id, "entry added");
        Ok(entry)
    }

    pub async fn delete_entry(&self, id: i64) -> Result<(), ClientError> {
        let response = self
            .authorized(self.http.delete(self.url(&format!("/entries/{id}"))))?
            .send()
            .await?;
        if !response.status().is_success() {
            let err = ClientError::from_response(response, "Failed to delete entry").await;
            warn!(entry_id = id, "delete failed: {err}");
            return Err(err);
        }
        Ok(())
    }

    /// Server-side daily summary for the calendar day of `at` in its own offset.
    pub async fn summary(&self, at: DateTime<FixedOffset>) -> Result<DailySummary, ClientError> {
        let response = self
            .authorized(self.http.get(self.url("/summary")))?
            .query(&[("at", at.to_rfc3339_opts(SecondsFormat::Millis, true))])
            .send()
            .await?;
        Self::parse(response, "Failed to fetch summary").await
    }
}
