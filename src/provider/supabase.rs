use super::{Provider, ProviderError};
use crate::models::{AuthResponse, Credentials, Entry, NewEntry, SessionTokens, User};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

const ENTRIES_TABLE: &str = "rest/v1/entries";

/// Hosted provider reached through its auth (GoTrue) and table (PostgREST) APIs.
pub struct SupabaseProvider {
    http: Client,
    base: Url,
    key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<RemoteUser> for User {
    fn from(user: RemoteUser) -> Self {
        User {
            id: user.id,
            email: user.email.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: RemoteUser,
}

impl From<RemoteSession> for AuthResponse {
    fn from(session: RemoteSession) -> Self {
        AuthResponse {
            session: SessionTokens {
                access_token: session.access_token,
                refresh_token: session.refresh_token,
                expires_in: session.expires_in,
            },
            user: session.user.into(),
        }
    }
}

// Sign-up answers with a session when e-mail confirmation is off and with a bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignupReply {
    Session(RemoteSession),
    Wrapped { user: RemoteUser },
    User(RemoteUser),
}

#[derive(Debug, Default, Deserialize)]
struct RemoteError {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl RemoteError {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

impl SupabaseProvider {
    pub fn new(url: &str, key: impl Into<String>) -> Result<Self, url::ParseError> {
        let base = Url::parse(&format!("{}/", url.trim_end_matches('/')))?;
        Ok(Self {
            http: Client::new(),
            base,
            key: key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base.join(path).map_err(|err| ProviderError::Api {
            status: 500,
            message: format!("invalid provider url: {err}"),
        })
    }

    fn request(&self, method: Method, url: Url, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.key)
            .bearer_auth(bearer)
    }

    fn entries_url(&self, filters: &[(&str, String)]) -> Result<Url, ProviderError> {
        let mut url = self.endpoint(ENTRIES_TABLE)?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in filters {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<AuthResponse, ProviderError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        let response = self
            .http
            .post(url)
            .header("apikey", &self.key)
            .json(&body)
            .send()
            .await?;
        let session: RemoteSession = check(response).await?.json().await?;
        Ok(session.into())
    }
}

async fn check(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<RemoteError>(&body)
        .ok()
        .and_then(RemoteError::into_message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("provider request failed")
                .to_string()
        });
    debug!(status = status.as_u16(), "provider error: {message}");
    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl Provider for SupabaseProvider {
    async fn user_for_token(&self, token: &str) -> Result<User, ProviderError> {
        let url = self.endpoint("auth/v1/user")?;
        let response = self.request(Method::GET, url, token).send().await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(ProviderError::InvalidToken);
        }
        let user: RemoteUser = check(response).await?.json().await?;
        Ok(user.into())
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthResponse, ProviderError> {
        self.token_grant(
            "password",
            serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
            }),
        )
        .await
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<User, ProviderError> {
        let url = self.endpoint("auth/v1/signup")?;
        let response = self
            .http
            .post(url)
            .header("apikey", &self.key)
            .json(credentials)
            .send()
            .await?;
        let reply: SignupReply = check(response).await?.json().await?;
        let user = match reply {
            SignupReply::Session(session) => session.user,
            SignupReply::Wrapped { user } | SignupReply::User(user) => user,
        };
        Ok(user.into())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthResponse, ProviderError> {
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError> {
        let url = self.endpoint("auth/v1/logout")?;
        let response = self.request(Method::POST, url, token).send().await?;
        match check(response).await {
            Ok(_) => Ok(()),
            // already invalid
            Err(ProviderError::Api { status: 401 | 403, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn oauth_authorize_url(
        &self,
        provider: &str,
        redirect_to: Option<&str>,
    ) -> Result<Url, ProviderError> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider);
            if let Some(redirect_to) = redirect_to {
                query.append_pair("redirect_to", redirect_to);
            }
        }
        Ok(url)
    }

    async fn list_entries(&self, user_id: &str) -> Result<Vec<Entry>, ProviderError> {
        let url = self.entries_url(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("order", "date.desc".to_string()),
        ])?;
        let response = self.request(Method::GET, url, &self.key).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert_entry(&self, entry: &NewEntry) -> Result<Entry, ProviderError> {
        let url = self.entries_url(&[("select", "*".to_string())])?;
        let response = self
            .request(Method::POST, url, &self.key)
            .header("Prefer", "return=representation")
            .json(&[entry])
            .send()
            .await?;
        let rows: Vec<Entry> = check(response).await?.json().await?;
        rows.into_iter().next().ok_or_else(|| ProviderError::Api {
            status: 500,
            message: "insert returned no rows".to_string(),
        })
    }

    async fn delete_entry(&self, id: i64, user_id: &str) -> Result<(), ProviderError> {
        let url = self.entries_url(&[
            ("id", format!("eq.{id}")),
            ("user_id", format!("eq.{user_id}")),
        ])?;
        let response = self.request(Method::DELETE, url, &self.key).send().await?;
        check(response).await?;
        Ok(())
    }
}
