use super::{ClientError, Session, TokenStore};
use crate::models::{AuthResponse, RefreshRequest, User};
use crate::provider::{RemoteSession, RemoteUser};
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

const EVENT_CAPACITY: usize = 16;

/// Notification sent on every provider session change.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthChange {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

impl AuthChange {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) | Self::TokenRefreshed(session) => Some(session),
            Self::SignedOut => None,
        }
    }
}

enum Remote {
    /// Straight to the provider's auth API with the public anon key.
    Provider { base: Url, anon_key: String },
    /// Through the ledger API's `/auth/*` routes.
    Api { base: String },
}

/// The client's handle on the provider session.
pub struct ProviderAuth {
    http: Client,
    remote: Remote,
    tokens: Arc<dyn TokenStore>,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl ProviderAuth {
    pub fn direct(
        provider_url: &str,
        anon_key: impl Into<String>,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self, ClientError> {
        let base = Url::parse(&format!("{}/", provider_url.trim_end_matches('/')))?;
        Ok(Self::with_remote(
            Remote::Provider {
                base,
                anon_key: anon_key.into(),
            },
            tokens,
        ))
    }

    pub fn via_api(api_base_url: &str, tokens: Arc<dyn TokenStore>) -> Self {
        Self::with_remote(
            Remote::Api {
                base: api_base_url.trim_end_matches('/').to_string(),
            },
            tokens,
        )
    }

    fn with_remote(remote: Remote, tokens: Arc<dyn TokenStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            http: Client::new(),
            remote,
            tokens,
            session: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    /// Cached session, without touching the network.
    pub fn current(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, session: Option<Session>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn emit(&self, change: AuthChange) {
        // no receivers is fine
        let _ = self.events.send(change);
    }

    pub fn set_session(&self, session: Session) {
        self.replace(Some(session.clone()));
        self.emit(AuthChange::SignedIn(session));
    }

    /// Current session: the cached one (refreshed when expired) or one
    /// restored from the stored token. A token the provider rejects yields `None`.
    pub async fn get_session(&self) -> Result<Option<Session>, ClientError> {
        if let Some(session) = self.current() {
            if !session.is_expired(Utc::now()) {
                return Ok(Some(session));
            }
            if session.refresh_token.is_some() {
                match self.refresh_session().await {
                    Ok(session) => return Ok(Some(session)),
                    Err(ClientError::Server { status, .. }) if (400..500).contains(&status) => {
                        debug!(status, "refresh token rejected");
                    }
                    Err(err) => return Err(err),
                }
            }
            self.replace(None);
            return Ok(None);
        }

        let Some(token) = self.tokens.load() else {
            return Ok(None);
        };
        match self.fetch_user(&token).await? {
            Some(user) => {
                let session = Session {
                    access_token: token,
                    refresh_token: None,
                    expires_at: None,
                    user,
                };
                self.replace(Some(session.clone()));
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub async fn refresh_session(&self) -> Result<Session, ClientError> {
        let refresh_token = self
            .current()
            .and_then(|session| session.refresh_token)
            .ok_or(ClientError::NotAuthenticated)?;

        let response = self.remote_refresh(&refresh_token).await?;
        let session = Session::from_auth_response(response, Utc::now());
        self.replace(Some(session.clone()));
        self.emit(AuthChange::TokenRefreshed(session.clone()));
        Ok(session)
    }

    /// Invalidates the session remotely when possible; the local sign-out always happens.
    pub async fn sign_out(&self) {
        let token = self
            .current()
            .map(|session| session.access_token)
            .or_else(|| self.tokens.load());
        if let Some(token) = token {
            if let Err(err) = self.remote_sign_out(&token).await {
                warn!("remote sign-out failed: {err}");
            }
        }
        self.replace(None);
        self.emit(AuthChange::SignedOut);
    }

    pub fn oauth_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<Url, ClientError> {
        let mut url = match &self.remote {
            Remote::Provider { base, .. } => {
                let mut url = base.join("auth/v1/authorize")?;
                url.query_pairs_mut().append_pair("provider", provider);
                url
            }
            Remote::Api { base } if provider == "google" => {
                Url::parse(&format!("{base}/auth/google"))?
            }
            Remote::Api { .. } => {
                return Err(ClientError::Unsupported(format!(
                    "{provider} sign-in is not available through the ledger API"
                )));
            }
        };
        if let Some(redirect_to) = redirect_to {
            url.query_pairs_mut().append_pair("redirect_to", redirect_to);
        }
        Ok(url)
    }

    /// Adopts the session carried in the fragment of an OAuth redirect
    /// (`#access_token=...&refresh_token=...&expires_in=...`).
    pub async fn complete_oauth_redirect(&self, redirect: &Url) -> Result<Session, ClientError> {
        let params: Vec<(String, String)> = url::form_urlencoded::parse(
            redirect.fragment().unwrap_or_default().as_bytes(),
        )
        .into_owned()
        .collect();
        let param = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };

        if let Some(description) = param("error_description").or_else(|| param("error")) {
            return Err(ClientError::Server {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                message: description,
            });
        }
        let access_token = param("access_token").ok_or_else(|| {
            ClientError::Validation("redirect carries no access token".to_string())
        })?;

        let user = self
            .fetch_user(&access_token)
            .await?
            .ok_or_else(|| ClientError::Server {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                message: "Invalid or expired token".to_string(),
            })?;

        let now = Utc::now();
        let session = Session {
            access_token,
            refresh_token: param("refresh_token"),
            expires_at: param("expires_in")
                .and_then(|secs| secs.parse::<i64>().ok())
                .map(|secs| now + chrono::Duration::seconds(secs)),
            user,
        };
        self.set_session(session.clone());
        Ok(session)
    }

    fn authorized(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        let builder = match &self.remote {
            Remote::Provider { anon_key, .. } => builder.header("apikey", anon_key),
            Remote::Api { .. } => builder,
        };
        builder.bearer_auth(token)
    }

    fn endpoint(&self, provider_path: &str, api_path: &str) -> Result<Url, ClientError> {
        Ok(match &self.remote {
            Remote::Provider { base, .. } => base.join(provider_path)?,
            Remote::Api { base } => Url::parse(&format!("{base}{api_path}"))?,
        })
    }

    async fn fetch_user(&self, token: &str) -> Result<Option<User>, ClientError> {
        let url = self.endpoint("auth/v1/user", "/auth/user")?;
        let response = self.authorized(self.http.get(url), token).send().await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ClientError::from_response(response, "Failed to fetch session").await);
        }
        Ok(Some(match self.remote {
            Remote::Provider { .. } => response.json::<RemoteUser>().await?.into(),
            Remote::Api { .. } => response.json::<User>().await?,
        }))
    }

    async fn remote_refresh(&self, refresh_token: &str) -> Result<AuthResponse, ClientError> {
        let mut url = self.endpoint("auth/v1/token", "/auth/refresh")?;
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let builder = match &self.remote {
            Remote::Provider { anon_key, .. } => {
                url.query_pairs_mut()
                    .append_pair("grant_type", "refresh_token");
                self.http.post(url).header("apikey", anon_key)
            }
            Remote::Api { .. } => self.http.post(url),
        };
        let response = builder.json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::from_response(response, "Failed to refresh session").await);
        }
        Ok(match self.remote {
            Remote::Provider { .. } => response.json::<RemoteSession>().await?.into(),
            Remote::Api { .. } => response.json::<AuthResponse>().await?,
        })
    }

    async fn remote_sign_out(&self, token: &str) -> Result<(), ClientError> {
        let url = self.endpoint("auth/v1/logout", "/auth/logout")?;
        let response = self.authorized(self.http.post(url), token).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            return Ok(());
        }
        Err(ClientError::from_response(response, "Failed to sign out").await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryTokenStore;

    fn session(token: &str) -> Session {
        Session {
            access_token: token.to_string(),
            refresh_token: None,
            expires_at: None,
            user: User {
                id: "u-1".to_string(),
                email: "driver@example.com".to_string(),
            },
        }
    }

    fn detached() -> ProviderAuth {
        ProviderAuth::via_api("http://127.0.0.1:9/api/", Arc::new(MemoryTokenStore::default()))
    }

    #[tokio::test]
    async fn set_session_notifies_subscribers() {
        let auth = detached();
        let mut changes = auth.subscribe();
        auth.set_session(session("tok"));

        let change = changes.recv().await.unwrap();
        assert_eq!(change, AuthChange::SignedIn(session("tok")));
        assert_eq!(auth.current(), Some(session("tok")));
    }

    #[tokio::test]
    async fn no_token_means_no_session() {
        assert_eq!(detached().get_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unexpired_cached_session_is_returned_as_is() {
        let auth = detached();
        auth.set_session(session("tok"));
        assert_eq!(auth.get_session().await.unwrap(), Some(session("tok")));
    }

    #[tokio::test]
    async fn expired_session_without_refresh_token_is_dropped() {
        let auth = detached();
        let mut expired = session("tok");
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        auth.set_session(expired);
        assert_eq!(auth.get_session().await.unwrap(), None);
        assert_eq!(auth.current(), None);
    }

    #[test]
    fn oauth_url_targets_provider_or_api() {
        let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::default());
        let direct = ProviderAuth::direct("https://demo.supabase.co", "anon", tokens.clone()).unwrap();
        let url = direct
            .oauth_url("google", Some("http://localhost:5173/"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo.supabase.co/auth/v1/authorize?provider=google&redirect_to=http%3A%2F%2Flocalhost%3A5173%2F"
        );

        let via_api = ProviderAuth::via_api("http://localhost:3000/api", tokens);
        assert_eq!(
            via_api.oauth_url("google", None).unwrap().as_str(),
            "http://localhost:3000/api/auth/google"
        );
        assert!(matches!(
            via_api.oauth_url("github", None),
            Err(ClientError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn oauth_redirect_errors_are_reported() {
        let redirect =
            Url::parse("http://localhost:3000/#error=access_denied&error_description=User+cancelled")
                .unwrap();
        let err = detached().complete_oauth_redirect(&redirect).await.unwrap_err();
        assert_eq!(err.to_string(), "User cancelled");

        let bare = Url::parse("http://localhost:3000/#state=xyz").unwrap();
        assert!(matches!(
            detached().complete_oauth_redirect(&bare).await,
            Err(ClientError::Validation(_))
        ));
    }
}
