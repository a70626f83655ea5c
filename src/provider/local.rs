use super::{Provider, ProviderError};
use crate::models::{AuthResponse, Credentials, Entry, NewEntry, SessionTokens, User};
use crate::storage::{load_data, persist_data};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use url::Url;
use uuid::Uuid;

const BCRYPT_COST: u32 = 8;
const MIN_PASSWORD_LEN: usize = 6;
/// How long a refresh token outlives the access token it was issued with.
const REFRESH_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    id: String,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl StoredUser {
    fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: self.email.clone(),
        }
    }
}

/// Snapshot written to disk after every mutation. Sessions are not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalData {
    users: Vec<StoredUser>,
    entries: Vec<Entry>,
    next_entry_id: i64,
}

struct LocalSession {
    user_id: String,
    expires_at: DateTime<Utc>,
    refresh_token: String,
}

#[derive(Default)]
struct LocalState {
    data: LocalData,
    sessions: HashMap<String, LocalSession>,
    // refresh token -> access token it was issued with
    refresh_tokens: HashMap<String, String>,
}

/// In-process stand-in for the hosted provider.
pub struct LocalProvider {
    state: Mutex<LocalState>,
    data_path: Option<PathBuf>,
    session_ttl: Duration,
}

impl LocalProvider {
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(LocalState::default()),
            data_path: None,
            session_ttl,
        }
    }

    /// Loads users and entries from `path` and writes every change back to it.
    pub async fn open(path: PathBuf, session_ttl: Duration) -> Self {
        let data: LocalData = load_data(&path).await;
        info!(
            users = data.users.len(),
            entries = data.entries.len(),
            "loaded local provider data from {}",
            path.display()
        );
        Self {
            state: Mutex::new(LocalState {
                data,
                ..LocalState::default()
            }),
            data_path: Some(path),
            session_ttl,
        }
    }

    /// Writes `data` and only then makes it the live state; a failed write
    /// leaves memory as it was.
    async fn commit(&self, state: &mut LocalState, data: LocalData) -> Result<(), ProviderError> {
        if let Some(path) = &self.data_path {
            persist_data(path, &data).await.map_err(|err| {
                error!("failed to write {}: {err}", path.display());
                ProviderError::Storage(err.to_string())
            })?;
        }
        state.data = data;
        Ok(())
    }

    fn issue_session(&self, state: &mut LocalState, user: User) -> AuthResponse {
        prune_sessions(state, Utc::now());

        let access_token = Uuid::new_v4().simple().to_string();
        let refresh_token = Uuid::new_v4().simple().to_string();
        state.sessions.insert(
            access_token.clone(),
            LocalSession {
                user_id: user.id.clone(),
                expires_at: Utc::now() + self.session_ttl,
                refresh_token: refresh_token.clone(),
            },
        );
        state
            .refresh_tokens
            .insert(refresh_token.clone(), access_token.clone());

        AuthResponse {
            session: SessionTokens {
                access_token,
                refresh_token: Some(refresh_token),
                expires_in: Some(self.session_ttl.num_seconds()),
            },
            user,
        }
    }
}

fn refresh_deadline(session: &LocalSession) -> DateTime<Utc> {
    session.expires_at + Duration::days(REFRESH_WINDOW_DAYS)
}

/// Drops sessions whose refresh window has closed.
fn prune_sessions(state: &mut LocalState, now: DateTime<Utc>) {
    let before = state.sessions.len();
    let LocalState {
        sessions,
        refresh_tokens,
        ..
    } = &mut *state;
    sessions.retain(|_, session| {
        let keep = refresh_deadline(session) > now;
        if !keep {
            refresh_tokens.remove(&session.refresh_token);
        }
        keep
    });
    let pruned = before - state.sessions.len();
    if pruned > 0 {
        debug!(pruned, "dropped stale sessions");
    }
}

async fn hash_password(password: String) -> Result<String, ProviderError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
        .await
        .map_err(|err| ProviderError::Storage(err.to_string()))?
        .map_err(|err| ProviderError::Storage(err.to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool, ProviderError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|err| ProviderError::Storage(err.to_string()))?
        .map_err(|err| ProviderError::Storage(err.to_string()))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn invalid_credentials() -> ProviderError {
    ProviderError::Api {
        status: 400,
        message: "Invalid login credentials".to_string(),
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn user_for_token(&self, token: &str) -> Result<User, ProviderError> {
        let state = self.state.lock().await;
        let session = state
            .sessions
            .get(token)
            .ok_or(ProviderError::InvalidToken)?;
        // the refresh token stays usable after the access token expires
        if session.expires_at <= Utc::now() {
            debug!(user_id = %session.user_id, "access token expired");
            return Err(ProviderError::InvalidToken);
        }
        let user_id = &session.user_id;
        state
            .data
            .users
            .iter()
            .find(|user| &user.id == user_id)
            .map(StoredUser::to_user)
            .ok_or(ProviderError::InvalidToken)
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthResponse, ProviderError> {
        let email = normalize_email(&credentials.email);
        let stored = {
            let state = self.state.lock().await;
            state
                .data
                .users
                .iter()
                .find(|user| user.email == email)
                .cloned()
                .ok_or_else(invalid_credentials)?
        };

        if !verify_password(credentials.password.clone(), stored.password_hash.clone()).await? {
            return Err(invalid_credentials());
        }

        let mut state = self.state.lock().await;
        Ok(self.issue_session(&mut state, stored.to_user()))
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<User, ProviderError> {
        let email = normalize_email(&credentials.email);
        if !email.contains('@') {
            return Err(ProviderError::Api {
                status: 400,
                message: "Unable to validate email address: invalid format".to_string(),
            });
        }
        if credentials.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ProviderError::Api {
                status: 422,
                message: format!("Password should be at least {MIN_PASSWORD_LEN} characters."),
            });
        }

        let already_registered = |data: &LocalData| {
            if data.users.iter().any(|user| user.email == email) {
                return Err(ProviderError::Api {
                    status: 422,
                    message: "User already registered".to_string(),
                });
            }
            Ok(())
        };
        already_registered(&self.state.lock().await.data)?;

        let password_hash = hash_password(credentials.password.clone()).await?;

        // checked again: another sign-up may have landed while hashing
        let mut state = self.state.lock().await;
        already_registered(&state.data)?;
        let stored = StoredUser {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            password_hash,
            created_at: Utc::now(),
        };
        let user = stored.to_user();
        let mut data = state.data.clone();
        data.users.push(stored);
        self.commit(&mut state, data).await?;

        info!(user_id = %user.id, "registered user");
        Ok(user)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthResponse, ProviderError> {
        let mut state = self.state.lock().await;
        let access_token = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or(ProviderError::InvalidToken)?;
        let session = state
            .sessions
            .remove(&access_token)
            .ok_or(ProviderError::InvalidToken)?;
        if refresh_deadline(&session) <= Utc::now() {
            return Err(ProviderError::InvalidToken);
        }
        let user = state
            .data
            .users
            .iter()
            .find(|user| user.id == session.user_id)
            .map(StoredUser::to_user)
            .ok_or(ProviderError::InvalidToken)?;

        Ok(self.issue_session(&mut state, user))
    }

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.remove(token) {
            state.refresh_tokens.remove(&session.refresh_token);
        }
        Ok(())
    }

    fn oauth_authorize_url(
        &self,
        provider: &str,
        _redirect_to: Option<&str>,
    ) -> Result<Url, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "{provider} sign-in requires a hosted provider"
        )))
    }

    async fn list_entries(&self, user_id: &str) -> Result<Vec<Entry>, ProviderError> {
        let state = self.state.lock().await;
        let mut entries: Vec<Entry> = state
            .data
            .entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(entries)
    }

    async fn insert_entry(&self, entry: &NewEntry) -> Result<Entry, ProviderError> {
        let mut state = self.state.lock().await;
        let mut data = state.data.clone();
        data.next_entry_id += 1;
        let created = Entry {
            id: data.next_entry_id,
            user_id: entry.user_id.clone(),
            date: entry.date,
            entry_type: entry.entry_type,
            amount: entry.amount,
            category: entry.category.clone(),
            created_at: Utc::now(),
        };
        data.entries.push(created.clone());
        self.commit(&mut state, data).await?;
        Ok(created)
    }

    async fn delete_entry(&self, id: i64, user_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let owned = |entry: &Entry| entry.id == id && entry.user_id == user_id;
        if !state.data.entries.iter().any(owned) {
            return Ok(());
        }
        let mut data = state.data.clone();
        data.entries.retain(|entry| !owned(entry));
        self.commit(&mut state, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryType;

    fn provider() -> LocalProvider {
        LocalProvider::new(Duration::hours(1))
    }

    async fn register(provider: &LocalProvider, email: &str) -> AuthResponse {
        let credentials = Credentials::new(email, "secret-pass");
        provider.sign_up(&credentials).await.unwrap();
        provider.sign_in_with_password(&credentials).await.unwrap()
    }

    fn expense(user_id: &str, amount: f64) -> NewEntry {
        NewEntry {
            user_id: user_id.to_string(),
            date: Utc::now(),
            entry_type: EntryType::Expense,
            amount,
            category: Some("Combustible".to_string()),
        }
    }

    #[tokio::test]
    async fn issued_token_resolves_to_user() {
        let provider = provider();
        let auth = register(&provider, "Driver@Example.com").await;
        let user = provider
            .user_for_token(&auth.session.access_token)
            .await
            .unwrap();
        assert_eq!(user.email, "driver@example.com");
        assert_eq!(user, auth.user);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let provider = provider();
        register(&provider, "a@example.com").await;
        let err = provider
            .sign_in_with_password(&Credentials::new("a@example.com", "nope-nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn duplicate_and_short_password_signups_fail() {
        let provider = provider();
        register(&provider, "a@example.com").await;
        let dup = provider
            .sign_up(&Credentials::new("A@example.com", "another-pass"))
            .await
            .unwrap_err();
        assert_eq!(dup.message(), "User already registered");

        let short = provider
            .sign_up(&Credentials::new("b@example.com", "123"))
            .await
            .unwrap_err();
        assert!(matches!(short, ProviderError::Api { status: 422, .. }));
    }

    #[tokio::test]
    async fn expired_token_is_invalid() {
        let provider = LocalProvider::new(Duration::zero());
        let auth = register(&provider, "a@example.com").await;
        let err = provider
            .user_for_token(&auth.session.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidToken));

        let refresh = auth.session.refresh_token.unwrap();
        assert!(provider.refresh_session(&refresh).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rotates_tokens() {
        let provider = provider();
        let auth = register(&provider, "a@example.com").await;
        let refresh = auth.session.refresh_token.clone().unwrap();

        let renewed = provider.refresh_session(&refresh).await.unwrap();
        assert_ne!(renewed.session.access_token, auth.session.access_token);
        assert!(provider.user_for_token(&auth.session.access_token).await.is_err());
        assert!(provider.user_for_token(&renewed.session.access_token).await.is_ok());
        assert!(provider.refresh_session(&refresh).await.is_err());
    }

    #[tokio::test]
    async fn sign_out_invalidates_token() {
        let provider = provider();
        let auth = register(&provider, "a@example.com").await;
        provider.sign_out(&auth.session.access_token).await.unwrap();
        assert!(provider.user_for_token(&auth.session.access_token).await.is_err());
    }

    #[tokio::test]
    async fn entries_are_scoped_by_user() {
        let provider = provider();
        let a = register(&provider, "a@example.com").await.user;
        let b = register(&provider, "b@example.com").await.user;

        let owned = provider.insert_entry(&expense(&a.id, 20.0)).await.unwrap();
        provider.insert_entry(&expense(&b.id, 7.0)).await.unwrap();

        provider.delete_entry(owned.id, &b.id).await.unwrap();
        let a_entries = provider.list_entries(&a.id).await.unwrap();
        assert_eq!(a_entries, vec![owned.clone()]);

        provider.delete_entry(owned.id, &a.id).await.unwrap();
        assert!(provider.list_entries(&a.id).await.unwrap().is_empty());
        assert_eq!(provider.list_entries(&b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn entries_are_listed_newest_first() {
        let provider = provider();
        let user = register(&provider, "a@example.com").await.user;
        let mut older = expense(&user.id, 1.0);
        older.date = Utc::now() - Duration::days(2);
        provider.insert_entry(&older).await.unwrap();
        provider.insert_entry(&expense(&user.id, 2.0)).await.unwrap();

        let listed = provider.list_entries(&user.id).await.unwrap();
        assert_eq!(listed[0].amount, 2.0);
        assert_eq!(listed[1].amount, 1.0);
    }

    #[tokio::test]
    async fn data_survives_reopen_but_sessions_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let first = LocalProvider::open(path.clone(), Duration::hours(1)).await;
        let auth = register(&first, "a@example.com").await;
        first.insert_entry(&expense(&auth.user.id, 9.5)).await.unwrap();
        drop(first);

        let second = LocalProvider::open(path, Duration::hours(1)).await;
        assert_eq!(second.list_entries(&auth.user.id).await.unwrap().len(), 1);
        assert!(second.user_for_token(&auth.session.access_token).await.is_err());
        second
            .sign_in_with_password(&Credentials::new("a@example.com", "secret-pass"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_write_keeps_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let provider = LocalProvider::open(blocker.join("ledger.json"), Duration::hours(1)).await;

        let credentials = Credentials::new("a@example.com", "secret-pass");
        let err = provider.sign_up(&credentials).await.unwrap_err();
        assert!(matches!(err, ProviderError::Storage(_)));
        // the user was never stored, so a retry fails on the write again
        let retry = provider.sign_up(&credentials).await.unwrap_err();
        assert!(matches!(retry, ProviderError::Storage(_)));
        assert!(provider.sign_in_with_password(&credentials).await.is_err());

        let err = provider.insert_entry(&expense("u-1", 5.0)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Storage(_)));
        assert!(provider.list_entries("u-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let provider = LocalProvider::open(path.clone(), Duration::hours(1)).await;
        let entry = provider.insert_entry(&expense("u-1", 5.0)).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(provider.delete_entry(entry.id, "u-1").await.is_err());
        assert_eq!(provider.list_entries("u-1").await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn stale_sessions_are_pruned_on_login() {
        let provider = LocalProvider::new(Duration::days(-(REFRESH_WINDOW_DAYS + 1)));
        let first = register(&provider, "a@example.com").await;
        provider
            .sign_in_with_password(&Credentials::new("a@example.com", "secret-pass"))
            .await
            .unwrap();

        {
            let state = provider.state.lock().await;
            assert_eq!(state.sessions.len(), 1);
            assert_eq!(state.refresh_tokens.len(), 1);
            assert!(!state.sessions.contains_key(&first.session.access_token));
        }
        let refresh = first.session.refresh_token.unwrap();
        assert!(provider.refresh_session(&refresh).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_signups_register_once() {
        let provider = provider();
        let credentials = Credentials::new("a@example.com", "secret-pass");
        let (first, second) = tokio::join!(
            provider.sign_up(&credentials),
            provider.sign_up(&credentials)
        );
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);

        let state = provider.state.lock().await;
        assert_eq!(state.data.users.len(), 1);
    }

    #[test]
    fn oauth_is_unsupported() {
        let err = provider().oauth_authorize_url("google", None).unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }
}
