use super::{ApiClient, AuthChange, ClientError, ProviderAuth, Session, TokenStore};
use crate::models::User;
use async_trait::async_trait;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};
use url::Url;

/// Where the session comes from: an initial lookup plus change notifications.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>, ClientError>;
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

#[async_trait]
impl SessionSource for ProviderAuth {
    async fn get_session(&self) -> Result<Option<Session>, ClientError> {
        ProviderAuth::get_session(self).await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        ProviderAuth::subscribe(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub loading: bool,
    pub authenticated: bool,
    pub user: Option<User>,
}

/// The single writer of [`AuthState`].
///
/// Every update runs inside `send_if_modified`, so the initial check and the
/// listener are serialized on the watch lock and `events_seen` is read and
/// written under it.
struct SessionCell {
    state: watch::Sender<AuthState>,
    tokens: Arc<dyn TokenStore>,
    events_seen: AtomicBool,
}

impl SessionCell {
    fn persist(&self, session: Option<&Session>) {
        let result = match session {
            Some(session) => self.tokens.save(&session.access_token),
            None => self.tokens.clear(),
        };
        if let Err(err) = result {
            warn!("failed to update stored token: {err}");
        }
    }

    fn write(state: &mut AuthState, session: Option<&Session>) -> bool {
        let next = AuthState {
            loading: false,
            authenticated: session.is_some(),
            user: session.map(|s| s.user.clone()),
        };
        if *state == next {
            return false;
        }
        *state = next;
        true
    }

    fn apply_notification(&self, session: Option<&Session>) {
        self.state.send_if_modified(|state| {
            self.events_seen.store(true, Ordering::SeqCst);
            self.persist(session);
            Self::write(state, session)
        });
    }

    fn apply_initial(&self, session: Option<&Session>) {
        self.state.send_if_modified(|state| {
            if !self.events_seen.load(Ordering::SeqCst) {
                self.persist(session);
                return Self::write(state, session);
            }
            debug!("initial session check superseded by a notification");
            let was_loading = state.loading;
            state.loading = false;
            was_loading
        });
    }

    fn finish_check(&self) {
        self.set_loading(false);
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        });
    }
}

/// Observable authentication state for one mounted client.
///
/// Mounting starts the initial session check and the notification listener;
/// [`AuthContext::unmount`] (or drop) stops both.
pub struct AuthContext {
    api: Arc<ApiClient>,
    cell: Arc<SessionCell>,
    state: watch::Receiver<AuthState>,
    tasks: Vec<JoinHandle<()>>,
}

impl AuthContext {
    /// Must be called from within a tokio runtime.
    pub fn mount(source: Arc<dyn SessionSource>, api: Arc<ApiClient>) -> Self {
        let (sender, state) = watch::channel(AuthState {
            loading: true,
            authenticated: api.is_authenticated(),
            user: None,
        });
        let cell = Arc::new(SessionCell {
            state: sender,
            tokens: api.tokens().clone(),
            events_seen: AtomicBool::new(false),
        });

        // subscribe before the check so no change slips between the two
        let mut changes = source.subscribe();

        let listener = {
            let cell = cell.clone();
            tokio::spawn(async move {
                loop {
                    match changes.recv().await {
                        Ok(change) => cell.apply_notification(change.session()),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "auth listener lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let check = {
            let cell = cell.clone();
            tokio::spawn(async move {
                match source.get_session().await {
                    Ok(session) => cell.apply_initial(session.as_ref()),
                    Err(err) => {
                        warn!("initial session check failed: {err}");
                        cell.finish_check();
                    }
                }
            })
        };

        Self {
            api,
            cell,
            state,
            tasks: vec![check, listener],
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// Waits for the first session check (or a notification) to settle.
    pub async fn ready(&self) -> AuthState {
        self.wait_until(|state| !state.loading).await
    }

    pub async fn wait_until(&self, predicate: impl Fn(&AuthState) -> bool) -> AuthState {
        let mut state = self.state.clone();
        match state.wait_for(|s| predicate(s)).await {
            Ok(current) => current.clone(),
            Err(_) => self.state(),
        }
    }

    /// Signs in with email and password. The authenticated state is applied
    /// by the notification listener, possibly after this returns.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ClientError> {
        self.cell.set_loading(true);
        let result = self.api.login(email, password).await;
        self.cell.set_loading(false);
        if let Err(err) = &result {
            warn!("login failed: {err}");
        }
        result.map(|_| ())
    }

    pub fn login_with_google(&self, redirect_to: Option<&str>) -> Result<Url, ClientError> {
        self.api.sign_in_with_google(redirect_to)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.api.logout().await
    }

    /// Stops both tasks and waits for them, releasing the notification subscription.
    pub async fn unmount(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Signup,
    Dashboard,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Self::Login => "/login",
            Self::Signup => "/signup",
            Self::Dashboard => "/",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/login" => Some(Self::Login),
            "/signup" => Some(Self::Signup),
            "/" | "" => Some(Self::Dashboard),
            _ => None,
        }
    }

    fn is_protected(self) -> bool {
        matches!(self, Self::Dashboard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Render(Route),
    Loading,
    Redirect(Route),
}

pub fn guard(state: &AuthState, route: Route) -> RouteDecision {
    if !route.is_protected() || state.authenticated {
        RouteDecision::Render(route)
    } else if state.loading {
        RouteDecision::Loading
    } else {
        RouteDecision::Redirect(Route::Login)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryTokenStore;
    use tokio::sync::Notify;

    struct FakeSource {
        session: Option<Session>,
        gate: Option<Arc<Notify>>,
        events: broadcast::Sender<AuthChange>,
    }

    impl FakeSource {
        fn new(session: Option<Session>) -> Self {
            let (events, _) = broadcast::channel(8);
            Self {
                session,
                gate: None,
                events,
            }
        }
    }

    #[async_trait]
    impl SessionSource for FakeSource {
        async fn get_session(&self) -> Result<Option<Session>, ClientError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(self.session.clone())
        }

        fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
            self.events.subscribe()
        }
    }

    fn session(token: &str, user_id: &str) -> Session {
        Session {
            access_token: token.to_string(),
            refresh_token: None,
            expires_at: None,
            user: User {
                id: user_id.to_string(),
                email: format!("{user_id}@example.com"),
            },
        }
    }

    fn api(tokens: MemoryTokenStore) -> Arc<ApiClient> {
        let tokens: Arc<dyn TokenStore> = Arc::new(tokens);
        let auth = Arc::new(ProviderAuth::via_api("http://127.0.0.1:9/api", tokens.clone()));
        Arc::new(ApiClient::new("http://127.0.0.1:9/api", tokens, auth))
    }

    #[tokio::test]
    async fn no_session_settles_unauthenticated_and_clears_token() {
        let api = api(MemoryTokenStore::with_token("stale"));
        let context = AuthContext::mount(Arc::new(FakeSource::new(None)), api.clone());
        assert!(context.state().authenticated);

        let state = context.ready().await;
        assert!(!state.authenticated);
        assert_eq!(state.user, None);
        assert_eq!(api.tokens().load(), None);
    }

    #[tokio::test]
    async fn existing_session_is_restored() {
        let api = api(MemoryTokenStore::default());
        let source = FakeSource::new(Some(session("tok", "u-1")));
        let context = AuthContext::mount(Arc::new(source), api.clone());

        let state = context.ready().await;
        assert!(state.authenticated);
        assert_eq!(state.user.map(|u| u.id).as_deref(), Some("u-1"));
        assert_eq!(api.tokens().load().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn notifications_drive_the_state() {
        let api = api(MemoryTokenStore::default());
        let source = Arc::new(FakeSource::new(None));
        let context = AuthContext::mount(source.clone(), api.clone());
        context.ready().await;

        source
            .events
            .send(AuthChange::SignedIn(session("tok", "u-2")))
            .unwrap();
        let state = context.wait_until(|s| s.authenticated).await;
        assert_eq!(state.user.map(|u| u.id).as_deref(), Some("u-2"));
        assert_eq!(api.tokens().load().as_deref(), Some("tok"));

        source.events.send(AuthChange::SignedOut).unwrap();
        context.wait_until(|s| !s.authenticated).await;
        assert_eq!(api.tokens().load(), None);
    }

    #[tokio::test]
    async fn notification_wins_over_a_slower_initial_check() {
        let api = api(MemoryTokenStore::default());
        let gate = Arc::new(Notify::new());
        let source = Arc::new(FakeSource {
            gate: Some(gate.clone()),
            ..FakeSource::new(None)
        });
        let context = AuthContext::mount(source.clone(), api.clone());

        source
            .events
            .send(AuthChange::SignedIn(session("fresh", "u-3")))
            .unwrap();
        context.wait_until(|s| s.authenticated).await;

        // the check now resolves with no session; it must not undo the sign-in
        gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let state = context.state();
        assert!(state.authenticated);
        assert!(!state.loading);
        assert_eq!(api.tokens().load().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn identical_state_does_not_notify() {
        let api = api(MemoryTokenStore::default());
        let source = Arc::new(FakeSource::new(None));
        let context = AuthContext::mount(source.clone(), api);
        context.ready().await;

        let mut states = context.subscribe();
        states.borrow_and_update();
        source.events.send(AuthChange::SignedOut).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn unmount_releases_the_subscription() {
        let source = Arc::new(FakeSource::new(None));
        let context = AuthContext::mount(source.clone(), api(MemoryTokenStore::default()));
        assert_eq!(source.events.receiver_count(), 1);

        context.unmount().await;
        assert_eq!(source.events.receiver_count(), 0);
    }

    #[test]
    fn dashboard_is_guarded() {
        let loading = AuthState {
            loading: true,
            authenticated: false,
            user: None,
        };
        let signed_out = AuthState {
            loading: false,
            ..loading.clone()
        };
        let signed_in = AuthState {
            authenticated: true,
            ..signed_out.clone()
        };

        assert_eq!(guard(&loading, Route::Dashboard), RouteDecision::Loading);
        assert_eq!(
            guard(&signed_out, Route::Dashboard),
            RouteDecision::Redirect(Route::Login)
        );
        assert_eq!(
            guard(&signed_in, Route::Dashboard),
            RouteDecision::Render(Route::Dashboard)
        );
        assert_eq!(
            guard(&signed_out, Route::Signup),
            RouteDecision::Render(Route::Signup)
        );
        assert_eq!(Route::from_path("/login"), Some(Route::Login));
        assert_eq!(Route::Dashboard.path(), "/");
    }
}
