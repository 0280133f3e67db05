//! Token lifecycle for one tenant.
//!
//! Responsibilities:
//! - Seed the in-memory token from the [`SecureStore`] on start-up.
//! - Hand out the cached access token while it is fresh, with no I/O.
//! - Refresh a stale token, falling back to interactive sign-in when the
//!   refresh fails.
//! - Single-flight the slow path so concurrent callers share one exchange.
//! - Publish an `is_authenticated` flag to observers.
use crate::entra::{self, EntraEndpoints};
use crate::pkce::{self, Pkce};
use async_trait::async_trait;
use bcconnect_types::{
    ApiError, AuthorizationCodeSource, Clock, HttpRequest, HttpTransport, SecureStore,
    ServiceError, SystemClock, Token, TokenProvider, TokenState, traits::Result,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Secure-store key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Secure-store key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Secure-store key of the expiry, unix seconds as decimal text.
pub const EXPIRES_AT_KEY: &str = "expires_at";

pub struct TokenStore {
    endpoints: EntraEndpoints,
    http: Arc<dyn HttpTransport>,
    secure: Arc<dyn SecureStore>,
    code_source: Arc<dyn AuthorizationCodeSource>,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Token>>,
    /// Held for the whole refresh / sign-in exchange.
    gate: tokio::sync::Mutex<()>,
    /// Outcome of the last exchange run through `get_access_token`.
    last_flight: Mutex<Flight>,
    authenticated: watch::Sender<bool>,
}

/// Numbered result of one slow-path exchange. Callers that queued on the gate
/// while it ran adopt its failure instead of repeating it.
#[derive(Default)]
struct Flight {
    generation: u64,
    failure: Option<ApiError>,
}

impl TokenStore {
    /// Creates a store with nothing cached. Call [`Self::load_persisted`]
    /// (or use [`Self::load`]) to pick up credentials from a previous run.
    pub fn new(
        endpoints: EntraEndpoints,
        http: Arc<dyn HttpTransport>,
        secure: Arc<dyn SecureStore>,
        code_source: Arc<dyn AuthorizationCodeSource>,
    ) -> Self {
        let (authenticated, _) = watch::channel(false);
        Self {
            endpoints,
            http,
            secure,
            code_source,
            clock: Arc::new(SystemClock),
            current: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
            last_flight: Mutex::new(Flight::default()),
            authenticated,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// [`Self::new`] followed by [`Self::load_persisted`].
    pub async fn load(
        endpoints: EntraEndpoints,
        http: Arc<dyn HttpTransport>,
        secure: Arc<dyn SecureStore>,
        code_source: Arc<dyn AuthorizationCodeSource>,
    ) -> Self {
        let store = Self::new(endpoints, http, secure, code_source);
        store.load_persisted().await;
        store
    }

    /// Seed memory from the secure store.
    ///
    /// A missing or unreadable field leaves the store unauthenticated; this
    /// never fails.
    pub async fn load_persisted(&self) {
        let token = match self.read_persisted().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read persisted credentials");
                None
            }
        };
        let usable = token
            .as_ref()
            .is_some_and(|t| t.state_at(self.clock.now()) != TokenState::Invalid);
        tracing::debug!(found = token.is_some(), usable, "persisted credentials loaded");
        *self.lock() = token;
        self.authenticated.send_replace(usable);
    }

    async fn read_persisted(&self) -> Result<Option<Token>> {
        let access = self.secure.get(ACCESS_TOKEN_KEY).await?;
        let expires = self.secure.get(EXPIRES_AT_KEY).await?;
        let refresh = self.secure.get(REFRESH_TOKEN_KEY).await?;

        let (Some(access_token), Some(expires)) = (access, expires) else {
            return Ok(None);
        };
        let Ok(expires_at) = expires.trim().parse::<u64>() else {
            tracing::warn!(value = %expires, "ignoring persisted token with malformed expiry");
            return Ok(None);
        };
        Ok(Some(Token {
            access_token,
            refresh_token: refresh.filter(|r| !r.is_empty()),
            expires_at,
        }))
    }

    /// Return a valid access token, refreshing or signing in as needed.
    ///
    /// # Errors
    ///
    /// Returns the error of the interactive sign-in when both the refresh
    /// (if any) and the sign-in fail. A failed refresh alone is not surfaced.
    /// Callers that waited on an exchange which failed get that same error
    /// without starting another one.
    pub async fn get_access_token(&self) -> Result<String> {
        let seen = self.flight().generation;
        if let Some(access) = self.fresh_access_token() {
            return Ok(access);
        }

        let _gate = self.gate.lock().await;
        // Another caller may have finished an exchange while we waited.
        if let Some(access) = self.fresh_access_token() {
            return Ok(access);
        }
        {
            let flight = self.flight();
            if flight.generation != seen
                && let Some(failure) = &flight.failure
            {
                return Err(failure.clone());
            }
        }

        let result = self.refresh_or_authenticate().await;
        self.record_flight(result.as_ref().err());
        result
    }

    async fn refresh_or_authenticate(&self) -> Result<String> {
        let refresh_token = self.lock().as_ref().and_then(|t| t.refresh_token.clone());
        if let Some(refresh_token) = refresh_token {
            match self.refresh_locked(&refresh_token).await {
                Ok(token) => return Ok(token.access_token),
                Err(e) => {
                    tracing::warn!(error = %e, "token refresh failed, falling back to sign-in");
                    if matches!(e, ApiError::Unauthenticated { .. }) {
                        self.discard_refresh_token(&refresh_token).await;
                    }
                }
            }
        }

        self.authenticate_locked()
            .await
            .map(|token| token.access_token)
    }

    /// Run the full authorization-code flow and store the result.
    ///
    /// # Errors
    ///
    /// [`ApiError::Unauthenticated`] for a rejected sign-in or token request,
    /// [`ApiError::Transport`] if the token endpoint is unreachable,
    /// [`ApiError::DecodeFailure`] for an unexpected token response.
    pub async fn authenticate(&self) -> Result<Token> {
        let _gate = self.gate.lock().await;
        let result = self.authenticate_locked().await;
        self.record_flight(result.as_ref().err());
        result
    }

    /// Exchange `refresh_token` for a new token and store the result.
    ///
    /// # Errors
    ///
    /// Same as [`Self::authenticate`], minus the interactive part.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let _gate = self.gate.lock().await;
        self.refresh_locked(refresh_token).await
    }

    /// Forget every credential, in memory and in the secure store.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Storage`] if the secure store cannot delete a key.
    /// Memory is cleared regardless.
    pub async fn logout(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        *self.lock() = None;
        self.authenticated.send_replace(false);
        tracing::info!("signed out");

        self.secure.delete(ACCESS_TOKEN_KEY).await?;
        self.secure.delete(REFRESH_TOKEN_KEY).await?;
        self.secure.delete(EXPIRES_AT_KEY).await?;
        Ok(())
    }

    /// Current value of the authenticated flag.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    /// Observe changes of the authenticated flag.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    /// Snapshot of the cached token, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<Token> {
        self.lock().clone()
    }

    /// Authorize URL for a given `state` and PKCE challenge.
    #[must_use]
    pub fn authorize_url(&self, state: &str, code_challenge: &str) -> String {
        self.endpoints.authorize_url(state, code_challenge)
    }

    // ── Internals (callers hold `gate`) ───────────────────────────────────

    async fn authenticate_locked(&self) -> Result<Token> {
        let pkce = Pkce::generate();
        let state = pkce::random_state();
        let url = self.endpoints.authorize_url(&state, &pkce.challenge);

        tracing::info!("starting interactive sign-in");
        let result = async {
            let params = self.code_source.authorize(&url).await?;
            let code = entra::code_from_callback(&params, &state)?;
            let form = self.endpoints.authorization_code_form(&code, &pkce.verifier);
            self.exchange(&form).await
        }
        .await;

        match result {
            Ok(token) => {
                tracing::info!(expires_at = token.expires_at, "signed in");
                self.install(token.clone()).await;
                Ok(token)
            }
            Err(e) => {
                self.authenticated.send_replace(false);
                Err(e)
            }
        }
    }

    async fn refresh_locked(&self, refresh_token: &str) -> Result<Token> {
        tracing::debug!("refreshing access token");
        let form = self.endpoints.refresh_form(refresh_token);
        let token = self.exchange(&form).await?;
        tracing::debug!(expires_at = token.expires_at, "access token refreshed");
        self.install(token.clone()).await;
        Ok(token)
    }

    /// POST a grant to the token endpoint.
    async fn exchange(&self, form: &[(&'static str, String)]) -> Result<Token> {
        let pairs: Vec<(&str, &str)> = form.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let request = HttpRequest::post_form(self.endpoints.token_url(), &pairs)?
            .header("Accept", "application/json");

        let response = self.http.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::Unauthenticated {
                status: Some(response.status),
                detail: ServiceError::from_body(&response.body),
            });
        }
        entra::parse_token_response(&response.body, self.clock.now())
    }

    /// Replace the cached token wholesale and persist it.
    ///
    /// A token without a refresh token removes any previously stored one.
    async fn install(&self, token: Token) {
        *self.lock() = Some(token.clone());
        self.authenticated.send_replace(true);
        if let Err(e) = self.persist(&token).await {
            tracing::warn!(error = %e, "cannot persist credentials, keeping them in memory only");
        }
    }

    async fn persist(&self, token: &Token) -> Result<()> {
        self.secure.set(ACCESS_TOKEN_KEY, &token.access_token).await?;
        self.secure
            .set(EXPIRES_AT_KEY, &token.expires_at.to_string())
            .await?;
        match &token.refresh_token {
            Some(refresh) => self.secure.set(REFRESH_TOKEN_KEY, refresh).await,
            None => self.secure.delete(REFRESH_TOKEN_KEY).await,
        }
    }

    /// Forget a refresh token the token endpoint rejected, unless it was
    /// already replaced.
    async fn discard_refresh_token(&self, rejected: &str) {
        {
            let mut current = self.lock();
            match current.as_mut() {
                Some(token) if token.refresh_token.as_deref() == Some(rejected) => {
                    token.refresh_token = None;
                }
                _ => return,
            }
        }
        if let Err(e) = self.secure.delete(REFRESH_TOKEN_KEY).await {
            tracing::warn!(error = %e, "cannot remove rejected refresh token");
        }
    }

    fn record_flight(&self, failure: Option<&ApiError>) {
        let mut flight = self.flight();
        flight.generation += 1;
        flight.failure = failure.cloned();
    }

    fn flight(&self) -> MutexGuard<'_, Flight> {
        self.last_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fresh_access_token(&self) -> Option<String> {
        let now = self.clock.now();
        self.lock()
            .as_ref()
            .filter(|t| t.is_fresh_at(now))
            .map(|t| t.access_token.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Token>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenProvider for TokenStore {
    async fn access_token(&self) -> Result<String> {
        self.get_access_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcconnect_store::InMemorySecureStore;
    use bcconnect_types::{CallbackParams, HttpResponse, ManualClock, TenantContext};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: u64 = 1_700_000_000;

    // ── Fakes ─────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HttpResponse>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn reply(&self, status: u16, body: &str) {
            self.replies.lock().unwrap().push_back(Ok(HttpResponse {
                status,
                body: Bytes::from(body.to_string()),
            }));
        }

        fn fail(&self, msg: &str) {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(ApiError::Transport(msg.to_string())));
        }

        fn grants(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| {
                    let body = r.body.clone().unwrap_or_default();
                    let form: Vec<(String, String)> = serde_urlencoded::from_bytes(&body).unwrap();
                    form.into_iter()
                        .find(|(k, _)| k == "grant_type")
                        .map(|(_, v)| v)
                        .unwrap()
                })
                .collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            // Let concurrent callers pile up on the gate.
            tokio::task::yield_now().await;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Transport("no scripted reply".into())))
        }
    }

    /// Echoes the `state` from the authorize URL back with a fixed code.
    #[derive(Default)]
    struct EchoCodeSource {
        calls: AtomicUsize,
        deny: bool,
    }

    #[async_trait]
    impl AuthorizationCodeSource for EchoCodeSource {
        async fn authorize(&self, authorize_url: &str) -> Result<CallbackParams> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let url = url::Url::parse(authorize_url).unwrap();
            let mut params: CallbackParams = CallbackParams::new();
            if self.deny {
                params.insert("error".into(), "access_denied".into());
                return Ok(params);
            }
            let state = url
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap();
            params.insert("state".into(), state);
            params.insert("code".into(), "auth-code".into());
            Ok(params)
        }
    }

    struct Harness {
        http: Arc<ScriptedTransport>,
        secure: Arc<InMemorySecureStore>,
        codes: Arc<EchoCodeSource>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_codes(EchoCodeSource::default())
        }

        fn with_codes(codes: EchoCodeSource) -> Self {
            Self {
                http: Arc::new(ScriptedTransport::default()),
                secure: Arc::new(InMemorySecureStore::new()),
                codes: Arc::new(codes),
                clock: Arc::new(ManualClock::new(T0)),
            }
        }

        fn store(&self) -> TokenStore {
            let tenant = TenantContext {
                tenant_id: "contoso".into(),
                environment: "Production".into(),
                client_id: "app".into(),
                ..TenantContext::default()
            };
            let endpoints =
                EntraEndpoints::new(entra::DEFAULT_AUTH_BASE, &tenant, "scope offline_access")
                    .unwrap();
            TokenStore::new(
                endpoints,
                self.http.clone(),
                self.secure.clone(),
                self.codes.clone(),
            )
            .with_clock(self.clock.clone())
        }

        async fn seed(&self, access: &str, refresh: Option<&str>, expires_at: u64) {
            self.secure.set(ACCESS_TOKEN_KEY, access).await.unwrap();
            self.secure
                .set(EXPIRES_AT_KEY, &expires_at.to_string())
                .await
                .unwrap();
            if let Some(r) = refresh {
                self.secure.set(REFRESH_TOKEN_KEY, r).await.unwrap();
            }
        }

        fn sign_ins(&self) -> usize {
            self.codes.calls.load(Ordering::SeqCst)
        }
    }

    fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> String {
        match refresh {
            Some(r) => format!(
                r#"{{"access_token":"{access}","token_type":"Bearer","expires_in":{expires_in},"refresh_token":"{r}"}}"#
            ),
            None => format!(
                r#"{{"access_token":"{access}","token_type":"Bearer","expires_in":{expires_in}}}"#
            ),
        }
    }

    // ── Tests ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_fresh_token_needs_no_network() {
        let h = Harness::new();
        h.seed("cached", Some("r"), T0 + 1).await;
        let store = h.store();
        store.load_persisted().await;

        assert_eq!(store.get_access_token().await.unwrap(), "cached");
        assert!(h.http.requests.lock().unwrap().is_empty());
        assert_eq!(h.sign_ins(), 0);
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_expiry_scenario_before_and_after_t0() {
        let h = Harness::new();
        h.seed("old", Some("r1"), T0).await;
        h.clock.set(T0 - 1);
        let store = h.store();
        store.load_persisted().await;

        assert_eq!(store.get_access_token().await.unwrap(), "old");
        assert!(h.http.requests.lock().unwrap().is_empty());

        h.clock.set(T0 + 1);
        h.http.reply(200, &token_body("new", Some("r2"), 3600));
        assert_eq!(store.get_access_token().await.unwrap(), "new");
        assert_eq!(h.http.grants(), vec!["refresh_token"]);
        assert_eq!(store.current_token().unwrap().expires_at, T0 + 1 + 3600);
        assert_eq!(h.sign_ins(), 0);

        // Persisted copy was replaced too.
        assert_eq!(h.secure.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(), Some("new"));
        assert_eq!(h.secure.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_refresh_sends_stored_refresh_token() {
        let h = Harness::new();
        h.seed("old", Some("the-refresh"), T0 - 10).await;
        let store = h.store();
        store.load_persisted().await;
        h.http.reply(200, &token_body("new", Some("r2"), 60));

        store.get_access_token().await.unwrap();
        let req = h.http.requests.lock().unwrap()[0].clone();
        assert_eq!(
            req.url,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        let form: Vec<(String, String)> =
            serde_urlencoded::from_bytes(&req.body.unwrap()).unwrap();
        assert!(form.contains(&("refresh_token".into(), "the-refresh".into())));
        assert!(form.contains(&("client_id".into(), "app".into())));
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_one_sign_in() {
        let h = Harness::new();
        h.seed("old", Some("revoked"), T0 - 10).await;
        let store = h.store();
        store.load_persisted().await;

        h.http.reply(400, r#"{"error":"invalid_grant","error_description":"revoked"}"#);
        h.http.reply(200, &token_body("fresh", Some("r2"), 3600));

        assert_eq!(store.get_access_token().await.unwrap(), "fresh");
        assert_eq!(h.http.grants(), vec!["refresh_token", "authorization_code"]);
        assert_eq!(h.sign_ins(), 1);
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_also_falls_back() {
        let h = Harness::new();
        h.seed("old", Some("r"), T0 - 10).await;
        let store = h.store();
        store.load_persisted().await;

        h.http.fail("connection reset");
        h.http.reply(200, &token_body("fresh", None, 3600));

        assert_eq!(store.get_access_token().await.unwrap(), "fresh");
        assert_eq!(h.sign_ins(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_and_sign_in_surfaces_unauthenticated() {
        let h = Harness::new();
        h.seed("old", Some("revoked"), T0 - 10).await;
        let store = h.store();
        store.load_persisted().await;

        h.http.reply(400, r#"{"error":"invalid_grant"}"#);
        h.http.reply(401, r#"{"error":"invalid_client","error_description":"bad secret"}"#);

        match store.get_access_token().await.unwrap_err() {
            ApiError::Unauthenticated { status, detail } => {
                assert_eq!(status, Some(401));
                assert_eq!(detail.code.as_deref(), Some("invalid_client"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.sign_ins(), 1);
        assert_eq!(h.http.grants().len(), 2);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_discards_old_one() {
        let h = Harness::new();
        h.seed("old", Some("r1"), T0 - 10).await;
        let store = h.store();
        store.load_persisted().await;

        h.http.reply(200, &token_body("new", None, 60));
        store.get_access_token().await.unwrap();
        assert!(store.current_token().unwrap().refresh_token.is_none());
        assert!(h.secure.get(REFRESH_TOKEN_KEY).await.unwrap().is_none());

        // Without a refresh token the next expiry always signs in again.
        h.clock.advance(61);
        h.http.reply(200, &token_body("again", None, 60));
        assert_eq!(store.get_access_token().await.unwrap(), "again");
        assert_eq!(h.http.grants(), vec!["refresh_token", "authorization_code"]);
        assert_eq!(h.sign_ins(), 1);
    }

    #[tokio::test]
    async fn test_logout_then_get_signs_in_without_refresh() {
        let h = Harness::new();
        h.seed("old", Some("r1"), T0 + 100).await;
        let store = h.store();
        store.load_persisted().await;
        let mut flag = store.subscribe();
        assert!(*flag.borrow_and_update());

        store.logout().await.unwrap();
        assert!(h.secure.is_empty());
        assert!(store.current_token().is_none());
        assert!(flag.has_changed().unwrap());
        assert!(!*flag.borrow_and_update());

        h.http.reply(200, &token_body("after", Some("r2"), 3600));
        assert_eq!(store.get_access_token().await.unwrap(), "after");
        assert_eq!(h.http.grants(), vec!["authorization_code"]);
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_in_denied_by_user() {
        let h = Harness::with_codes(EchoCodeSource {
            deny: true,
            ..EchoCodeSource::default()
        });
        let store = h.store();
        match store.get_access_token().await.unwrap_err() {
            ApiError::Unauthenticated { detail, .. } => {
                assert_eq!(detail.code.as_deref(), Some("access_denied"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(h.http.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_transport_failure() {
        let h = Harness::new();
        let store = h.store();
        h.http.fail("dns failure");
        assert!(matches!(
            store.authenticate().await.unwrap_err(),
            ApiError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_undecodable_token_response() {
        let h = Harness::new();
        let store = h.store();
        h.http.reply(200, "<html>proxy login</html>");
        assert!(matches!(
            store.authenticate().await.unwrap_err(),
            ApiError::DecodeFailure(_)
        ));
        assert!(store.current_token().is_none());
    }

    #[tokio::test]
    async fn test_load_persisted_partial_state_is_unauthenticated() {
        let h = Harness::new();
        h.secure.set(ACCESS_TOKEN_KEY, "orphan").await.unwrap();
        let store = h.store();
        store.load_persisted().await;
        assert!(store.current_token().is_none());
        assert!(!store.is_authenticated());

        h.secure.set(EXPIRES_AT_KEY, "not-a-number").await.unwrap();
        store.load_persisted().await;
        assert!(store.current_token().is_none());
    }

    #[tokio::test]
    async fn test_load_persisted_expired_without_refresh_is_not_authenticated() {
        let h = Harness::new();
        h.seed("old", None, T0 - 1).await;
        let store = h.store();
        store.load_persisted().await;
        assert!(store.current_token().is_some());
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let h = Harness::new();
        h.seed("old", Some("r1"), T0 - 10).await;
        let store = Arc::new(h.store());
        store.load_persisted().await;
        h.http.reply(200, &token_body("shared", Some("r2"), 3600));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get_access_token().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(h.http.grants(), vec!["refresh_token"]);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failed_exchange() {
        let h = Harness::new();
        h.seed("old", Some("revoked"), T0 - 10).await;
        let store = Arc::new(h.store());
        store.load_persisted().await;
        h.http.reply(400, r#"{"error":"invalid_grant"}"#);
        h.http.reply(401, r#"{"error":"invalid_client"}"#);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get_access_token().await })
            })
            .collect();
        for task in tasks {
            match task.await.unwrap().unwrap_err() {
                ApiError::Unauthenticated { status, .. } => assert_eq!(status, Some(401)),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(h.http.grants(), vec!["refresh_token", "authorization_code"]);
        assert_eq!(h.sign_ins(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_token_is_not_retried() {
        let h = Harness::new();
        h.seed("old", Some("revoked"), T0 - 10).await;
        let store = h.store();
        store.load_persisted().await;
        h.http.reply(400, r#"{"error":"invalid_grant"}"#);
        h.http.fail("connection reset");
        store.get_access_token().await.unwrap_err();

        assert!(store.current_token().unwrap().refresh_token.is_none());
        assert!(h.secure.get(REFRESH_TOKEN_KEY).await.unwrap().is_none());

        // A later call goes straight to sign-in.
        h.http.reply(200, &token_body("new", Some("r2"), 3600));
        assert_eq!(store.get_access_token().await.unwrap(), "new");
        assert_eq!(
            h.http.grants(),
            vec!["refresh_token", "authorization_code", "authorization_code"]
        );
        assert_eq!(h.sign_ins(), 2);
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_keeps_refresh_token() {
        let h = Harness::new();
        h.seed("old", Some("r1"), T0 - 10).await;
        let store = h.store();
        store.load_persisted().await;
        h.http.fail("dns failure");
        h.http.fail("dns failure");
        store.get_access_token().await.unwrap_err();

        assert_eq!(store.current_token().unwrap().refresh_token.as_deref(), Some("r1"));
        assert_eq!(h.secure.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_cancelled_refresh_leaves_state_intact() {
        let h = Harness::new();
        h.seed("old", Some("r1"), T0 - 10).await;
        let store = h.store();
        store.load_persisted().await;
        h.http.reply(200, &token_body("new", Some("r2"), 3600));

        // Drop the call at its first suspension point inside the transport.
        let fut = store.get_access_token();
        tokio::pin!(fut);
        assert!(futures_util::poll!(fut.as_mut()).is_pending());
        drop(fut);

        let tok = store.current_token().unwrap();
        assert_eq!(tok.access_token, "old");
        assert_eq!(tok.refresh_token.as_deref(), Some("r1"));
        // The gate was released with the dropped future.
        h.http.reply(200, &token_body("new", Some("r2"), 3600));
        assert_eq!(store.get_access_token().await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_token_provider_impl() {
        let h = Harness::new();
        h.seed("cached", None, T0 + 60).await;
        let store = h.store();
        store.load_persisted().await;
        let provider: Arc<dyn TokenProvider> = Arc::new(store);
        assert_eq!(provider.access_token().await.unwrap(), "cached");
    }
}
