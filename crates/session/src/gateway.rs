//! Session gateway: authenticated dispatch with single-flight token refresh

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, RefreshError};
use crate::events::{ListenerId, SESSION_EXPIRED_MESSAGE, SessionEvent, SessionEvents};
use crate::request::{ApiRequest, Dispatch};
use crate::store::{CredentialStore, FileStore, keys};
use crate::types::{ApiEnvelope, CODE_SUCCESS, CODE_UNAUTHORIZED, TokenPair};

/// Path of the refresh-token exchange
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Authentication sub-state of the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No refresh exchange in flight
    Idle,
    /// Exactly one refresh exchange in flight
    Refreshing,
}

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

/// Flag, queue and epoch guarded together so that claiming the refresh,
/// enqueueing behind it and draining it are each one atomic step.
#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queue: VecDeque<Waiter>,
    /// Bumped by every logout. A refresh started in an older epoch must not
    /// write its outcome into the current session.
    epoch: u64,
}

/// Releases the refresh claim if the leading request is dropped mid-exchange,
/// so queued requests fail instead of waiting forever.
struct LeaderGuard<'a> {
    state: &'a Mutex<RefreshState>,
    epoch: u64,
    settled: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.epoch != self.epoch || !state.refreshing {
            return;
        }
        state.refreshing = false;
        let rejected = state.queue.len();
        for waiter in state.queue.drain(..) {
            let _ = waiter.send(Err(RefreshError::Abandoned));
        }
        warn!(rejected, "Refresh abandoned by its caller");
    }
}

enum Claim {
    Leader { epoch: u64 },
    Follower(oneshot::Receiver<Result<String, RefreshError>>),
}

/// Successful backend reply
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub envelope: ApiEnvelope,
}

impl ApiResponse {
    /// Deserialize the envelope payload
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, GatewayError> {
        self.envelope.into_data()
    }
}

/// A response read to completion, before classification
struct RawResponse {
    status: StatusCode,
    body: Bytes,
    envelope: Result<ApiEnvelope, serde_json::Error>,
}

impl RawResponse {
    async fn read(response: reqwest::Response) -> Result<Self, GatewayError> {
        let status = response.status();
        let body = response.bytes().await?;
        let envelope = serde_json::from_slice::<ApiEnvelope>(&body);
        Ok(Self {
            status,
            body,
            envelope,
        })
    }

    fn is_auth_failure(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
            || self
                .envelope
                .as_ref()
                .is_ok_and(|envelope| envelope.code == CODE_UNAUTHORIZED)
    }

    fn message(&self) -> String {
        match &self.envelope {
            Ok(envelope) => envelope.message_or_default(),
            Err(_) if self.body.is_empty() => self
                .status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
            Err(_) => String::from_utf8_lossy(&self.body).into_owned(),
        }
    }

    fn into_authentication_error(self) -> GatewayError {
        GatewayError::Authentication {
            message: self.message(),
        }
    }

    fn into_response(self) -> Result<ApiResponse, GatewayError> {
        let message = self.message();
        let status = self.status;
        match self.envelope {
            Ok(envelope) if status.is_success() && envelope.code == CODE_SUCCESS => {
                Ok(ApiResponse { status, envelope })
            }
            Ok(envelope) => Err(GatewayError::Application {
                code: envelope.code,
                message,
            }),
            Err(e) if status.is_success() => Err(GatewayError::Serialization(e)),
            Err(_) => Err(GatewayError::Application {
                code: i32::from(status.as_u16()),
                message,
            }),
        }
    }
}

/// Uniform request surface for every screen of the application.
///
/// Attaches the stored access token, and on a 401 performs at most one
/// refresh exchange for any number of concurrently failing requests before
/// replaying each of them once. Share it as `Arc<SessionGateway>`.
pub struct SessionGateway {
    client: Client,
    base_url: String,
    auth_scheme: Option<String>,
    store: Arc<dyn CredentialStore>,
    events: SessionEvents,
    default_authorization: RwLock<Option<String>>,
    refresh: Mutex<RefreshState>,
}

impl std::fmt::Debug for SessionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGateway")
            .field("base_url", &self.base_url)
            .field("auth_state", &self.auth_state())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

impl SessionGateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The durable store behind this gateway
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn auth_state(&self) -> AuthState {
        if self.lock_refresh().refreshing {
            AuthState::Refreshing
        } else {
            AuthState::Idle
        }
    }

    /// Number of requests waiting on the in-flight refresh
    pub fn pending_requests(&self) -> usize {
        self.lock_refresh().queue.len()
    }

    /// Register a session event listener
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Issue a request, transparently recovering from an expired access token.
    ///
    /// Returns the reply only when the envelope code is 200. Transport and
    /// application failures come back unchanged and are never retried; a 401
    /// is retried once after a refresh.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, GatewayError> {
        let mut dispatch = Dispatch::new(request);
        let mut token = self.current_access_token();

        loop {
            let raw = self.send(&dispatch.request, token.as_deref()).await?;
            if !raw.is_auth_failure() {
                return raw.into_response();
            }

            if dispatch.retried {
                warn!(
                    method = %dispatch.request.method,
                    path = %dispatch.request.path,
                    "Request rejected again after refresh"
                );
                return Err(raw.into_authentication_error());
            }

            dispatch.retried = true;
            token = Some(self.refresh_single_flight().await?);
            debug!(
                method = %dispatch.request.method,
                path = %dispatch.request.path,
                "Replaying request with refreshed token"
            );
        }
    }

    /// `GET` and deserialize the envelope data
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.request(ApiRequest::get(path)).await?.into_data()
    }

    /// `POST` a JSON body and deserialize the envelope data
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(ApiRequest::post(path).json(body)?)
            .await?
            .into_data()
    }

    /// `PUT` a JSON body and deserialize the envelope data
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(ApiRequest::put(path).json(body)?)
            .await?
            .into_data()
    }

    /// `DELETE` and deserialize the envelope data
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.request(ApiRequest::delete(path)).await?.into_data()
    }

    /// End the session.
    ///
    /// Clears stored credentials, abandons any in-flight refresh, rejects
    /// queued requests and notifies listeners with [`SessionEvent::Logout`].
    /// Safe to call when already logged out.
    pub fn logout(&self) {
        let rejected = {
            let mut state = self.lock_refresh();
            state.epoch = state.epoch.wrapping_add(1);
            state.refreshing = false;
            let rejected = state.queue.len();
            for waiter in state.queue.drain(..) {
                let _ = waiter.send(Err(RefreshError::LoggedOut));
            }
            rejected
        };
        if rejected > 0 {
            debug!(rejected, "Rejected queued requests on logout");
        }

        self.clear_credentials();
        info!("Session logged out");
        self.events.emit(&SessionEvent::Logout);
    }

    /// Persist a freshly issued credential pair
    pub(crate) fn store_tokens(&self, pair: &TokenPair) -> Result<(), crate::store::StoreError> {
        self.store.set(keys::ACCESS_TOKEN, &pair.access_token)?;
        self.store.set(keys::REFRESH_TOKEN, &pair.refresh_token)?;
        *self
            .default_authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(pair.access_token.clone());
        Ok(())
    }

    fn lock_refresh(&self) -> MutexGuard<'_, RefreshState> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_access_token(&self) -> Option<String> {
        self.store.get(keys::ACCESS_TOKEN).or_else(|| {
            self.default_authorization
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    fn authorization_value(&self, token: &str) -> Result<HeaderValue, GatewayError> {
        let raw = match &self.auth_scheme {
            Some(scheme) => format!("{scheme} {token}"),
            None => token.to_string(),
        };
        let mut value = HeaderValue::from_str(&raw)?;
        value.set_sensitive(true);
        Ok(value)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<RawResponse, GatewayError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, self.authorization_value(token)?);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            authorized = token.is_some(),
            "Dispatching request"
        );
        let response = builder.send().await?;
        RawResponse::read(response).await
    }

    /// Obtain a fresh access token, joining the in-flight refresh if any
    async fn refresh_single_flight(&self) -> Result<String, GatewayError> {
        let claim = {
            let mut state = self.lock_refresh();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(tx);
                Claim::Follower(rx)
            } else {
                state.refreshing = true;
                Claim::Leader { epoch: state.epoch }
            }
        };

        match claim {
            Claim::Follower(rx) => match rx.await {
                Ok(Ok(token)) => Ok(token),
                Ok(Err(RefreshError::LoggedOut)) | Err(_) => Err(GatewayError::SessionEnded),
                Ok(Err(e)) => Err(GatewayError::Refresh(e)),
            },
            Claim::Leader { epoch } => self.lead_refresh(epoch).await,
        }
    }

    async fn lead_refresh(&self, epoch: u64) -> Result<String, GatewayError> {
        info!("Access token rejected, refreshing session");
        let mut guard = LeaderGuard {
            state: &self.refresh,
            epoch,
            settled: false,
        };
        let exchanged = self.exchange_refresh_token().await;
        guard.settled = true;

        if self.lock_refresh().epoch != epoch {
            debug!("Discarding refresh outcome from an ended session");
            return Err(GatewayError::SessionEnded);
        }

        // Store I/O happens outside the refresh lock
        let outcome = exchanged.and_then(|pair| {
            self.store_tokens(&pair)
                .map_err(|e| RefreshError::Store(e.to_string()))?;
            Ok(pair.access_token)
        });
        if outcome.is_err() {
            self.clear_credentials();
        }

        let current = {
            let mut state = self.lock_refresh();
            if state.epoch == epoch {
                for waiter in state.queue.drain(..) {
                    let _ = waiter.send(outcome.clone());
                }
                state.refreshing = false;
                true
            } else {
                false
            }
        };

        if !current {
            // a logout landed while the new pair was being written
            if let Ok(token) = &outcome {
                self.clear_credentials_if_current(token);
            }
            debug!("Discarding refresh outcome from an ended session");
            return Err(GatewayError::SessionEnded);
        }

        match outcome {
            Ok(token) => {
                info!("Session refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed, logging out");
                self.events.emit(&SessionEvent::AuthError {
                    message: SESSION_EXPIRED_MESSAGE.to_string(),
                });
                Err(GatewayError::Refresh(e))
            }
        }
    }

    /// The refresh call itself bypasses the interception pipeline
    async fn exchange_refresh_token(&self) -> Result<TokenPair, RefreshError> {
        let refresh_token = self
            .store
            .get(keys::REFRESH_TOKEN)
            .ok_or(RefreshError::MissingRefreshToken)?;

        let response = self
            .client
            .get(self.url(REFRESH_PATH))
            .query(&[("refreshToken", refresh_token.as_str())])
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let envelope = match serde_json::from_slice::<ApiEnvelope<TokenPair>>(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(RefreshError::Rejected {
                    code: i32::from(status.as_u16()),
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Err(e) => return Err(RefreshError::Malformed(e.to_string())),
        };

        if !status.is_success() || envelope.code != CODE_SUCCESS {
            return Err(RefreshError::Rejected {
                code: envelope.code,
                message: envelope.message_or_default(),
            });
        }

        match envelope.data {
            Some(pair) if !pair.access_token.is_empty() && !pair.refresh_token.is_empty() => {
                Ok(pair)
            }
            _ => Err(RefreshError::Malformed("missing token pair".into())),
        }
    }

    /// Undo a pair written by a refresh that lost the race with a logout,
    /// unless a newer login has replaced it since.
    fn clear_credentials_if_current(&self, access_token: &str) {
        if self.store.get(keys::ACCESS_TOKEN).as_deref() == Some(access_token) {
            self.clear_credentials();
        }
    }

    /// Remove the credential pair, session identity and default header.
    /// Store failures are logged; a half-cleared session must not block logout.
    fn clear_credentials(&self) {
        for key in [
            keys::ACCESS_TOKEN,
            keys::REFRESH_TOKEN,
            keys::USERNAME,
            keys::USER_ROLE,
        ] {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %e, "Failed to clear credential");
            }
        }
        *self
            .default_authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Builder for [`SessionGateway`]
#[derive(Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    timeout: Option<Duration>,
    store: Option<Arc<dyn CredentialStore>>,
}

impl GatewayBuilder {
    /// Replace the whole configuration
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the request timeout, overriding `timeout_secs`.
    /// A zero duration disables it.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Prefix the access token with a scheme such as `Bearer`
    #[must_use]
    pub fn auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.auth_scheme = Some(scheme.into());
        self
    }

    /// Use the given credential store instead of the default file store
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the gateway
    pub fn build(self) -> Result<SessionGateway, GatewayError> {
        let base_url = self.config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(GatewayError::Configuration("base_url is required".into()));
        }
        let parsed = Url::parse(&base_url)
            .map_err(|e| GatewayError::Configuration(format!("invalid base_url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::Configuration(format!(
                "unsupported base_url scheme: {}",
                parsed.scheme()
            )));
        }

        let mut client_builder = ClientBuilder::new().user_agent(self.config.user_agent.clone());
        let timeout = self.timeout.unwrap_or_else(|| self.config.timeout());
        if !timeout.is_zero() {
            client_builder = client_builder.timeout(timeout);
        }
        let client = client_builder.build()?;

        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileStore::open(self.config.resolved_store_path())?),
        };

        debug!(base_url = %base_url, "Session gateway ready");
        Ok(SessionGateway {
            client,
            base_url,
            auth_scheme: self.config.auth_scheme.filter(|s| !s.is_empty()),
            store,
            events: SessionEvents::new(),
            default_authorization: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
        })
    }
}
