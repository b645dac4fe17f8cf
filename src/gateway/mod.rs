//! The authenticated gateway that application code talks to.
//!
//! Every call goes through the same pipeline: the path is normalized, a
//! bearer token is attached according to the request's classification, the
//! request is sent, and a 401/403 on a private request is resolved through the
//! single-flight renewal protocol in [`crate::security::token_refresh`].
//! Callers only ever observe the intended response or a final error.

pub mod config;
pub mod error;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

use crate::security::audit_log::AuditLogger;
use crate::security::authenticator::{bearer_for, Classification};
use crate::security::diagnostics::{DiagnosticsCounters, DiagnosticsSnapshot};
use crate::security::session_store::{FileStorage, SessionStore, TokenPair};
use crate::security::token_refresh::{
    request_renewal, RefreshCoordinator, RefreshError, RefreshLease, RefreshTicket,
};
use crate::transport::path;
use crate::transport::{
    ApiRequest, ApiResponse, PreparedRequest, ReqwestTransport, RequestOptions, Transport,
    TransportError,
};

pub use config::GatewayConfig;
pub use error::GatewayError;

/// Global error callback. Sees every error returned to a caller.
pub type ErrorHandler = Arc<dyn Fn(&GatewayError) + Send + Sync>;

/// Moves the user to the login view after a forced logout.
pub trait LogoutNavigator: Send + Sync {
    fn navigate_to_login(&self);
}

/// Navigator for headless use: records the logout in the log and nothing else.
#[derive(Debug, Clone, Default)]
pub struct LoggingNavigator;

impl LogoutNavigator for LoggingNavigator {
    fn navigate_to_login(&self) {
        warn!("session ended, login required");
    }
}

/// Values to seed the session with after a login. `None` fields are left as
/// they are.
#[derive(Debug, Clone, Default)]
pub struct AuthSeed {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub user: Option<Value>,
}

pub struct ApiGateway {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    session: SessionStore,
    coordinator: RefreshCoordinator,
    diagnostics: Arc<DiagnosticsCounters>,
    navigator: Arc<dyn LogoutNavigator>,
    error_handler: RwLock<Option<ErrorHandler>>,
    audit: AuditLogger,
}

impl std::fmt::Debug for ApiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiGateway")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl ApiGateway {
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        session: SessionStore,
        navigator: Arc<dyn LogoutNavigator>,
    ) -> Self {
        let diagnostics = Arc::new(DiagnosticsCounters::new());
        Self {
            config,
            transport,
            session,
            coordinator: RefreshCoordinator::new(diagnostics.clone()),
            diagnostics,
            navigator,
            error_handler: RwLock::new(None),
            audit: AuditLogger::new(),
        }
    }

    /// Gateway over `reqwest`, with a file-backed session when
    /// `config.session_dir` is set and an in-memory one otherwise.
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        let transport = Arc::new(ReqwestTransport::new(config.timeout())?);
        let session = match &config.session_dir {
            Some(dir) => SessionStore::new(Arc::new(FileStorage::new(dir))),
            None => SessionStore::in_memory(),
        };
        Ok(Self::new(config, transport, session, Arc::new(LoggingNavigator)))
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn LogoutNavigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    // ---- request dispatch -------------------------------------------------

    pub async fn get(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, GatewayError> {
        self.request(ApiRequest::new(Method::GET, path).with_options(options))
            .await
    }

    pub async fn delete(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, GatewayError> {
        self.request(ApiRequest::new(Method::DELETE, path).with_options(options))
            .await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, GatewayError> {
        self.request(build(Method::POST, path, body, options)).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, GatewayError> {
        self.request(build(Method::PUT, path, body, options)).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, GatewayError> {
        self.request(build(Method::PATCH, path, body, options)).await
    }

    /// Send `request` through the full pipeline. Errors are reported to the
    /// registered error handler before being returned.
    pub async fn request(&self, mut request: ApiRequest) -> Result<ApiResponse, GatewayError> {
        request.path = path::normalize(&self.config.api_base_path, &request.path);
        let result = self.dispatch(&mut request).await;
        if let Err(err) = &result {
            self.report(err);
        }
        result
    }

    async fn dispatch(&self, request: &mut ApiRequest) -> Result<ApiResponse, GatewayError> {
        let classification = Classification::of(&request.options);
        let mut bearer = bearer_for(&request.options, &self.session.get()).map(str::to_string);

        loop {
            let response = self.send(request, bearer.clone()).await?;
            if response.is_success() {
                return Ok(response);
            }

            let status = response.status;
            if status != 401 && status != 403 {
                return Err(GatewayError::Status {
                    status,
                    body: response.body,
                });
            }

            if !classification.requires_auth() {
                if status == 401 {
                    self.diagnostics.record_public_401();
                    self.audit.public_unauthorized(&request.path);
                }
                return Err(GatewayError::Status {
                    status,
                    body: response.body,
                });
            }

            // Ok means: replay once with this token.
            let token = self.recover(request, response, bearer.as_deref()).await?;
            bearer = Some(token);
        }
    }

    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<String>,
    ) -> Result<ApiResponse, TransportError> {
        debug!(
            method = %request.method,
            path = %request.path,
            retried = request.retried,
            "dispatching request"
        );
        self.transport
            .send(PreparedRequest {
                method: request.method.clone(),
                url: self.config.join(&request.path),
                body: request.body.clone(),
                bearer,
                timeout: self.config.timeout(),
            })
            .await
    }

    /// Resolve a 401/403 on a private request into either a token to replay
    /// with or a terminal error.
    async fn recover(
        &self,
        request: &mut ApiRequest,
        response: ApiResponse,
        sent_with: Option<&str>,
    ) -> Result<String, GatewayError> {
        let status = response.status;

        if request.retried {
            return Err(self.force_logout(&request.path, status, "rejected after renewal"));
        }

        if status == 403 {
            if self.session.refresh().is_none() {
                return Err(self.force_logout(&request.path, status, "no refresh token"));
            }
            // a valid session without permission; nothing to renew
            return Err(GatewayError::Status {
                status,
                body: response.body,
            });
        }

        match self.coordinator.join(&self.session, sent_with) {
            RefreshTicket::Unavailable => {
                Err(self.force_logout(&request.path, status, "no refresh token"))
            }
            // no renewal happened, so the replay may still lead one
            RefreshTicket::Current(token) => Ok(token),
            RefreshTicket::Waiter(rx) => {
                request.retried = true;
                match rx.await {
                    Ok(Ok(token)) => Ok(token),
                    Ok(Err(err)) => Err(GatewayError::Refresh(err)),
                    Err(_) => Err(GatewayError::Refresh(RefreshError::Abandoned)),
                }
            }
            RefreshTicket::Leader(lease) => {
                request.retried = true;
                self.lead_renewal(lease, &request.path).await
            }
        }
    }

    async fn lead_renewal(
        &self,
        lease: RefreshLease<'_>,
        path: &str,
    ) -> Result<String, GatewayError> {
        self.audit.refresh_started(path);

        let outcome = request_renewal(
            self.transport.as_ref(),
            &self.config.refresh_url(),
            lease.refresh_token(),
            self.config.timeout(),
        )
        .await;

        match outcome {
            Ok(tokens) => {
                if let Err(err) = self.session.set_access(Some(tokens.access.as_str())) {
                    error!(error = %err, "failed to persist renewed access token");
                }
                if let Some(refresh) = tokens.refresh.as_deref() {
                    if let Err(err) = self.session.set_refresh(Some(refresh)) {
                        error!(error = %err, "failed to persist rotated refresh token");
                    }
                }
                self.diagnostics.record_refresh_success();
                let waiters = lease.settle(&Ok(tokens.access.clone()));
                self.audit
                    .refresh_succeeded(path, waiters, tokens.refresh.is_some());
                Ok(tokens.access)
            }
            Err(err) => {
                self.diagnostics.record_refresh_failure();
                // cleared before settling so no late 401 can start a renewal
                // with the refresh token that just failed
                self.end_session("renewal failed");
                let waiters = lease.settle(&Err(err.clone()));
                self.audit.refresh_failed(path, waiters, &err.to_string());
                self.navigate(path, None, "renewal failed");
                Err(GatewayError::Refresh(err))
            }
        }
    }

    fn force_logout(&self, path: &str, status: u16, reason: &str) -> GatewayError {
        self.end_session(reason);
        self.navigate(path, Some(status), reason);
        GatewayError::SessionExpired { status }
    }

    fn end_session(&self, reason: &str) {
        if let Err(err) = self.session.clear() {
            error!(error = %err, "failed to clear session");
        }
        self.audit.session_cleared(reason);
    }

    fn navigate(&self, path: &str, status: Option<u16>, reason: &str) {
        self.diagnostics.record_forced_logout();
        self.audit.forced_logout(path, status, reason);
        self.navigator.navigate_to_login();
    }

    fn report(&self, err: &GatewayError) {
        let handler = match self.error_handler.read() {
            Ok(g) => g.clone(),
            Err(e) => e.into_inner().clone(),
        };
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                warn!("error handler panicked, ignoring");
            }
        }
    }

    // ---- session ------------------------------------------------------------

    pub fn set_auth(&self, seed: AuthSeed) -> Result<(), GatewayError> {
        if let Some(access) = seed.access.as_deref() {
            self.session.set_access(Some(access))?;
        }
        if let Some(refresh) = seed.refresh.as_deref() {
            self.session.set_refresh(Some(refresh))?;
        }
        match &seed.user {
            Some(Value::Null) => self.session.set_user(None)?,
            Some(user) => self.session.set_user(Some(user))?,
            None => {}
        }
        self.audit
            .session_seeded(seed.access.is_some(), seed.refresh.is_some(), seed.user.is_some());
        Ok(())
    }

    pub fn clear_auth(&self) -> Result<(), GatewayError> {
        self.session.clear()?;
        self.audit.session_cleared("logout");
        Ok(())
    }

    pub fn tokens(&self) -> TokenPair {
        self.session.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.access().is_some()
    }

    pub fn auth_user(&self) -> Option<Value> {
        self.session.user()
    }

    /// The cached profile decoded as `T`; `None` if absent or of another shape.
    pub fn auth_user_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.auth_user()
            .and_then(|user| serde_json::from_value(user).ok())
    }

    /// Install the global error callback, replacing any previous one. A
    /// panicking handler is caught and ignored.
    pub fn register_error_handler<F>(&self, handler: F)
    where
        F: Fn(&GatewayError) + Send + Sync + 'static,
    {
        let mut slot = match self.error_handler.write() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        *slot = Some(Arc::new(handler));
    }

    // ---- diagnostics ----------------------------------------------------------

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing()
    }

    /// Callers currently parked behind an in-flight renewal.
    pub fn refresh_waiters(&self) -> usize {
        self.coordinator.waiter_count()
    }
}

fn build(method: Method, path: &str, body: Option<Value>, options: RequestOptions) -> ApiRequest {
    let request = ApiRequest::new(method, path).with_options(options);
    match body {
        Some(body) => request.with_body(body),
        None => request,
    }
}
