//! Single-flight access token renewal.
//!
//! [`RefreshCoordinator`] owns the `Idle | Refreshing { waiters }` state. The
//! check-and-set that moves it out of `Idle` happens under one short lock with
//! no suspension point inside, so two concurrent 401s can never both become
//! the leader of a renewal. Callers that arrive while a renewal is in flight
//! are parked on a oneshot channel and resumed, in arrival order, when the
//! leader settles.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::security::diagnostics::DiagnosticsCounters;
use crate::security::session_store::SessionStore;
use crate::transport::{PreparedRequest, Transport, TransportError};

/// Why a renewal did not produce a new access token. Cloned to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("renewal request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("renewal rejected with status {status}")]
    Rejected { status: u16 },
    #[error("renewal response carried no access token")]
    MissingToken,
    #[error("renewal abandoned before completion")]
    Abandoned,
}

pub type RefreshOutcome = Result<String, RefreshError>;

type Waiter = oneshot::Sender<RefreshOutcome>;

#[derive(Debug, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

/// What a caller that hit a renewal-eligible 401 should do next.
#[derive(Debug)]
pub enum RefreshTicket<'a> {
    /// This caller issues the renewal call and must settle the lease.
    Leader(RefreshLease<'a>),
    /// A renewal is already in flight; await its outcome.
    Waiter(oneshot::Receiver<RefreshOutcome>),
    /// A renewal landed after this request was sent; replay with this token.
    Current(String),
    /// No refresh token is stored, renewal is impossible.
    Unavailable,
}

#[derive(Debug)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    diagnostics: Arc<DiagnosticsCounters>,
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    match state.lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

impl RefreshCoordinator {
    pub fn new(diagnostics: Arc<DiagnosticsCounters>) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            diagnostics,
        }
    }

    /// Enter the renewal protocol for a request that was sent with
    /// `sent_with` and came back 401.
    pub fn join(&self, session: &SessionStore, sent_with: Option<&str>) -> RefreshTicket<'_> {
        let mut state = lock(&self.state);

        if let RefreshState::Refreshing { waiters } = &mut *state {
            let (tx, rx) = oneshot::channel();
            waiters.push_back(tx);
            debug!(position = waiters.len(), "queued behind in-flight renewal");
            return RefreshTicket::Waiter(rx);
        }

        let tokens = session.get();
        if let Some(current) = tokens.access {
            if sent_with != Some(current.as_str()) {
                debug!("access token changed since dispatch, replaying without renewal");
                return RefreshTicket::Current(current);
            }
        }
        let Some(refresh_token) = tokens.refresh else {
            return RefreshTicket::Unavailable;
        };

        *state = RefreshState::Refreshing {
            waiters: VecDeque::new(),
        };
        self.diagnostics.record_refresh_attempt();

        RefreshTicket::Leader(RefreshLease {
            coordinator: self,
            refresh_token,
            settled: false,
        })
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*lock(&self.state), RefreshState::Refreshing { .. })
    }

    pub fn waiter_count(&self) -> usize {
        match &*lock(&self.state) {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Drain every waiter in FIFO order and return to `Idle`.
    fn settle(&self, outcome: &RefreshOutcome) -> usize {
        let waiters = match std::mem::take(&mut *lock(&self.state)) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => VecDeque::new(),
        };
        let count = waiters.len();
        for waiter in waiters {
            // receiver gone means the caller stopped caring
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

/// Proof of leadership over the in-flight renewal.
///
/// Dropping an unsettled lease rejects every waiter with
/// [`RefreshError::Abandoned`] and returns the coordinator to `Idle`.
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    refresh_token: String,
    settled: bool,
}

impl fmt::Debug for RefreshLease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshLease").field("settled", &self.settled).finish()
    }
}

impl RefreshLease<'_> {
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Hand `outcome` to every waiter. Returns how many were waiting.
    pub fn settle(mut self, outcome: &RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.settle(outcome)
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("renewal leader dropped before settling");
            self.coordinator.settle(&Err(RefreshError::Abandoned));
        }
    }
}

/// Tokens returned by a successful renewal call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewedTokens {
    pub access: String,
    /// Present when the backend rotates refresh tokens.
    pub refresh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenewalBody {
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

/// Issue the renewal call: `POST <url>` with `{"refresh": <token>}`, never
/// carrying a bearer credential.
pub async fn request_renewal(
    transport: &dyn Transport,
    url: &str,
    refresh_token: &str,
    timeout: Duration,
) -> Result<RenewedTokens, RefreshError> {
    let request = PreparedRequest {
        method: Method::POST,
        url: url.to_string(),
        body: Some(json!({ "refresh": refresh_token })),
        bearer: None,
        timeout,
    };

    let resp = transport.send(request).await?;
    if !resp.is_success() {
        return Err(RefreshError::Rejected {
            status: resp.status,
        });
    }

    match serde_json::from_value::<RenewalBody>(resp.body) {
        Ok(RenewalBody {
            access: Some(access),
            refresh,
        }) if !access.is_empty() => Ok(RenewedTokens { access, refresh }),
        _ => {
            warn!(status = resp.status, "renewal succeeded but response has no access token");
            Err(RefreshError::MissingToken)
        }
    }
}
