use async_trait::async_trait;
use serde_json::{json, Value};
use session_gateway::gateway::{ApiGateway, AuthSeed, GatewayConfig, GatewayError, LogoutNavigator};
use session_gateway::security::session_store::SessionStore;
use session_gateway::security::token_refresh::RefreshError;
use session_gateway::transport::{
    ApiResponse, PreparedRequest, RequestOptions, Transport, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

const REFRESH_URL: &str = "http://backend.test/api/auth/refresh/";

/// In-process backend. Accepts only `Bearer fresh`; the renewal endpoint is
/// held until the test releases it so every concurrent caller can queue up.
struct Backend {
    release: Notify,
    refresh_response: ApiResponse,
    calls: Mutex<Vec<PreparedRequest>>,
}

impl Backend {
    fn new(refresh_response: ApiResponse) -> Arc<Self> {
        Arc::new(Self {
            release: Notify::new(),
            refresh_response,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn refresh_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == REFRESH_URL)
            .count()
    }

    fn resource_calls(&self, bearer: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url != REFRESH_URL && r.bearer.as_deref() == Some(bearer))
            .count()
    }
}

#[async_trait]
impl Transport for Backend {
    async fn send(&self, request: PreparedRequest) -> Result<ApiResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());

        if request.url == REFRESH_URL {
            self.release.notified().await;
            return Ok(self.refresh_response.clone());
        }

        // let sibling requests reach the backend before any answer lands
        tokio::task::yield_now().await;
        match request.bearer.as_deref() {
            Some("fresh") => Ok(ApiResponse::new(200, json!({"url": request.url}))),
            _ => Ok(ApiResponse::new(401, json!({"detail": "token expired"}))),
        }
    }
}

#[derive(Default)]
struct CountingNavigator(AtomicUsize);

impl LogoutNavigator for CountingNavigator {
    fn navigate_to_login(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn gateway(backend: Arc<Backend>) -> (Arc<ApiGateway>, Arc<CountingNavigator>) {
    let navigator = Arc::new(CountingNavigator::default());
    let gw = ApiGateway::new(
        GatewayConfig::new("http://backend.test"),
        backend,
        SessionStore::in_memory(),
        navigator.clone(),
    );
    gw.set_auth(AuthSeed {
        access: Some("stale".into()),
        refresh: Some("r1".into()),
        user: Some(json!({"email": "jane@example.com"})),
    })
    .unwrap();
    (Arc::new(gw), navigator)
}

async fn wait_for_waiters(gw: &ApiGateway, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while gw.refresh_waiters() < expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("callers never queued behind the renewal");
}

type GetHandle = JoinHandle<Result<ApiResponse, GatewayError>>;

fn spawn_gets(gw: &Arc<ApiGateway>, n: usize) -> Vec<GetHandle> {
    (0..n)
        .map(|_| {
            let gw = gw.clone();
            tokio::spawn(async move { gw.get("/policies/my", RequestOptions::private()).await })
        })
        .collect()
}

#[tokio::test]
async fn concurrent_401s_share_one_renewal() {
    let backend = Backend::new(ApiResponse::new(200, json!({"access": "fresh"})));
    let (gw, navigator) = gateway(backend.clone());

    let handles = spawn_gets(&gw, 3);
    wait_for_waiters(&gw, 2).await;
    assert!(gw.is_refreshing());
    backend.release.notify_one();

    for handle in handles {
        let resp = handle.await.unwrap().expect("request should recover");
        assert_eq!(resp.body["url"], "http://backend.test/api/policies/my/");
    }

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.resource_calls("stale"), 3);
    assert_eq!(backend.resource_calls("fresh"), 3);
    assert_eq!(gw.diagnostics().private_refresh_attempt_count, 1);
    assert_eq!(gw.tokens().access.as_deref(), Some("fresh"));
    assert!(!gw.is_refreshing());
    assert_eq!(navigator.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn many_concurrent_401s_still_one_renewal() {
    let backend = Backend::new(ApiResponse::new(200, json!({"access": "fresh"})));
    let (gw, _) = gateway(backend.clone());

    let handles = spawn_gets(&gw, 16);
    wait_for_waiters(&gw, 15).await;
    backend.release.notify_one();

    for handle in handles {
        handle.await.unwrap().expect("request should recover");
    }
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.resource_calls("fresh"), 16);
}

#[tokio::test]
async fn renewal_failure_rejects_all_and_logs_out_once() {
    let backend = Backend::new(ApiResponse::new(401, json!({"detail": "refresh expired"})));
    let (gw, navigator) = gateway(backend.clone());
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = reported.clone();
    gw.register_error_handler(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handles = spawn_gets(&gw, 3);
    wait_for_waiters(&gw, 2).await;
    backend.release.notify_one();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, GatewayError::Refresh(RefreshError::Rejected { status: 401 }));
        assert!(err.is_logout());
    }

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.resource_calls("fresh"), 0);
    assert!(gw.tokens().is_empty());
    assert!(gw.auth_user().is_none());
    assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
    assert_eq!(reported.load(Ordering::SeqCst), 3);
    assert_eq!(gw.diagnostics().refresh_failure_count, 1);
    assert!(!gw.is_refreshing());
}

#[tokio::test]
async fn malformed_renewal_body_is_a_failure() {
    let backend = Backend::new(ApiResponse::new(200, Value::String("ok".into())));
    let (gw, navigator) = gateway(backend.clone());

    let handles = spawn_gets(&gw, 2);
    wait_for_waiters(&gw, 1).await;
    backend.release.notify_one();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, GatewayError::Refresh(RefreshError::MissingToken));
    }
    assert!(gw.tokens().is_empty());
    assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn abandoned_leader_releases_waiters() {
    let backend = Backend::new(ApiResponse::new(200, json!({"access": "fresh"})));
    let (gw, navigator) = gateway(backend.clone());

    let leader = spawn_gets(&gw, 1).remove(0);
    timeout(Duration::from_secs(5), async {
        while !gw.is_refreshing() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("renewal never started");

    let waiter = spawn_gets(&gw, 1).remove(0);
    wait_for_waiters(&gw, 1).await;

    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());

    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err, GatewayError::Refresh(RefreshError::Abandoned));
    assert!(!gw.is_refreshing());
    assert_eq!(navigator.0.load(Ordering::SeqCst), 0);
}
