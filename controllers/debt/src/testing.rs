//! In-process doubles for unit tests: a canned-response API service backing
//! a real `kube::Client`, and a scripted strategy that logs its invocations.

use crate::error::ControllerError;
use crate::strategy::SuspensionStrategy;
use http::{Request, Response};
use kube::client::Body;
use kube::Client;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// `(method, path)` pairs in arrival order.
pub type ApiCalls = Arc<Mutex<Vec<(String, String)>>>;

/// One scripted response, matched by method and a path fragment.
pub struct CannedResponse {
    pub method: &'static str,
    pub path_fragment: &'static str,
    pub status: u16,
    pub body: &'static str,
}

const STATUS_404: &str = r#"{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Failure","message":"not found","reason":"NotFound","code":404}"#;
const STATUS_OK: &str = r#"{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Success"}"#;
const EMPTY_LIST: &str = r#"{"apiVersion":"v1","kind":"List","metadata":{},"items":[]}"#;
const BARE_OBJECT: &str = r#"{"metadata":{"name":"mock","namespace":"default"}}"#;

#[derive(Clone)]
struct CannedApiService {
    calls: ApiCalls,
    responses: Arc<Vec<CannedResponse>>,
}

impl CannedApiService {
    fn respond(&self, method: &str, path: &str) -> (u16, String) {
        if let Some(r) = self
            .responses
            .iter()
            .find(|r| r.method == method && path.contains(r.path_fragment))
        {
            return (r.status, r.body.to_string());
        }
        if path.contains("kubeblocks") {
            // The KubeBlocks CRDs are absent unless a test scripts them in
            return (404, STATUS_404.to_string());
        }
        match method {
            "GET" => (200, EMPTY_LIST.to_string()),
            "DELETE" => (200, STATUS_OK.to_string()),
            _ => (200, BARE_OBJECT.to_string()),
        }
    }
}

impl tower::Service<Request<Body>> for CannedApiService {
    type Response = Response<Body>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), path.clone()));
        let (status, body) = self.respond(&method, &path);
        Box::pin(async move {
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// A `kube::Client` whose requests are answered in-process. Unmatched
/// requests get a generic answer: an empty list for GET, a success Status
/// for DELETE, a bare object echo for writes.
pub fn mock_client(responses: Vec<CannedResponse>) -> (Client, ApiCalls) {
    let calls: ApiCalls = Arc::new(Mutex::new(Vec::new()));
    let service = CannedApiService {
        calls: Arc::clone(&calls),
        responses: Arc::new(responses),
    };
    (Client::new(service, "default"), calls)
}

/// Strategy double that records invocations and optionally fails.
pub struct ScriptedStrategy {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail_suspend: bool,
    fail_resume: bool,
}

impl ScriptedStrategy {
    pub fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            fail_suspend: false,
            fail_resume: false,
        }
    }

    pub fn failing_suspend(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            fail_suspend: true,
            ..Self::new(name, log)
        }
    }

    pub fn failing_resume(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            fail_resume: true,
            ..Self::new(name, log)
        }
    }

    fn scripted_failure(&self, op: &str) -> ControllerError {
        ControllerError::Strategy {
            strategy: self.name,
            message: format!("scripted {} failure", op),
        }
    }
}

#[async_trait::async_trait]
impl SuspensionStrategy for ScriptedStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_supported(&self, _resource_kind: &str) -> bool {
        true
    }

    async fn suspend(&self, _namespace: &str) -> Result<(), ControllerError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:suspend", self.name));
        if self.fail_suspend {
            return Err(self.scripted_failure("suspend"));
        }
        Ok(())
    }

    async fn resume(&self, _namespace: &str) -> Result<(), ControllerError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:resume", self.name));
        if self.fail_resume {
            return Err(self.scripted_failure("resume"));
        }
        Ok(())
    }
}
