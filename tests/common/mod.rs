//! Common test utilities for tiller integration tests.
//!
//! Provides `MockTransport`, a scripted transport whose responses can be
//! gated so tests control exactly when and in which order in-flight requests
//! settle, plus small helpers shared across test files.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use tiller::config::EngineConfig;
use tiller::engine::SyncEngine;
use tiller::models::{CollectionKey, CollectionKind};
use tiller::transport::{Method, Transport, TransportFailure};

/// One request observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLog {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

struct Rule {
    method: Method,
    path: String,
    arrived: Option<oneshot::Sender<()>>,
    release: Option<oneshot::Receiver<()>>,
    result: Result<Value, TransportFailure>,
}

/// Control handle for a gated response: observe its arrival, then release it.
pub struct Gate {
    arrived: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl Gate {
    /// Wait until the gated request has been issued by the engine.
    pub async fn arrived(&mut self) {
        let _ = (&mut self.arrived).await;
    }

    /// Let the gated request settle.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// Scripted transport. Rules are consumed FIFO per (method, path); an
/// unscripted request fails loudly as a network error naming the path.
#[derive(Default)]
pub struct MockTransport {
    rules: Mutex<VecDeque<Rule>>,
    log: Mutex<Vec<RequestLog>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful response.
    pub fn respond(&self, method: Method, path: &str, value: Value) {
        self.push(method, path, None, None, Ok(value));
    }

    /// Script a failure.
    pub fn fail(&self, method: Method, path: &str, failure: TransportFailure) {
        self.push(method, path, None, None, Err(failure));
    }

    /// Script a successful response that blocks until its [`Gate`] releases.
    pub fn respond_gated(&self, method: Method, path: &str, value: Value) -> Gate {
        let (arrived_tx, arrived_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.push(method, path, Some(arrived_tx), Some(release_rx), Ok(value));
        Gate {
            arrived: arrived_rx,
            release: release_tx,
        }
    }

    /// Script a failure that blocks until its [`Gate`] releases.
    pub fn fail_gated(&self, method: Method, path: &str, failure: TransportFailure) -> Gate {
        let (arrived_tx, arrived_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.push(method, path, Some(arrived_tx), Some(release_rx), Err(failure));
        Gate {
            arrived: arrived_rx,
            release: release_tx,
        }
    }

    /// All requests issued so far.
    pub fn requests(&self) -> Vec<RequestLog> {
        self.log.lock().unwrap().clone()
    }

    /// Number of requests issued against one endpoint.
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn push(
        &self,
        method: Method,
        path: &str,
        arrived: Option<oneshot::Sender<()>>,
        release: Option<oneshot::Receiver<()>>,
        result: Result<Value, TransportFailure>,
    ) {
        self.rules.lock().unwrap().push_back(Rule {
            method,
            path: path.to_string(),
            arrived,
            release,
            result,
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, TransportFailure> {
        self.log.lock().unwrap().push(RequestLog {
            method,
            path: path.to_string(),
            body,
        });

        let rule = {
            let mut rules = self.rules.lock().unwrap();
            let position = rules
                .iter()
                .position(|r| r.method == method && r.path == path);
            position.and_then(|i| rules.remove(i))
        };
        let Some(rule) = rule else {
            return Err(TransportFailure::network(format!(
                "unscripted request: {method} {path}"
            )));
        };

        if let Some(arrived) = rule.arrived {
            let _ = arrived.send(());
        }
        if let Some(release) = rule.release {
            let _ = release.await;
        }
        rule.result
    }
}

/// Engine over a fresh mock with the project-domain defaults.
pub fn engine() -> (SyncEngine, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let engine = SyncEngine::new(transport.clone(), EngineConfig::project_defaults());
    (engine, transport)
}

pub fn key(kind: CollectionKind, scope: &str) -> CollectionKey {
    CollectionKey::new(kind, scope)
}

/// Yield a few times so spawned tasks reach their next suspension point.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
