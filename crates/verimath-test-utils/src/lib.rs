//! Testing utilities for the Verimath workspace
//!
//! Instrumented backends and shared fixtures.

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use verimath_backend::{
    Backend, BackendError, BackendRegistry, BackendRequest, BuildCollaborator, BuildReport, BuildTask, Method,
    NumericBackend, Sense, SymbolicBackend, Value,
};

/// Delays every call of the wrapped backend
pub struct SlowBackend {
    inner: Arc<dyn Backend>,
    delay: Duration,
}

impl SlowBackend {
    /// Same name and capabilities as `inner`
    pub fn wrap(inner: Arc<dyn Backend>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait::async_trait]
impl Backend for SlowBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> &[Method] {
        self.inner.capabilities()
    }

    fn can_handle(&self, request: &BackendRequest) -> bool {
        self.inner.can_handle(request)
    }

    async fn execute(&self, request: &BackendRequest) -> Result<Value, BackendError> {
        tracing::debug!(backend = self.inner.name(), delay_ms = self.delay.as_millis(), "delaying");
        tokio::time::sleep(self.delay).await;
        self.inner.execute(request).await
    }
}

/// Declares capabilities but accepts nothing, like a backend whose service is down
pub struct OfflineBackend {
    name: String,
    methods: Vec<Method>,
}

impl OfflineBackend {
    /// Backend called `name` that declares `methods`
    pub fn new(name: &str, methods: Vec<Method>) -> Self {
        Self {
            name: name.to_string(),
            methods,
        }
    }
}

#[async_trait::async_trait]
impl Backend for OfflineBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Method] {
        &self.methods
    }

    fn can_handle(&self, _request: &BackendRequest) -> bool {
        false
    }

    async fn execute(&self, request: &BackendRequest) -> Result<Value, BackendError> {
        Err(BackendError::Unsupported {
            backend: self.name.clone(),
            method: request.method,
        })
    }
}

/// One call seen by a `RecordingBackend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    pub method: Method,
    pub started: Instant,
    pub finished: Instant,
}

impl CallRecord {
    /// Whether two calls were in flight at the same time
    pub fn overlaps(&self, other: &CallRecord) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Records start and end of every call of the wrapped backend
pub struct RecordingBackend {
    inner: Arc<dyn Backend>,
    calls: Mutex<Vec<CallRecord>>,
}

impl RecordingBackend {
    /// Record every request before forwarding it to `inner`
    pub fn wrap(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls in completion order
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    /// Most calls in flight at once
    pub fn max_overlap(&self) -> usize {
        let calls = self.calls();
        calls
            .iter()
            .map(|c| calls.iter().filter(|o| o.started <= c.started && c.started < o.finished).count())
            .max()
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> &[Method] {
        self.inner.capabilities()
    }

    fn can_handle(&self, request: &BackendRequest) -> bool {
        self.inner.can_handle(request)
    }

    async fn execute(&self, request: &BackendRequest) -> Result<Value, BackendError> {
        let started = Instant::now();
        let out = self.inner.execute(request).await;
        self.calls.lock().push(CallRecord {
            method: request.method,
            started,
            finished: Instant::now(),
        });
        out
    }
}

/// Optimiser that always reports the origin as the optimum
pub struct LyingOptimizer {
    name: String,
}

impl LyingOptimizer {
    /// Optimizer called `name`
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait::async_trait]
impl Backend for LyingOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Method] {
        &[Method::Optimize]
    }

    async fn execute(&self, request: &BackendRequest) -> Result<Value, BackendError> {
        let var = request.variable()?.to_string();
        let value = request.target()?.eval_at(&var, 0.0)?;
        Ok(Value::Optimum {
            point: BTreeMap::from([(var, 0.0)]),
            value,
            sense: request.sense.unwrap_or(Sense::Maximize),
        })
    }
}

/// Build collaborator that passes every task and keeps a copy
#[derive(Default)]
pub struct RecordingCollaborator {
    tasks: Mutex<Vec<BuildTask>>,
    fail: bool,
}

impl RecordingCollaborator {
    /// Passes every task
    pub fn passing() -> Self {
        Self::default()
    }

    /// Fails every task
    pub fn failing() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Tasks received so far
    pub fn tasks(&self) -> Vec<BuildTask> {
        self.tasks.lock().clone()
    }
}

#[async_trait::async_trait]
impl BuildCollaborator for RecordingCollaborator {
    async fn build(&self, task: BuildTask) -> Result<BuildReport, BackendError> {
        self.tasks.lock().push(task);
        if self.fail {
            return Err(BackendError::Build("compilation failed".into()));
        }
        Ok(BuildReport {
            passed: true,
            artifact_paths: vec!["target/check/answer_check".into()],
            log: "check passed".into(),
        })
    }
}

/// Symbolic and numeric backends, each wrapped in a recorder
pub fn recording_registry() -> (BackendRegistry, Arc<RecordingBackend>, Arc<RecordingBackend>) {
    let symbolic = Arc::new(RecordingBackend::wrap(Arc::new(SymbolicBackend::new())));
    let numeric = Arc::new(RecordingBackend::wrap(Arc::new(NumericBackend::new())));
    let registry = BackendRegistry::new()
        .with_backend(Arc::clone(&symbolic) as Arc<dyn Backend>)
        .with_backend(Arc::clone(&numeric) as Arc<dyn Backend>);
    (registry, symbolic, numeric)
}

/// Queries every default-registry run is expected to answer
pub const SOLVABLE_QUERIES: &[(&str, &str)] = &[
    ("solve x^2 - 4 = 0", "x = 2, x = -2"),
    ("solve 2x + 3 = 11", "x = 4"),
    ("solve x^3 - 6x^2 + 11x - 6 = 0", "x = 3, x = 2, x = 1"),
    ("solve 2x + y = 5 and x - y = 1", "x = 2, y = 1"),
    ("maximize 10*d - d^2", "d = 5, maximum = 25"),
    ("factor x^2 - 5x + 6", "(x - 3)*(x - 2)"),
    ("find the derivative of x^3", "3*x^2"),
];
