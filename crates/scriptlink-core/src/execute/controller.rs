//! Single-flight execution controller.
//!
//! At most one session is active at a time. Compilation happens before a
//! slot is claimed, so a script that fails to compile never blocks anyone.
//! Claiming the slot is atomic: of two requests that both compiled, exactly
//! one runs and the other is told the controller is busy.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use super::cancel::CancelSignal;
use super::host::{EmptyHost, HostContext, InvocationScope};
use super::session::{ExecutionSession, SessionId, SessionSnapshot, SessionStatus};
use crate::compile::{CompilationError, DEFAULT_COMPILE_TIMEOUT};
use crate::engine::{Invocation, InvocationOutcome, ScriptEngine};

/// Category of a failed execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request itself was malformed.
    Validation,
    /// Another session is active.
    Busy,
    /// The script returned an error or panicked.
    Runtime,
    /// The script outlived its timeout.
    Timeout,
    /// The session was cancelled on request.
    Cancelled,
}

/// Outcome of [`ExecutionController::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    Completed {
        session_id: SessionId,
        value: Value,
    },
    Failure {
        kind: FailureKind,
        message: String,
        session_id: Option<SessionId>,
    },
    CompilationFailed(CompilationError),
}

impl ExecuteResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Completed { session_id, .. } => Some(session_id),
            Self::Failure { session_id, .. } => session_id.as_ref(),
            Self::CompilationFailed(_) => None,
        }
    }

    fn failure(kind: FailureKind, message: impl Into<String>, session_id: Option<SessionId>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
            session_id,
        }
    }
}

/// Outcome of [`ExecutionController::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelResult {
    Cancelled(SessionId),
    NotFound,
}

#[derive(Default)]
struct Slots {
    active: Option<Arc<ExecutionSession>>,
    last: Option<Arc<ExecutionSession>>,
}

/// Accepts execute/cancel requests and owns the active and last sessions.
pub struct ExecutionController {
    engine: Arc<dyn ScriptEngine>,
    host: Arc<dyn HostContext>,
    compile_timeout: Duration,
    slots: Mutex<Slots>,
}

impl ExecutionController {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            engine,
            host: Arc::new(EmptyHost),
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Host values scripts can resolve at call time.
    pub fn with_host(mut self, host: Arc<dyn HostContext>) -> Self {
        self.host = host;
        self
    }

    /// Upper bound on compilation, separate from the execution timeout.
    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    /// Compile and run `code`, waiting at most `timeout` for it to finish.
    pub async fn execute(&self, code: &str, timeout: Duration) -> ExecuteResult {
        if code.trim().is_empty() {
            return ExecuteResult::failure(FailureKind::Validation, "Missing 'code' argument", None);
        }

        let Some(deadline_check) = Instant::now().checked_add(timeout) else {
            let message = format!(
                "Invalid 'timeout' argument: {} is too large",
                format_duration(timeout)
            );
            return ExecuteResult::failure(FailureKind::Validation, message, None);
        };

        if let Some(active) = self.active_session_id() {
            return busy(&active);
        }

        let compiled = match tokio::time::timeout(self.compile_timeout, self.engine.compile(code)).await {
            Ok(Ok(unit)) => unit,
            Ok(Err(err)) => {
                tracing::info!(kind = ?err.kind, errors = err.diagnostics.len(), "compilation rejected");
                return ExecuteResult::CompilationFailed(err);
            }
            Err(_) => {
                return ExecuteResult::CompilationFailed(CompilationError::toolchain(format!(
                    "compilation exceeded {}",
                    format_duration(self.compile_timeout)
                )));
            }
        };

        // Compilation took time since the first check; keep the earlier deadline if the sum no longer fits.
        let deadline = Instant::now().checked_add(timeout).unwrap_or(deadline_check);
        let signal = CancelSignal::with_deadline(deadline);
        let session_id = SessionId::new();

        let session = match self.claim(session_id.clone(), signal.clone(), compiled, timeout) {
            Ok(session) => session,
            Err((active, unit)) => {
                // Released outside the lock; dropping unloads its context.
                drop(unit);
                return busy(&active);
            }
        };

        tracing::info!(session = %session_id, timeout = %format_duration(timeout), "execution started");

        let (status, timed_out) =
            match tokio::time::timeout_at(deadline.into(), session.wait()).await {
                Ok(status) => (status, false),
                Err(_) => {
                    session.cancel();
                    (session.status(), true)
                }
            };

        self.demote(&session);

        match status {
            SessionStatus::Completed(value) => {
                tracing::info!(session = %session_id, elapsed_ms = session.elapsed().as_millis() as u64, "execution completed");
                ExecuteResult::Completed { session_id, value }
            }
            SessionStatus::Faulted(text) => {
                tracing::info!(session = %session_id, "execution faulted");
                ExecuteResult::failure(FailureKind::Runtime, text, Some(session_id))
            }
            SessionStatus::Cancelled if timed_out || !signal.was_cancelled() => {
                tracing::warn!(session = %session_id, "execution timed out");
                let message = format!(
                    "Execution timed out after {} (session {session_id})",
                    format_duration(timeout)
                );
                ExecuteResult::failure(FailureKind::Timeout, message, Some(session_id))
            }
            SessionStatus::Cancelled | SessionStatus::Running => {
                let message = format!("Execution cancelled (session {session_id})");
                ExecuteResult::failure(FailureKind::Cancelled, message, Some(session_id))
            }
        }
    }

    /// Cancel the active session if its id matches exactly.
    pub fn cancel(&self, session_id: &str) -> CancelResult {
        let mut slots = self.lock_slots();
        let matches = slots
            .active
            .as_ref()
            .is_some_and(|s| s.id().as_str() == session_id);
        if !matches {
            return CancelResult::NotFound;
        }

        let Some(session) = slots.active.take() else {
            return CancelResult::NotFound;
        };
        session.cancel();
        let id = session.id().clone();
        slots.last = Some(session);
        CancelResult::Cancelled(id)
    }

    /// Cancel whatever is running, e.g. on shutdown.
    pub fn cancel_active(&self) -> Option<SessionId> {
        let id = self.active_session_id()?;
        match self.cancel(id.as_str()) {
            CancelResult::Cancelled(id) => Some(id),
            CancelResult::NotFound => None,
        }
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.lock_slots().active.as_ref().map(|s| s.id().clone())
    }

    pub fn last_session(&self) -> Option<SessionSnapshot> {
        self.lock_slots().last.as_ref().map(|s| s.snapshot())
    }

    /// Atomically make a new session active, or hand the unit back.
    fn claim(
        &self,
        session_id: SessionId,
        signal: CancelSignal,
        unit: Box<dyn Invocation>,
        timeout: Duration,
    ) -> Result<Arc<ExecutionSession>, (SessionId, Box<dyn Invocation>)> {
        let mut slots = self.lock_slots();
        if let Some(active) = &slots.active {
            return Err((active.id().clone(), unit));
        }

        let scope = InvocationScope::new(signal.clone(), Arc::clone(&self.host))
            .with_request_value("session.id", session_id.as_str())
            .with_request_value("request.timeout_secs", timeout.as_secs_f64());

        let computation = spawn_invocation(session_id.clone(), unit, scope);
        let session = Arc::new(ExecutionSession::start(session_id, signal, computation));
        slots.active = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Move a finished session from active to last. A session already
    /// demoted by `cancel` is left alone.
    fn demote(&self, session: &Arc<ExecutionSession>) {
        let mut slots = self.lock_slots();
        if slots.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, session)) {
            slots.active = None;
            slots.last = Some(Arc::clone(session));
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Slots> {
        // Slots stay consistent even if a holder panicked.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run an invocation on its own thread and resolve with its outcome.
///
/// A supervisor thread owns the unit. It runs the script on a second
/// thread, joins it, and only then drops the unit, so the library is
/// unmapped after every thread-local destructor the script registered has
/// run. Both threads are detached: a script that ignores cancellation keeps
/// running after its session ends, but never blocks the runtime.
fn spawn_invocation(
    session_id: SessionId,
    unit: Box<dyn Invocation>,
    scope: InvocationScope,
) -> impl Future<Output = InvocationOutcome> + Send + 'static {
    let (tx, rx) = oneshot::channel();
    let short = session_id.as_str()[..8].to_string();
    let spawned = std::thread::Builder::new()
        .name(format!("script-{short}"))
        .spawn(move || {
            let runner = std::thread::Builder::new()
                .name(format!("script-{short}-run"))
                .spawn(move || {
                    let outcome = unit.invoke(&scope);
                    let _ = tx.send(outcome);
                    unit
                });

            match runner.map(|handle| handle.join()) {
                Ok(Ok(unit)) => {
                    drop(unit);
                    tracing::debug!(session = %session_id, "script thread joined, unit released");
                }
                Ok(Err(_)) => {
                    tracing::error!(session = %session_id, "script thread panicked");
                }
                Err(e) => {
                    tracing::error!(session = %session_id, "failed to spawn script thread: {}", e);
                }
            }
        });

    async move {
        if let Err(e) = spawned {
            return InvocationOutcome::Faulted(format!("SpawnError: {e}"));
        }
        rx.await.unwrap_or_else(|_| {
            InvocationOutcome::Faulted(
                "InvocationError: script thread ended without reporting an outcome".to_string(),
            )
        })
    }
}

fn busy(active: &SessionId) -> ExecuteResult {
    ExecuteResult::failure(
        FailureKind::Busy,
        format!("Another execution is in progress (session {active})"),
        Some(active.clone()),
    )
}

/// `30s` for whole seconds, `250ms` otherwise.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{duration:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use serde_json::json;

    use crate::compile::Diagnostic;

    /// Engine whose "scripts" are a tiny command language.
    struct FakeEngine;

    struct FakeUnit(String);

    impl ScriptEngine for FakeEngine {
        fn compile<'a>(
            &'a self,
            source: &'a str,
        ) -> BoxFuture<'a, Result<Box<dyn Invocation>, CompilationError>> {
            async move {
                if source.starts_with("syntax") {
                    return Err(CompilationError::diagnostics(vec![Diagnostic::at(
                        "expected expression",
                        1,
                        1,
                    )]));
                }
                Ok(Box::new(FakeUnit(source.trim().to_string())) as Box<dyn Invocation>)
            }
            .boxed()
        }
    }

    impl Invocation for FakeUnit {
        fn invoke(&self, scope: &InvocationScope) -> InvocationOutcome {
            match self.0.as_str() {
                "answer" => InvocationOutcome::Completed(json!(42)),
                "fail" => InvocationOutcome::Faulted("Boom: it broke\n   at execute".to_string()),
                "session" => InvocationOutcome::Completed(scope.resolve("session.id").unwrap_or_default()),
                "cooperative" => {
                    while !scope.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    InvocationOutcome::Cancelled
                }
                "stubborn" => {
                    std::thread::sleep(Duration::from_millis(400));
                    InvocationOutcome::Completed(json!("too late"))
                }
                other => InvocationOutcome::Faulted(format!("Unknown: {other}")),
            }
        }
    }

    fn controller() -> Arc<ExecutionController> {
        Arc::new(ExecutionController::new(Arc::new(FakeEngine)))
    }

    async fn wait_for_active(controller: &ExecutionController) -> SessionId {
        for _ in 0..200 {
            if let Some(id) = controller.active_session_id() {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no session became active");
    }

    #[tokio::test]
    async fn test_execute_completes() {
        let controller = controller();
        let result = controller.execute("answer", Duration::from_secs(5)).await;

        let ExecuteResult::Completed { session_id, value } = result else {
            panic!("expected completion, got {result:?}");
        };
        assert_eq!(value, json!(42));
        assert!(controller.active_session_id().is_none());

        let last = controller.last_session().unwrap();
        assert_eq!(last.id, session_id);
        assert_eq!(last.status, "completed");
    }

    #[tokio::test]
    async fn test_empty_code_is_validation_failure() {
        let result = controller().execute("   \n", Duration::from_secs(5)).await;
        assert_eq!(
            result,
            ExecuteResult::Failure {
                kind: FailureKind::Validation,
                message: "Missing 'code' argument".to_string(),
                session_id: None,
            }
        );
    }

    #[tokio::test]
    async fn test_compilation_failure_creates_no_session() {
        let controller = controller();
        let result = controller.execute("syntax error", Duration::from_secs(5)).await;

        assert!(matches!(result, ExecuteResult::CompilationFailed(_)));
        assert!(controller.active_session_id().is_none());
        assert!(controller.last_session().is_none());
    }

    #[tokio::test]
    async fn test_fault_reports_runtime_failure() {
        let result = controller().execute("fail", Duration::from_secs(5)).await;
        let ExecuteResult::Failure { kind, message, session_id } = result else {
            panic!("expected failure");
        };
        assert_eq!(kind, FailureKind::Runtime);
        assert!(message.starts_with("Boom: it broke"));
        assert!(session_id.is_some());
    }

    #[tokio::test]
    async fn test_request_scope_exposes_session_id() {
        let result = controller().execute("session", Duration::from_secs(5)).await;
        let ExecuteResult::Completed { session_id, value } = result else {
            panic!("expected completion");
        };
        assert_eq!(value, json!(session_id.as_str()));
    }

    #[tokio::test]
    async fn test_second_execution_is_busy() {
        let controller = controller();
        let runner = Arc::clone(&controller);
        let first = tokio::spawn(async move {
            runner.execute("cooperative", Duration::from_secs(10)).await
        });

        let active = wait_for_active(&controller).await;
        let second = controller.execute("answer", Duration::from_secs(5)).await;

        let ExecuteResult::Failure { kind, session_id, .. } = second else {
            panic!("expected busy");
        };
        assert_eq!(kind, FailureKind::Busy);
        assert_eq!(session_id, Some(active.clone()));

        assert_eq!(controller.cancel(active.as_str()), CancelResult::Cancelled(active));
        let first = first.await.unwrap();
        assert!(matches!(
            first,
            ExecuteResult::Failure { kind: FailureKind::Cancelled, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_requires_exact_active_id() {
        let controller = controller();
        assert_eq!(controller.cancel("anything"), CancelResult::NotFound);

        let runner = Arc::clone(&controller);
        let running = tokio::spawn(async move {
            runner.execute("cooperative", Duration::from_secs(10)).await
        });
        let active = wait_for_active(&controller).await;

        assert_eq!(controller.cancel(&active.as_str()[..8]), CancelResult::NotFound);
        assert_eq!(controller.cancel(&active.as_str().to_uppercase()), CancelResult::NotFound);
        assert!(controller.cancel_active().is_some());

        let result = running.await.unwrap();
        let ExecuteResult::Failure { message, .. } = result else {
            panic!("expected cancellation");
        };
        assert!(message.contains(active.as_str()));

        let last = controller.last_session().unwrap();
        assert_eq!(last.status, "cancelled");
        assert!(controller.active_session_id().is_none());
    }

    #[tokio::test]
    async fn test_cooperative_script_times_out() {
        let controller = controller();
        let start = Instant::now();
        let result = controller.execute("cooperative", Duration::from_millis(200)).await;

        let ExecuteResult::Failure { kind, message, session_id } = result else {
            panic!("expected timeout");
        };
        assert_eq!(kind, FailureKind::Timeout);
        assert!(message.contains("timed out"));
        assert!(message.contains(session_id.unwrap().as_str()));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unresponsive_script_returns_at_deadline() {
        let controller = controller();
        let start = Instant::now();
        let result = controller.execute("stubborn", Duration::from_millis(100)).await;

        assert!(matches!(
            result,
            ExecuteResult::Failure { kind: FailureKind::Timeout, .. }
        ));
        assert!(start.elapsed() < Duration::from_millis(350));
        assert!(controller.active_session_id().is_none());

        // The late completion must not rewrite the recorded outcome.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(controller.last_session().unwrap().status, "cancelled");
    }

    #[tokio::test]
    async fn test_compile_timeout_is_reported_as_compilation_failure() {
        struct SlowEngine;

        impl ScriptEngine for SlowEngine {
            fn compile<'a>(
                &'a self,
                _source: &'a str,
            ) -> BoxFuture<'a, Result<Box<dyn Invocation>, CompilationError>> {
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(CompilationError::toolchain("unreachable"))
                }
                .boxed()
            }
        }

        let controller = ExecutionController::new(Arc::new(SlowEngine))
            .with_compile_timeout(Duration::from_millis(50));
        let result = controller.execute("anything", Duration::from_secs(5)).await;

        let ExecuteResult::CompilationFailed(err) = result else {
            panic!("expected compilation failure");
        };
        assert!(err.render().contains("compilation exceeded 50ms"));
    }

    #[tokio::test]
    async fn test_timeout_beyond_clock_range_is_validation_failure() {
        let controller = controller();
        let result = controller.execute("answer", Duration::from_secs(u64::MAX)).await;

        let ExecuteResult::Failure { kind, message, session_id } = result else {
            panic!("expected validation failure, got {result:?}");
        };
        assert_eq!(kind, FailureKind::Validation);
        assert!(message.starts_with("Invalid 'timeout' argument"), "{message}");
        assert!(session_id.is_none());
        assert!(controller.last_session().is_none());
    }

    #[tokio::test]
    async fn test_unit_released_after_script_thread_exits() {
        type Log = Arc<Mutex<Vec<&'static str>>>;

        struct ThreadExit(Log);

        impl Drop for ThreadExit {
            fn drop(&mut self) {
                self.0.lock().unwrap().push("thread exit");
            }
        }

        thread_local! {
            static EXIT: std::cell::RefCell<Option<ThreadExit>> = const { std::cell::RefCell::new(None) };
        }

        struct Tracked(Log);

        impl Invocation for Tracked {
            fn invoke(&self, _scope: &InvocationScope) -> InvocationOutcome {
                EXIT.with(|slot| *slot.borrow_mut() = Some(ThreadExit(Arc::clone(&self.0))));
                InvocationOutcome::Completed(json!("ok"))
            }
        }

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.lock().unwrap().push("unit dropped");
            }
        }

        struct TrackedEngine(Log);

        impl ScriptEngine for TrackedEngine {
            fn compile<'a>(
                &'a self,
                _source: &'a str,
            ) -> BoxFuture<'a, Result<Box<dyn Invocation>, CompilationError>> {
                let unit = Tracked(Arc::clone(&self.0));
                async move { Ok(Box::new(unit) as Box<dyn Invocation>) }.boxed()
            }
        }

        let log: Log = Arc::default();
        let controller = ExecutionController::new(Arc::new(TrackedEngine(Arc::clone(&log))));
        let result = controller.execute("anything", Duration::from_secs(5)).await;
        assert!(result.is_success());

        for _ in 0..200 {
            if log.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*log.lock().unwrap(), vec!["thread exit", "unit dropped"]);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    }
}
