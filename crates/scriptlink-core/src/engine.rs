//! The seam between the execution controller and whatever turns source
//! text into something runnable.
//!
//! `RustcEngine` is the production engine. Tests and embedders can supply
//! their own to drive the controller without a toolchain.

use futures::future::BoxFuture;

use crate::compile::CompilationError;
use crate::execute::InvocationScope;

/// How one invocation of a compiled script ended.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// The entry point returned a value.
    Completed(serde_json::Value),
    /// The entry point returned an error or panicked; text form of the fault.
    Faulted(String),
    /// The entry point stopped after observing cancellation.
    Cancelled,
}

/// A compiled script ready to run exactly once.
///
/// Dropping an invocation must release everything it holds. The controller
/// drops it only after the thread that ran it has fully exited, so
/// thread-local destructors registered by script code still find their
/// code mapped.
pub trait Invocation: Send {
    /// Run the entry point on the calling thread.
    ///
    /// Called once, from a dedicated thread, so it may block for as long as
    /// the script runs. Must not panic.
    fn invoke(&self, scope: &InvocationScope) -> InvocationOutcome;
}

/// Compiles script source into an [`Invocation`].
pub trait ScriptEngine: Send + Sync {
    fn compile<'a>(
        &'a self,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Invocation>, CompilationError>>;
}
