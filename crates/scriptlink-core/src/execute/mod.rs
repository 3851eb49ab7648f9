//! Execution of compiled scripts.
//!
//! Handles loading into isolation contexts, the FFI bridge to the host,
//! execution sessions and the single-flight controller.

mod cancel;
mod controller;
mod ffi;
mod host;
mod isolation;
mod session;
mod unit;

pub use cancel::CancelSignal;
pub use controller::{
    CancelResult, ExecuteResult, ExecutionController, FailureKind, format_duration,
};
pub use ffi::{EntryFn, ExecutionStatus, HostVtable};
pub use host::{EmptyHost, HostContext, InvocationScope, StaticHost};
pub use isolation::IsolationContext;
pub use session::{ExecutionSession, SessionId, SessionSnapshot, SessionStatus};
pub use unit::CompiledUnit;
