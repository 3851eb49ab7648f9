//! Core engine for scriptlink.
//!
//! This crate provides:
//! - The compilation pipeline (script source to cdylib via rustc)
//! - Entry-point discovery over the parsed script
//! - Isolation contexts that own each loaded script library
//! - Execution sessions with cooperative cancellation
//! - The single-flight execution controller
//!
//! Protocol plumbing lives in `scriptlink-server`; this crate has no
//! transport of its own.

pub mod compile;
pub mod engine;
pub mod error;
pub mod execute;

pub use compile::{
    CompilationError, CompilationErrorKind, CompilerConfig, Diagnostic, EntryKind, EntryPoint,
    ReferenceSet, RustcEngine, SourceLocation, ToolchainManager,
};
pub use engine::{Invocation, InvocationOutcome, ScriptEngine};
pub use error::{Error, Result};
pub use execute::{
    CancelResult, CancelSignal, EmptyHost, ExecuteResult, ExecutionController, ExecutionSession,
    FailureKind, HostContext, InvocationScope, IsolationContext, SessionId, SessionSnapshot,
    SessionStatus, StaticHost, format_duration,
};
