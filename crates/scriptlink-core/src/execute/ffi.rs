//! FFI boundary between the host and a loaded script.
//!
//! The host hands the script a `HostVtable` whose callbacks close over a
//! `HostBridge` living on the invoking thread's stack. The script never
//! allocates memory the host has to free: results are copied out through
//! `emit` before the entry function returns.

use std::cell::RefCell;
use std::os::raw::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Deserialize;

use super::host::InvocationScope;
use crate::engine::InvocationOutcome;

/// Status code returned by the entry function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExecutionStatus {
    /// Entry point returned `Ok`
    Completed = 0,
    /// Entry point returned `Err` or panicked
    Faulted = 1,
    /// Entry point stopped after cancellation was requested
    Cancelled = 2,
}

impl From<i32> for ExecutionStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Completed,
            2 => Self::Cancelled,
            _ => Self::Faulted, // Unknown codes treated as faults
        }
    }
}

/// Sink callback the script passes to `query` for receiving bytes.
pub type PushFn = unsafe extern "C" fn(*mut c_void, *const u8, usize);

/// Callback table shared with the script. Layout must match the prelude.
#[repr(C)]
pub struct HostVtable {
    pub data: *const c_void,
    pub is_cancelled: unsafe extern "C" fn(*const c_void) -> bool,
    pub query: unsafe extern "C" fn(*const c_void, *const u8, usize, *mut c_void, PushFn) -> i32,
    pub emit: unsafe extern "C" fn(*const c_void, i32, *const u8, usize),
}

/// Signature of the exported script entry.
pub type EntryFn = unsafe extern "C" fn(*const HostVtable) -> i32;

/// Host-side state behind `HostVtable::data`.
pub(crate) struct HostBridge<'a> {
    scope: &'a InvocationScope,
    emitted: RefCell<Option<(i32, Vec<u8>)>>,
}

impl<'a> HostBridge<'a> {
    pub(crate) fn new(scope: &'a InvocationScope) -> Self {
        Self {
            scope,
            emitted: RefCell::new(None),
        }
    }

    /// Build a vtable pointing at this bridge. The bridge must outlive
    /// every call made through it.
    pub(crate) fn vtable(&self) -> HostVtable {
        HostVtable {
            data: self as *const Self as *const c_void,
            is_cancelled: bridge_is_cancelled,
            query: bridge_query,
            emit: bridge_emit,
        }
    }

    /// Interpret the entry function's status together with what it emitted.
    pub(crate) fn into_outcome(self, status: i32) -> InvocationOutcome {
        let payload = self.emitted.into_inner().map(|(_, bytes)| bytes);

        match ExecutionStatus::from(status) {
            ExecutionStatus::Cancelled => InvocationOutcome::Cancelled,
            ExecutionStatus::Completed => {
                let Some(bytes) = payload else {
                    return InvocationOutcome::Faulted(
                        "ProtocolError: script completed without emitting a result".to_string(),
                    );
                };
                match serde_json::from_slice(&bytes) {
                    Ok(value) => InvocationOutcome::Completed(value),
                    Err(e) => InvocationOutcome::Faulted(format!(
                        "SerializationError: script result is not valid JSON: {e}"
                    )),
                }
            }
            ExecutionStatus::Faulted => {
                let report = payload
                    .and_then(|bytes| serde_json::from_slice::<FaultReport>(&bytes).ok())
                    .unwrap_or_else(|| FaultReport {
                        kind: "ScriptFault".to_string(),
                        message: format!("entry point failed with status {status}"),
                        trace: String::new(),
                    });
                InvocationOutcome::Faulted(report.to_string())
            }
        }
    }
}

/// Fault payload emitted by the prelude's runner.
#[derive(Debug, Deserialize)]
pub(crate) struct FaultReport {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub trace: String,
}

impl std::fmt::Display for FaultReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.trace.is_empty() {
            write!(f, "\n{}", self.trace)?;
        }
        Ok(())
    }
}

// Callbacks must never unwind into script frames.

unsafe extern "C" fn bridge_is_cancelled(data: *const c_void) -> bool {
    let bridge = unsafe { &*(data as *const HostBridge<'_>) };
    bridge.scope.is_cancelled()
}

unsafe extern "C" fn bridge_query(
    data: *const c_void,
    name_ptr: *const u8,
    name_len: usize,
    sink: *mut c_void,
    push: PushFn,
) -> i32 {
    let bridge = unsafe { &*(data as *const HostBridge<'_>) };
    let bytes = unsafe { std::slice::from_raw_parts(name_ptr, name_len) };
    let Ok(name) = std::str::from_utf8(bytes) else {
        return -1;
    };

    let resolved = catch_unwind(AssertUnwindSafe(|| bridge.scope.resolve(name)));
    match resolved {
        Ok(Some(value)) => {
            let text = value.to_string();
            unsafe { push(sink, text.as_ptr(), text.len()) };
            0
        }
        Ok(None) => 1,
        Err(_) => {
            tracing::warn!(name, "host context panicked while resolving a value");
            -1
        }
    }
}

unsafe extern "C" fn bridge_emit(data: *const c_void, status: i32, ptr: *const u8, len: usize) {
    let bridge = unsafe { &*(data as *const HostBridge<'_>) };
    let bytes = if ptr.is_null() {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
    };
    if let Ok(mut slot) = bridge.emitted.try_borrow_mut() {
        *slot = Some((status, bytes));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::execute::{CancelSignal, StaticHost};

    fn scope() -> InvocationScope {
        let host = StaticHost::new().with("answer", 42);
        InvocationScope::new(CancelSignal::new(), Arc::new(host))
    }

    unsafe extern "C" fn collect(sink: *mut c_void, ptr: *const u8, len: usize) {
        let buf = unsafe { &mut *(sink as *mut Vec<u8>) };
        buf.extend_from_slice(unsafe { std::slice::from_raw_parts(ptr, len) });
    }

    fn emit(vtable: &HostVtable, status: i32, payload: &str) {
        unsafe { (vtable.emit)(vtable.data, status, payload.as_ptr(), payload.len()) };
    }

    #[test]
    fn test_execution_status_from_code() {
        assert_eq!(ExecutionStatus::from(0), ExecutionStatus::Completed);
        assert_eq!(ExecutionStatus::from(1), ExecutionStatus::Faulted);
        assert_eq!(ExecutionStatus::from(2), ExecutionStatus::Cancelled);
        assert_eq!(ExecutionStatus::from(-7), ExecutionStatus::Faulted);
    }

    #[test]
    fn test_query_through_vtable() {
        let scope = scope();
        let bridge = HostBridge::new(&scope);
        let vtable = bridge.vtable();

        let mut buf: Vec<u8> = Vec::new();
        let name = "answer";
        let found = unsafe {
            (vtable.query)(
                vtable.data,
                name.as_ptr(),
                name.len(),
                &mut buf as *mut Vec<u8> as *mut c_void,
                collect,
            )
        };
        assert_eq!(found, 0);
        assert_eq!(buf, b"42");

        let missing = "nope";
        let found = unsafe {
            (vtable.query)(
                vtable.data,
                missing.as_ptr(),
                missing.len(),
                &mut buf as *mut Vec<u8> as *mut c_void,
                collect,
            )
        };
        assert_eq!(found, 1);
    }

    #[test]
    fn test_cancellation_through_vtable() {
        let signal = CancelSignal::new();
        let scope = InvocationScope::new(signal.clone(), Arc::new(StaticHost::new()));
        let bridge = HostBridge::new(&scope);
        let vtable = bridge.vtable();

        assert!(!unsafe { (vtable.is_cancelled)(vtable.data) });
        signal.cancel();
        assert!(unsafe { (vtable.is_cancelled)(vtable.data) });
    }

    #[test]
    fn test_completed_outcome() {
        let scope = scope();
        let bridge = HostBridge::new(&scope);
        emit(&bridge.vtable(), 0, r#"{"b":1,"a":[true,null]}"#);

        assert_eq!(
            bridge.into_outcome(0),
            InvocationOutcome::Completed(json!({"a": [true, null], "b": 1}))
        );
    }

    #[test]
    fn test_fault_outcome_text() {
        let scope = scope();
        let bridge = HostBridge::new(&scope);
        emit(
            &bridge.vtable(),
            1,
            r#"{"kind":"ParseIntError","message":"invalid digit found in string","trace":"   at execute"}"#,
        );

        assert_eq!(
            bridge.into_outcome(1),
            InvocationOutcome::Faulted(
                "ParseIntError: invalid digit found in string\n   at execute".to_string()
            )
        );
    }

    #[test]
    fn test_missing_payload_is_a_fault() {
        let scope = scope();
        let bridge = HostBridge::new(&scope);

        let InvocationOutcome::Faulted(text) = bridge.into_outcome(0) else {
            panic!("expected a fault");
        };
        assert!(text.starts_with("ProtocolError"));
    }

    #[test]
    fn test_cancelled_status_ignores_payload() {
        let scope = scope();
        let bridge = HostBridge::new(&scope);
        emit(&bridge.vtable(), 2, r#"{"kind":"panic","message":"x","trace":""}"#);

        assert_eq!(bridge.into_outcome(2), InvocationOutcome::Cancelled);
    }
}
