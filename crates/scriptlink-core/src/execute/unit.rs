//! A compiled, loaded script awaiting its single invocation.

use crate::compile::{ENTRY_SYMBOL, EntryPoint};
use crate::engine::{Invocation, InvocationOutcome};

use super::ffi::{EntryFn, HostBridge};
use super::host::InvocationScope;
use super::isolation::IsolationContext;

/// Loaded library plus the entry point it exports.
#[derive(Debug)]
pub struct CompiledUnit {
    context: IsolationContext,
    entry: EntryPoint,
}

impl CompiledUnit {
    pub fn new(context: IsolationContext, entry: EntryPoint) -> Self {
        Self { context, entry }
    }

    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    pub fn context_name(&self) -> &str {
        self.context.name()
    }

    fn call(&self, scope: &InvocationScope) -> InvocationOutcome {
        let Some(library) = self.context.library() else {
            return InvocationOutcome::Faulted(format!(
                "LoadError: {} holds no library",
                self.context.name()
            ));
        };

        // SAFETY: the symbol is emitted by our wrapper with this exact signature.
        let entry_fn = match unsafe { library.get::<EntryFn>(ENTRY_SYMBOL.as_bytes()) } {
            Ok(symbol) => symbol,
            Err(e) => return InvocationOutcome::Faulted(format!("SymbolNotFound: {e}")),
        };

        let bridge = HostBridge::new(scope);
        let vtable = bridge.vtable();

        tracing::debug!(
            context = self.context.name(),
            entry = %self.entry.describe(),
            "invoking script"
        );

        // SAFETY: `vtable` and `bridge` outlive the call; the shim catches
        // every panic before returning.
        let status = unsafe { entry_fn(&vtable) };
        bridge.into_outcome(status)
    }
}

/// The library stays mapped until the unit is dropped; dropping unloads it.
impl Invocation for CompiledUnit {
    fn invoke(&self, scope: &InvocationScope) -> InvocationOutcome {
        self.call(scope)
    }
}
