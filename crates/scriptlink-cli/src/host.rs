//! Host values this process exposes to scripts.

use std::time::Instant;

use serde_json::Value;

use scriptlink_core::HostContext;

/// Read-only facts about the running process.
///
/// | name | value |
/// |---|---|
/// | `process.pid` | operating-system process id |
/// | `process.uptime_ms` | milliseconds since the host started |
/// | `process.cwd` | current working directory |
/// | `host.name` | `scriptlink` |
/// | `host.version` | package version |
pub struct ProcessHost {
    started_at: Instant,
}

impl ProcessHost {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Default for ProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext for ProcessHost {
    fn resolve(&self, name: &str) -> Option<Value> {
        match name {
            "process.pid" => Some(std::process::id().into()),
            "process.uptime_ms" => Some((self.started_at.elapsed().as_millis() as u64).into()),
            "process.cwd" => std::env::current_dir()
                .ok()
                .map(|dir| dir.display().to_string().into()),
            "host.name" => Some("scriptlink".into()),
            "host.version" => Some(env!("CARGO_PKG_VERSION").into()),
            _ => None,
        }
    }
}
