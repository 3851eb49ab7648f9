//! Isolation contexts for compiled scripts.
//!
//! Each compilation gets its own uniquely named context: a private build
//! directory plus, once compiled, the loaded library. Dropping the context
//! unloads the library and removes the directory, so a context is released
//! on every path, success or failure.

use std::fs;
use std::path::{Path, PathBuf};

use libloading::Library;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A private, collectible home for one compiled script.
pub struct IsolationContext {
    name: String,
    dir: PathBuf,
    library: Option<Library>,
    unloaded: bool,
}

impl IsolationContext {
    /// Create a fresh context with its own directory under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        let id = Uuid::new_v4().simple().to_string();
        let dir = root.join(format!("script_{id}"));
        fs::create_dir_all(&dir)?;

        tracing::debug!(dir = %dir.display(), "isolation context created");

        Ok(Self {
            name: format!("Script_{id}"),
            dir,
            library: None,
            unloaded: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this context's build artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_loaded(&self) -> bool {
        self.library.is_some()
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    /// Load the compiled library into this context. A context holds at
    /// most one library and cannot be reused after unloading.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if self.unloaded {
            return Err(Error::Isolation(format!("{} was already unloaded", self.name)));
        }
        if self.library.is_some() {
            return Err(Error::Isolation(format!("{} already holds a library", self.name)));
        }

        // SAFETY: the library was just produced by our own compilation and
        // runs no initialisers beyond the Rust runtime's.
        let library = unsafe { Library::new(path)? };
        self.library = Some(library);

        tracing::debug!(context = %self.name, "library loaded");
        Ok(())
    }

    pub fn library(&self) -> Option<&Library> {
        self.library.as_ref()
    }

    /// Release the library and delete the build directory. Idempotent.
    pub fn unload(&mut self) {
        if self.unloaded {
            return;
        }
        self.unloaded = true;

        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                tracing::warn!(context = %self.name, "failed to close library: {}", e);
            }
        }

        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    context = %self.name,
                    dir = %self.dir.display(),
                    "failed to remove build directory: {}",
                    e
                );
            }
        }

        tracing::debug!(context = %self.name, "isolation context unloaded");
    }
}

impl Drop for IsolationContext {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for IsolationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationContext")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("loaded", &self.is_loaded())
            .field("unloaded", &self.unloaded)
            .finish()
    }
}
