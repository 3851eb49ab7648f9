//! Resolution of the crates a script may link against.
//!
//! Every `lib<name>-<hash>.rlib` found in the reference directories becomes
//! an `--extern <name>=<path>` flag. Primary directories are scanned before
//! the secondary "default" set; the first crate of a given name wins, and
//! names are compared case-insensitively. Artifacts without a usable path
//! are skipped silently.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

/// One crate made visible to scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternCrate {
    pub name: String,
    pub path: PathBuf,
}

/// The resolved set of crates and search paths for one compilation.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    externs: Vec<ExternCrate>,
    search_dirs: Vec<PathBuf>,
}

impl ReferenceSet {
    /// Scan `primary`, then `secondary`, keeping the first crate per name.
    pub fn resolve(primary: &[PathBuf], secondary: &[PathBuf]) -> Self {
        let mut set = Self::default();
        let mut seen_names = FxHashSet::default();
        let mut seen_paths = FxHashSet::default();
        let mut seen_dirs = FxHashSet::default();

        for dir in primary.iter().chain(secondary) {
            set.add_dir(dir, &mut seen_names, &mut seen_paths, &mut seen_dirs);
        }

        tracing::debug!(
            externs = set.externs.len(),
            search_dirs = set.search_dirs.len(),
            "resolved script references"
        );
        set
    }

    pub fn externs(&self) -> &[ExternCrate] {
        &self.externs
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    pub fn is_empty(&self) -> bool {
        self.externs.is_empty()
    }

    /// Whether a crate of this name is available to scripts.
    pub fn contains(&self, name: &str) -> bool {
        self.externs
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// rustc arguments that expose this set.
    pub fn rustc_args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.search_dirs.len() * 2 + self.externs.len() * 2);

        for dir in &self.search_dirs {
            let mut value = OsString::from("dependency=");
            value.push(dir);
            args.push(OsString::from("-L"));
            args.push(value);
        }

        for ext in &self.externs {
            let mut value = OsString::from(&ext.name);
            value.push("=");
            value.push(&ext.path);
            args.push(OsString::from("--extern"));
            args.push(value);
        }

        args
    }

    fn add_dir(
        &mut self,
        dir: &Path,
        seen_names: &mut FxHashSet<String>,
        seen_paths: &mut FxHashSet<PathBuf>,
        seen_dirs: &mut FxHashSet<PathBuf>,
    ) {
        let Ok(canonical_dir) = dir.canonicalize() else {
            return;
        };
        if !seen_dirs.insert(canonical_dir.clone()) {
            return;
        }
        let Ok(entries) = fs::read_dir(&canonical_dir) else {
            return;
        };

        self.search_dirs.push(canonical_dir);

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        files.sort();

        for file in files {
            let Some(name) = file
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(crate_name_from_file)
            else {
                continue;
            };
            let Ok(path) = file.canonicalize() else {
                continue;
            };
            if !path.is_file() || seen_paths.contains(&path) {
                continue;
            }
            if !seen_names.insert(name.to_ascii_lowercase()) {
                continue;
            }
            seen_paths.insert(path.clone());
            self.externs.push(ExternCrate {
                name: name.to_string(),
                path,
            });
        }
    }
}

/// `libserde_json-1a2b3c.rlib` -> `serde_json`.
fn crate_name_from_file(file_name: &str) -> Option<&str> {
    let stem = file_name.strip_prefix("lib")?.strip_suffix(".rlib")?;
    let name = match stem.rsplit_once('-') {
        Some((name, _hash)) => name,
        None => stem,
    };
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    valid.then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_crate_name_from_file() {
        assert_eq!(crate_name_from_file("libserde_json-1a2b3c.rlib"), Some("serde_json"));
        assert_eq!(crate_name_from_file("liblibc-0011.rlib"), Some("libc"));
        assert_eq!(crate_name_from_file("libplain.rlib"), Some("plain"));
        assert_eq!(crate_name_from_file("libserde-abc.rmeta"), None);
        assert_eq!(crate_name_from_file("serde-abc.rlib"), None);
        assert_eq!(crate_name_from_file("libserde_derive-abc.so"), None);
    }

    #[test]
    fn test_primary_wins_over_default() {
        let primary = tempfile::tempdir().unwrap();
        let secondary = tempfile::tempdir().unwrap();
        touch(primary.path(), "libfoo-aaaa.rlib");
        touch(secondary.path(), "libfoo-bbbb.rlib");
        touch(secondary.path(), "libbar-cccc.rlib");

        let set = ReferenceSet::resolve(
            &[primary.path().to_path_buf()],
            &[secondary.path().to_path_buf()],
        );

        assert_eq!(set.externs().len(), 2);
        let foo = set.externs().iter().find(|e| e.name == "foo").unwrap();
        assert!(foo.path.ends_with("libfoo-aaaa.rlib"));
        assert!(set.contains("bar"));
        assert_eq!(set.search_dirs().len(), 2);
    }

    #[test]
    fn test_names_dedupe_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libFoo-1111.rlib");
        touch(dir.path(), "libfoo-2222.rlib");

        let set = ReferenceSet::resolve(&[dir.path().to_path_buf()], &[]);
        assert_eq!(set.externs().len(), 1);
        assert!(set.contains("FOO"));
    }

    #[test]
    fn test_unusable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libgood-1234.rlib");
        touch(dir.path(), "notes.txt");
        #[cfg(unix)]
        std::os::unix::fs::symlink(dir.path().join("missing.rlib"), dir.path().join("libdangling-1.rlib"))
            .unwrap();

        let set = ReferenceSet::resolve(
            &[dir.path().to_path_buf(), PathBuf::from("/nonexistent/scriptlink/refs")],
            &[],
        );

        assert_eq!(set.externs().len(), 1);
        assert_eq!(set.externs()[0].name, "good");
        assert_eq!(set.search_dirs().len(), 1);
    }

    #[test]
    fn test_rustc_args_shape() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libfoo-1.rlib");
        let set = ReferenceSet::resolve(&[dir.path().to_path_buf()], &[]);

        let args: Vec<String> = set
            .rustc_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "-L");
        assert!(args[1].starts_with("dependency="));
        assert_eq!(args[2], "--extern");
        assert!(args[3].starts_with("foo="));
        assert!(args[3].ends_with("libfoo-1.rlib"));
    }
}
