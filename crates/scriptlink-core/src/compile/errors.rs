//! Compilation diagnostics and their mapping onto script lines.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A location in the script's own source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    /// Line number (1-indexed)
    pub line: usize,

    /// Column number (1-indexed)
    pub column: usize,
}

/// One error-severity finding from compilation.
///
/// `location` is `None` when the finding has no position in the user's
/// text, e.g. it points into generated glue or concerns the whole script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Error message
    pub message: String,

    /// Error code (e.g., "E0308")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Primary location in the script
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    /// A diagnostic with no location.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            location: None,
        }
    }

    /// A diagnostic anchored at a script line and column.
    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            code: None,
            location: Some(SourceLocation { line, column }),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "Line {}, column {}: ", loc.line, loc.column)?;
        }
        match &self.code {
            Some(code) => write!(f, "{} [{code}]", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Why a compilation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationErrorKind {
    /// The parser or rustc reported errors.
    Diagnostics,
    /// No item matched the entry-point convention.
    NoEntryPoint,
    /// More than one item matched the entry-point convention.
    AmbiguousEntryPoint,
    /// rustc could not be run, timed out, or its output could not be loaded.
    Toolchain,
}

/// A rejected compilation: a kind plus every error-severity diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationError {
    pub kind: CompilationErrorKind,
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::error::Error for CompilationError {}

impl CompilationError {
    /// Errors reported by the parser or rustc.
    pub fn diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            kind: CompilationErrorKind::Diagnostics,
            diagnostics,
        }
    }

    /// An infrastructure failure while compiling.
    pub fn toolchain(message: impl Into<String>) -> Self {
        Self {
            kind: CompilationErrorKind::Toolchain,
            diagnostics: vec![Diagnostic::new(message)],
        }
    }

    /// Convert a `syn` parse failure, keeping every combined error.
    pub fn from_syntax(error: syn::Error) -> Self {
        let diagnostics = error
            .into_iter()
            .map(|e| {
                let start = e.span().start();
                // proc-macro2 columns are 0-indexed
                Diagnostic::at(e.to_string(), start.line, start.column + 1)
            })
            .collect();
        Self::diagnostics(diagnostics)
    }

    /// Text form: a header line, then one indented line per diagnostic.
    pub fn render(&self) -> String {
        let mut out = String::from("Compilation failed:");
        for diagnostic in &self.diagnostics {
            out.push_str("\n  ");
            out.push_str(&diagnostic.to_string());
        }
        out
    }
}

/// Rustc JSON diagnostic format.
#[derive(Debug, Deserialize)]
pub struct RustcDiagnostic {
    pub message: String,
    pub code: Option<RustcCode>,
    pub level: String,
    pub spans: Vec<RustcSpan>,
}

#[derive(Debug, Deserialize)]
pub struct RustcCode {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RustcSpan {
    pub line_start: usize,
    pub column_start: usize,
    pub is_primary: bool,
}

/// Maps rustc diagnostics on the generated file back to script lines.
///
/// The script occupies a contiguous block of the generated file; anything
/// outside that block belongs to glue code and gets no location.
#[derive(Debug, Clone, Copy)]
pub struct ErrorMapper {
    /// First generated line holding script text (1-indexed)
    user_start_line: usize,

    /// Number of script lines
    user_line_count: usize,
}

impl ErrorMapper {
    pub fn new(user_start_line: usize, user_line_count: usize) -> Self {
        Self {
            user_start_line,
            user_line_count,
        }
    }

    /// Parse rustc JSON output, keeping only error-level diagnostics.
    pub fn parse_rustc_output(&self, json_output: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for line in json_output.lines() {
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<RustcDiagnostic>(line) {
                Ok(diagnostic) => {
                    if let Some(mapped) = self.map_diagnostic(&diagnostic) {
                        diagnostics.push(mapped);
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        "Failed to parse rustc JSON: {} (line: {})",
                        e,
                        line.chars().take(100).collect::<String>()
                    );
                }
            }
        }

        diagnostics
    }

    fn map_diagnostic(&self, diagnostic: &RustcDiagnostic) -> Option<Diagnostic> {
        if diagnostic.level != "error" {
            return None;
        }

        // The trailing summary carries no span and repeats the count.
        if diagnostic.spans.is_empty() && diagnostic.message.starts_with("aborting due to") {
            return None;
        }

        let location = diagnostic
            .spans
            .iter()
            .find(|s| s.is_primary)
            .and_then(|span| {
                self.map_line(span.line_start).map(|line| SourceLocation {
                    line,
                    column: span.column_start,
                })
            });

        Some(Diagnostic {
            message: diagnostic.message.clone(),
            code: diagnostic.code.as_ref().map(|c| c.code.clone()),
            location,
        })
    }

    /// Map a generated line number to a script line number.
    pub fn map_line(&self, generated_line: usize) -> Option<usize> {
        let end = self.user_start_line + self.user_line_count;
        (self.user_start_line..end)
            .contains(&generated_line)
            .then(|| generated_line - self.user_start_line + 1)
    }
}
