//! Entry-point discovery.
//!
//! A script is run by calling one `execute` function. Eligible shapes:
//!
//! ```text
//! pub fn execute(ctx: &ScriptContext) -> Result<T, E>                // free
//! impl Script { pub fn execute(ctx: &ScriptContext) -> Result<T, E> } // associated
//! impl Script { pub fn execute(&self, ctx: &ScriptContext) -> ... }   // instance
//! ```
//!
//! Any of them may be `async`. The impl forms require `Script` to be a
//! `pub`, non-generic struct declared in the script, and the instance form
//! builds it with `Default::default()`. Exactly one candidate must exist.

use rustc_hash::FxHashSet;
use syn::{FnArg, ImplItem, Item, ReturnType, Signature, Type, Visibility};

use super::errors::{CompilationError, CompilationErrorKind, Diagnostic};

/// Name every entry point must carry.
pub const ENTRY_NAME: &str = "execute";

/// How the generated shim reaches the entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Top-level `pub fn execute`.
    Free,
    /// `Type::execute(ctx)` with no receiver.
    Associated { type_name: String },
    /// `Type::default().execute(ctx)`.
    Instance { type_name: String },
}

/// The selected entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub kind: EntryKind,
    pub is_async: bool,
    /// Script line of the `execute` identifier (1-indexed)
    pub line: usize,
    /// Script column of the `execute` identifier (1-indexed)
    pub column: usize,
}

impl EntryPoint {
    /// Path used in logs and fault traces, e.g. `Script::execute`.
    pub fn describe(&self) -> String {
        match &self.kind {
            EntryKind::Free => ENTRY_NAME.to_string(),
            EntryKind::Associated { type_name } | EntryKind::Instance { type_name } => {
                format!("{type_name}::{ENTRY_NAME}")
            }
        }
    }

    /// Whether the shim has to construct an instance first.
    pub fn is_instance(&self) -> bool {
        matches!(self.kind, EntryKind::Instance { .. })
    }
}

/// Locate the single eligible entry point in a parsed script.
pub fn find_entry_point(file: &syn::File) -> Result<EntryPoint, CompilationError> {
    let public_structs: FxHashSet<String> = file
        .items
        .iter()
        .filter_map(|item| match item {
            Item::Struct(s) if is_public(&s.vis) && s.generics.params.is_empty() => {
                Some(s.ident.to_string())
            }
            _ => None,
        })
        .collect();

    let mut candidates = Vec::new();

    for item in &file.items {
        match item {
            Item::Fn(f) if is_public(&f.vis) => {
                if let Some(Shape::Static) = classify(&f.sig) {
                    candidates.push(entry_point(EntryKind::Free, &f.sig));
                }
            }
            Item::Impl(imp) if imp.trait_.is_none() && imp.generics.params.is_empty() => {
                let Some(type_name) = plain_type_name(&imp.self_ty) else {
                    continue;
                };
                if !public_structs.contains(&type_name) {
                    continue;
                }
                for impl_item in &imp.items {
                    let ImplItem::Fn(method) = impl_item else {
                        continue;
                    };
                    if !is_public(&method.vis) {
                        continue;
                    }
                    let kind = match classify(&method.sig) {
                        Some(Shape::Static) => EntryKind::Associated {
                            type_name: type_name.clone(),
                        },
                        Some(Shape::Receiver) => EntryKind::Instance {
                            type_name: type_name.clone(),
                        },
                        None => continue,
                    };
                    candidates.push(entry_point(kind, &method.sig));
                }
            }
            _ => {}
        }
    }

    match candidates.len() {
        0 => Err(CompilationError {
            kind: CompilationErrorKind::NoEntryPoint,
            diagnostics: vec![Diagnostic::new(
                "no entry point found: expected `pub fn execute(ctx: &ScriptContext) -> Result<T, E>` \
                 as a free function or in an impl of a pub non-generic struct",
            )],
        }),
        1 => Ok(candidates.remove(0)),
        n => Err(CompilationError {
            kind: CompilationErrorKind::AmbiguousEntryPoint,
            diagnostics: candidates
                .iter()
                .map(|c| {
                    Diagnostic::at(
                        format!("ambiguous entry point: `{}` is one of {n} candidates", c.describe()),
                        c.line,
                        c.column,
                    )
                })
                .collect(),
        }),
    }
}

enum Shape {
    Static,
    Receiver,
}

/// Check a signature against the convention and report its shape.
fn classify(sig: &Signature) -> Option<Shape> {
    if sig.ident != ENTRY_NAME
        || !sig.generics.params.is_empty()
        || sig.constness.is_some()
        || sig.unsafety.is_some()
        || sig.abi.is_some()
        || sig.variadic.is_some()
        || !returns_result(&sig.output)
    {
        return None;
    }

    let mut inputs = sig.inputs.iter();
    let shape = match inputs.next()? {
        // `self: Box<Self>` and friends cannot be called on a fresh value.
        FnArg::Receiver(r) if r.colon_token.is_none() => match inputs.next()? {
            FnArg::Typed(_) => Shape::Receiver,
            FnArg::Receiver(_) => return None,
        },
        FnArg::Receiver(_) => return None,
        FnArg::Typed(_) => Shape::Static,
    };

    inputs.next().is_none().then_some(shape)
}

fn returns_result(output: &ReturnType) -> bool {
    let ReturnType::Type(_, ty) = output else {
        return false;
    };
    let Type::Path(path) = ty.as_ref() else {
        return false;
    };
    path.path
        .segments
        .last()
        .is_some_and(|seg| seg.ident.to_string().ends_with("Result"))
}

fn plain_type_name(ty: &Type) -> Option<String> {
    let Type::Path(path) = ty else {
        return None;
    };
    if path.qself.is_some() || path.path.segments.len() != 1 {
        return None;
    }
    let segment = path.path.segments.first()?;
    segment
        .arguments
        .is_empty()
        .then(|| segment.ident.to_string())
}

fn is_public(vis: &Visibility) -> bool {
    matches!(vis, Visibility::Public(_))
}

fn entry_point(kind: EntryKind, sig: &Signature) -> EntryPoint {
    let start = sig.ident.span().start();
    EntryPoint {
        kind,
        is_async: sig.asyncness.is_some(),
        line: start.line,
        column: start.column + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(source: &str) -> Result<EntryPoint, CompilationError> {
        find_entry_point(&syn::parse_file(source).unwrap())
    }

    #[test]
    fn test_free_function() {
        let entry = find(
            "pub fn execute(ctx: &ScriptContext) -> Result<i64, String> {\n    Ok(42)\n}\n",
        )
        .unwrap();

        assert_eq!(entry.kind, EntryKind::Free);
        assert!(!entry.is_async);
        assert_eq!(entry.line, 1);
        assert_eq!(entry.column, 8);
        assert_eq!(entry.describe(), "execute");
    }

    #[test]
    fn test_associated_function() {
        let source = r#"
pub struct Script;

impl Script {
    pub fn execute(ctx: &ScriptContext) -> Result<i64, String> {
        Ok(1)
    }
}
"#;
        let entry = find(source).unwrap();
        assert_eq!(
            entry.kind,
            EntryKind::Associated {
                type_name: "Script".to_string()
            }
        );
        assert_eq!(entry.line, 5);
        assert_eq!(entry.describe(), "Script::execute");
    }

    #[test]
    fn test_instance_method_and_async() {
        let source = r#"
#[derive(Default)]
pub struct Counter { start: i64 }

impl Counter {
    pub async fn execute(&self, ctx: &ScriptContext) -> anyhow::Result<i64> {
        Ok(self.start)
    }
}
"#;
        let entry = find(source).unwrap();
        assert!(entry.is_instance());
        assert!(entry.is_async);
        assert_eq!(entry.describe(), "Counter::execute");
    }

    #[test]
    fn test_ineligible_shapes_are_ignored() {
        let source = r#"
fn execute(ctx: &ScriptContext) -> Result<i64, String> { Ok(1) }
pub fn execute_later(ctx: &ScriptContext) -> Result<i64, String> { Ok(1) }

struct Hidden;
impl Hidden {
    pub fn execute(ctx: &ScriptContext) -> Result<i64, String> { Ok(1) }
}

pub struct Generic<T>(T);
impl<T> Generic<T> {
    pub fn execute(ctx: &ScriptContext) -> Result<i64, String> { Ok(1) }
}

pub struct Script;
impl Script {
    pub fn execute() -> Result<i64, String> { Ok(1) }
    pub fn helper(ctx: &ScriptContext) -> Result<i64, String> { Ok(1) }
}
impl Default for Script {
    fn default() -> Self { Script }
}

pub fn other(ctx: &ScriptContext) -> i64 { 1 }
"#;
        let err = find(source).unwrap_err();
        assert_eq!(err.kind, CompilationErrorKind::NoEntryPoint);
        assert_eq!(err.diagnostics.len(), 1);
    }

    #[test]
    fn test_non_result_return_is_not_eligible() {
        let err = find("pub fn execute(ctx: &ScriptContext) -> i64 { 42 }").unwrap_err();
        assert_eq!(err.kind, CompilationErrorKind::NoEntryPoint);
    }

    #[test]
    fn test_ambiguous_candidates_are_all_reported() {
        let source = r#"
pub fn execute(ctx: &ScriptContext) -> Result<i64, String> { Ok(1) }

pub struct Script;
impl Script {
    pub fn execute(ctx: &ScriptContext) -> Result<i64, String> { Ok(2) }
}
"#;
        let err = find(source).unwrap_err();
        assert_eq!(err.kind, CompilationErrorKind::AmbiguousEntryPoint);
        assert_eq!(err.diagnostics.len(), 2);

        let lines: Vec<_> = err
            .diagnostics
            .iter()
            .map(|d| d.location.unwrap().line)
            .collect();
        assert_eq!(lines, vec![2, 6]);
        assert!(err.diagnostics[1].message.contains("Script::execute"));
    }
}
