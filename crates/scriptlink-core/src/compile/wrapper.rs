//! Generation of the compilable wrapper around a script.
//!
//! Layout of the generated file:
//!
//! ```text
//! <script's own #![...] attributes>
//! #![allow(...)]
//! pub mod __scriptlink { <prelude> }
//! use __scriptlink::prelude::*;
//! <script source, with its inner attributes blanked>
//! <FFI entry shim>
//! ```
//!
//! The script is kept contiguous so rustc's line numbers map back onto it
//! by a fixed offset. Lifted attributes are overwritten with spaces in
//! place, so lines and columns do not move.

use proc_macro2::{Ident, LineColumn, Span, TokenStream};
use quote::{format_ident, quote};
use syn::spanned::Spanned;

use super::entry::{ENTRY_NAME, EntryKind, EntryPoint};
use super::prelude::PRELUDE_SOURCE;

/// Exported symbol the host resolves after loading the library.
pub const ENTRY_SYMBOL: &str = "__scriptlink_entry";

/// A generated wrapper plus where the script sits inside it.
#[derive(Debug, Clone)]
pub struct GeneratedSource {
    pub code: String,

    /// First line of the generated file holding script text (1-indexed)
    pub user_start_line: usize,

    /// Number of lines the script spans
    pub user_line_count: usize,
}

/// Wrap a script so rustc can build it into a cdylib exposing `ENTRY_SYMBOL`.
pub fn generate_wrapper(source: &str, file: &syn::File, entry: &EntryPoint) -> GeneratedSource {
    let (lifted, body) = lift_inner_attributes(source, file);
    let mut code = String::new();

    code.push_str("// Generated by scriptlink. Do not edit.\n");
    for attr in &lifted {
        code.push_str(attr);
        code.push('\n');
    }
    code.push_str("#![allow(unused, dead_code, non_snake_case, unused_imports)]\n\n");
    code.push_str("#[doc(hidden)]\npub mod __scriptlink {");
    code.push_str(PRELUDE_SOURCE);
    code.push_str("}\n\n");
    code.push_str("#[allow(unused_imports)]\nuse __scriptlink::prelude::*;\n\n");

    let user_start_line = code.lines().count() + 1;
    let user_line_count = source.lines().count().max(1);

    code.push_str(&body);
    if !body.ends_with('\n') {
        code.push('\n');
    }

    code.push('\n');
    code.push_str(&generate_entry_shim(entry, user_start_line, user_line_count).to_string());
    code.push('\n');

    GeneratedSource {
        code,
        user_start_line,
        user_line_count,
    }
}

/// Split the script's inner attributes (`#![...]`, `//!`) from its body.
///
/// Inner attributes are only legal at the top of a crate, which the prelude
/// now occupies. Returns the attribute texts and the body with each of them
/// replaced by spaces.
fn lift_inner_attributes(source: &str, file: &syn::File) -> (Vec<String>, String) {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    let mut lifted = Vec::new();
    let mut ranges = Vec::new();
    for attr in &file.attrs {
        if !matches!(attr.style, syn::AttrStyle::Inner(_)) {
            continue;
        }
        let span = attr.span();
        let (Some(start), Some(end)) = (
            byte_offset(source, &line_starts, span.start()),
            byte_offset(source, &line_starts, span.end()),
        ) else {
            continue;
        };
        if start < end {
            lifted.push(source[start..end].to_string());
            ranges.push(start..end);
        }
    }

    if ranges.is_empty() {
        return (lifted, source.to_string());
    }

    let body = source
        .char_indices()
        .map(|(i, c)| {
            if c != '\n' && ranges.iter().any(|r| r.contains(&i)) {
                ' '
            } else {
                c
            }
        })
        .collect();
    (lifted, body)
}

/// Byte offset of a span position (1-indexed line, 0-indexed char column).
fn byte_offset(source: &str, line_starts: &[usize], at: LineColumn) -> Option<usize> {
    let line_start = *line_starts.get(at.line.checked_sub(1)?)?;
    let line = &source[line_start..];
    let line = &line[..line.find('\n').unwrap_or(line.len())];
    if at.column == line.chars().count() {
        return Some(line_start + line.len());
    }
    line.char_indices().nth(at.column).map(|(i, _)| line_start + i)
}

/// The `extern "C"` export that runs the entry point inside the prelude's
/// runner, plus the script's line range for panic locations.
fn generate_entry_shim(entry: &EntryPoint, user_start_line: usize, user_line_count: usize) -> TokenStream {
    let symbol = format_ident!("{}", ENTRY_SYMBOL);
    let method = format_ident!("{}", ENTRY_NAME);
    let description = entry.describe();

    let (setup, call) = match &entry.kind {
        EntryKind::Free => (quote! {}, quote! { #method(ctx) }),
        EntryKind::Associated { type_name } => {
            let ty = type_ident(type_name);
            (quote! {}, quote! { #ty::#method(ctx) })
        }
        EntryKind::Instance { type_name } => {
            let ty = type_ident(type_name);
            (
                quote! {
                    #[allow(unused_mut)]
                    let mut instance = <#ty as ::core::default::Default>::default();
                },
                quote! { instance.#method(ctx) },
            )
        }
    };

    let call = if entry.is_async {
        quote! { __scriptlink::block_on(#call) }
    } else {
        call
    };

    let start = user_start_line as u32;
    let count = user_line_count as u32;

    quote! {
        #[doc(hidden)]
        pub const __SCRIPTLINK_USER_LINES: (u32, u32) = (#start, #count);

        #[no_mangle]
        pub unsafe extern "C" fn #symbol(host: *const __scriptlink::HostVtable) -> i32 {
            __scriptlink::run(host, #description, |ctx| {
                #setup
                #call
            })
        }
    }
}

fn type_ident(name: &str) -> Ident {
    match name.strip_prefix("r#") {
        Some(raw) => Ident::new_raw(raw, Span::call_site()),
        None => Ident::new(name, Span::call_site()),
    }
}
