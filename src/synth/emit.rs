//! Merging fragments into one emitted unit.
//!
//! Emission is two-phase. [`merge`] builds a *template*: the complete unit
//! still carrying the bare class name. [`rename`] then renders the template
//! under a versioned type name. Fingerprinting the template, not the
//! rendered text, is what makes re-synthesis of unchanged inputs a no-op.
//!
//! ```text
//! using System;                      <- union of every fragment's usings
//! using Xamarin.Forms;
//!
//! namespace Demo.Views               <- declared namespace
//! {
//!     [XamlFilePath("MainPage.xaml")]
//!     public class MainPage : ContentPage    <- `partial` dropped
//!     {
//!         ...primary body...
//!         ...partial bodies...
//!         ...generated body (loader call rewritten)...
//!     }
//! }
//! ```

use regex::{NoExpand, Regex};
use rustc_hash::FxHashSet;

use super::{
    fragment::Fragment,
    lexer::{self, Token, TokenKind},
};

/// Inputs of one merge, all already parsed.
pub struct Parts<'a> {
    pub class_name: &'a str,
    pub namespace: Option<&'a str>,
    pub primary: &'a Fragment,
    pub partials: &'a [Fragment],
    pub aux: Option<&'a Fragment>,
}

impl Parts<'_> {
    fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        std::iter::once(self.primary)
            .chain(self.partials.iter())
            .chain(self.aux)
    }
}

/// Build the name-agnostic template for `parts`.
pub fn merge(parts: &Parts<'_>) -> String {
    let usings = dedup(parts.fragments().flat_map(|f| f.usings.iter()));
    let attributes = dedup(parts.fragments().flat_map(|f| f.attributes.iter()));
    let modifiers: Vec<&str> = parts
        .primary
        .modifiers
        .iter()
        .map(String::as_str)
        .filter(|m| *m != "partial")
        .collect();
    let base = parts.fragments().find_map(|f| f.base.as_deref());

    let indent = if parts.namespace.is_some() { "    " } else { "" };
    let mut out = String::new();

    for using in &usings {
        out.push_str(using);
        out.push('\n');
    }
    if !usings.is_empty() {
        out.push('\n');
    }
    if let Some(ns) = parts.namespace {
        out.push_str(&format!("namespace {ns}\n{{\n"));
    }
    for attribute in &attributes {
        out.push_str(&format!("{indent}{attribute}\n"));
    }

    out.push_str(indent);
    for modifier in &modifiers {
        out.push_str(modifier);
        out.push(' ');
    }
    out.push_str("class ");
    out.push_str(parts.class_name);
    if let Some(base) = base {
        out.push_str(" : ");
        out.push_str(base);
    }
    out.push_str(&format!("\n{indent}{{\n"));

    for fragment in parts.fragments() {
        let body = fragment.body.trim_start_matches(['\r', '\n']).trim_end();
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
    }

    out.push_str(&format!("{indent}}}\n"));
    if parts.namespace.is_some() {
        out.push_str("}\n");
    }
    out
}

fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut seen = FxHashSet::default();
    items
        .map(String::as_str)
        .filter(|item| seen.insert(*item))
        .collect()
}

// ============================================================================
// Renaming
// ============================================================================

/// Rename references to `class_name` in `template` to `new_name`.
///
/// Only identifier tokens are candidates, so strings, comments and
/// identifiers that merely contain the name are untouched. A member access
/// (`X.MainPage`) is renamed only when `X` is the class's own namespace.
pub fn rename(template: &str, class_name: &str, namespace: Option<&str>, new_name: &str) -> String {
    if class_name == new_name {
        return template.to_string();
    }
    let tokens = lexer::scan(template);
    let mut out = String::with_capacity(template.len() + 16);
    let mut last = 0;

    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Ident || token.text(template) != class_name {
            continue;
        }
        if !is_own_reference(template, &tokens, i, namespace) {
            continue;
        }
        out.push_str(&template[last..token.start]);
        out.push_str(new_name);
        last = token.end;
    }
    out.push_str(&template[last..]);
    out
}

/// Whether the identifier at `at` refers to the class itself.
fn is_own_reference(src: &str, tokens: &[Token], at: usize, namespace: Option<&str>) -> bool {
    let Some(prev) = lexer::prev_significant(tokens, at) else {
        return true;
    };
    if !tokens[prev].is_punct(src, '.') {
        return true;
    }
    match namespace {
        Some(ns) => qualifier(src, tokens, prev).as_deref() == Some(ns),
        None => false,
    }
}

/// Dotted qualifier ending at the `.` at `dot`, without any `global::` alias.
fn qualifier(src: &str, tokens: &[Token], dot: usize) -> Option<String> {
    let mut segments = Vec::new();
    let mut cursor = dot;

    loop {
        let ident = lexer::prev_significant(tokens, cursor)?;
        if tokens[ident].kind != TokenKind::Ident {
            return None;
        }
        segments.push(tokens[ident].text(src));

        match lexer::prev_significant(tokens, ident) {
            Some(p) if tokens[p].is_punct(src, '.') => cursor = p,
            Some(p) if tokens[p].is_punct(src, ':') => {
                // `alias::Name`: only `global::` is transparent
                let colon = lexer::prev_significant(tokens, p).filter(|&c| tokens[c].is_punct(src, ':'))?;
                let alias = lexer::prev_significant(tokens, colon)?;
                if !tokens[alias].is_ident(src, "global") {
                    return None;
                }
                break;
            }
            _ => break,
        }
    }

    segments.reverse();
    Some(segments.join("."))
}

// ============================================================================
// Loader rewrite
// ============================================================================

/// Replace the packaged markup load in `body` with a live-session load.
///
/// The replacement passes the instance and the current markup as a verbatim
/// string literal. Returns `None` when `loader` matches nothing.
pub fn rewrite_loader(body: &str, loader: &Regex, session_loader: &str, markup: &str) -> Option<String> {
    if !loader.is_match(body) {
        return None;
    }
    let call = format!(
        "{session_loader}(this, @\"{}\")",
        markup.replace('"', "\"\"")
    );
    Some(loader.replace_all(body, NoExpand(&call)).into_owned())
}
