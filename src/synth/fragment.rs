//! Structured model of one source fragment.
//!
//! A fragment is a document contributing members to a view class: the
//! hand-written behavior file, additional partial files, or the generated
//! behind-code. Merging needs four things from each: its `using` directives,
//! the enclosing namespace, the class header, and the class body.

use std::ops::Range;

use thiserror::Error;

use super::lexer::{self, Token, TokenKind};

/// Modifiers that may precede `class` in a declaration header.
const MODIFIERS: &[&str] = &[
    "public", "internal", "private", "protected", "sealed", "abstract", "static", "partial",
    "unsafe", "new",
];

/// Outline of every top-level class declared in a document.
#[derive(Debug, Clone, Default)]
pub struct Outline {
    /// `using` directives, whitespace-collapsed, in source order.
    pub usings: Vec<String>,
    pub classes: Vec<ClassDecl>,
}

/// One class declaration found by [`outline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDecl {
    pub namespace: Option<String>,
    pub attributes: Vec<String>,
    pub modifiers: Vec<String>,
    pub name: String,
    /// Base list and constraints after `:`, whitespace-collapsed.
    pub base: Option<String>,
    /// Byte range of the body between the braces.
    pub body: Range<usize>,
}

impl ClassDecl {
    pub fn is_partial(&self) -> bool {
        self.modifiers.iter().any(|m| m == "partial")
    }

    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A parsed fragment for one specific class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub usings: Vec<String>,
    pub namespace: Option<String>,
    pub attributes: Vec<String>,
    pub modifiers: Vec<String>,
    pub base: Option<String>,
    pub body: String,
}

/// Why a fragment could not be modeled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentIssue {
    #[error("class declaration not found")]
    ClassNotFound,
    #[error("class body is not closed")]
    Unbalanced,
}

/// Extract the fragment contributing to `class_name`.
pub fn parse(src: &str, class_name: &str) -> Result<Fragment, FragmentIssue> {
    let outline = outline(src)?;
    let decl = outline
        .classes
        .into_iter()
        .find(|c| c.name == class_name)
        .ok_or(FragmentIssue::ClassNotFound)?;

    Ok(Fragment {
        usings: outline.usings,
        namespace: decl.namespace,
        attributes: decl.attributes,
        modifiers: decl.modifiers,
        base: decl.base,
        body: src[decl.body].to_string(),
    })
}

/// Walk the document's namespace/type level and collect declarations.
pub fn outline(src: &str) -> Result<Outline, FragmentIssue> {
    let tokens = lexer::scan(src);
    let mut out = Outline::default();
    // (namespace segment, brace depth of its body; 0 for file-scoped)
    let mut namespaces: Vec<(String, usize)> = Vec::new();
    let mut depth = 0usize;
    let mut decl_start = 0usize;
    let mut i = 0usize;

    while i < tokens.len() {
        let token = tokens[i];
        if token.is_trivia() {
            i += 1;
            continue;
        }
        let type_level = depth == namespaces.last().map_or(0, |(_, d)| *d);

        if token.is_punct(src, '{') {
            depth += 1;
            decl_start = i + 1;
        } else if token.is_punct(src, '}') {
            depth = depth.saturating_sub(1);
            while namespaces.last().is_some_and(|(_, d)| *d > depth && *d > 0) {
                namespaces.pop();
            }
            decl_start = i + 1;
        } else if token.is_punct(src, ';') {
            decl_start = i + 1;
        } else if type_level && token.is_ident(src, "using") && !is_using_statement(src, &tokens, i) {
            let end = find_punct(src, &tokens, i, ';').unwrap_or(tokens.len() - 1);
            out.usings.push(collapse(src, &tokens[i..=end]));
            i = end + 1;
            decl_start = i;
            continue;
        } else if type_level && token.is_ident(src, "namespace") {
            let Some(end) = (i + 1..tokens.len())
                .find(|&j| tokens[j].is_punct(src, '{') || tokens[j].is_punct(src, ';'))
            else {
                break;
            };
            let name = collapse(src, &tokens[i + 1..end]).replace(' ', "");
            if tokens[end].is_punct(src, '{') {
                depth += 1;
                namespaces.push((name, depth));
            } else {
                namespaces.push((name, 0));
            }
            i = end + 1;
            decl_start = i;
            continue;
        } else if type_level && token.is_ident(src, "class") {
            let (decl, close) = class_decl(src, &tokens, decl_start, i, &namespaces)?;
            if let Some(decl) = decl {
                out.classes.push(decl);
            }
            i = close + 1;
            decl_start = i;
            continue;
        }
        i += 1;
    }

    Ok(out)
}

/// Parse the declaration whose `class` keyword is at `kw`.
///
/// Returns the declaration (if it is well-formed enough to name) and the
/// index of the token that ends it.
fn class_decl(
    src: &str,
    tokens: &[Token],
    decl_start: usize,
    kw: usize,
    namespaces: &[(String, usize)],
) -> Result<(Option<ClassDecl>, usize), FragmentIssue> {
    let Some(name_idx) = lexer::next_significant(tokens, kw + 1) else {
        return Ok((None, tokens.len() - 1));
    };
    if tokens[name_idx].kind != TokenKind::Ident {
        return Ok((None, kw));
    }
    let name = tokens[name_idx].text(src).to_string();

    let Some(open) = (name_idx + 1..tokens.len()).find(|&j| tokens[j].is_punct(src, '{')) else {
        return Err(FragmentIssue::Unbalanced);
    };
    let close = lexer::matching_brace(src, tokens, open).ok_or(FragmentIssue::Unbalanced)?;

    let base = lexer::next_significant(tokens, name_idx + 1)
        .filter(|&j| j < open && tokens[j].is_punct(src, ':'))
        .map(|colon| collapse(src, &tokens[colon + 1..open]))
        .filter(|b| !b.is_empty());

    let (attributes, modifiers) = header_parts(src, &tokens[decl_start..kw]);
    let namespace = (!namespaces.is_empty()).then(|| {
        namespaces
            .iter()
            .map(|(n, _)| n.as_str())
            .collect::<Vec<_>>()
            .join(".")
    });

    let decl = ClassDecl {
        namespace,
        attributes,
        modifiers,
        name,
        base,
        body: tokens[open].end..tokens[close].start,
    };
    Ok((Some(decl), close))
}

/// Split the tokens before `class` into attribute lists and modifiers.
fn header_parts(src: &str, tokens: &[Token]) -> (Vec<String>, Vec<String>) {
    let mut attributes = Vec::new();
    let mut modifiers = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];
        if token.is_punct(src, '[') {
            let mut nesting = 0usize;
            let mut end = i;
            for (j, t) in tokens.iter().enumerate().skip(i) {
                if t.is_punct(src, '[') {
                    nesting += 1;
                } else if t.is_punct(src, ']') {
                    nesting -= 1;
                    if nesting == 0 {
                        end = j;
                        break;
                    }
                }
            }
            attributes.push(collapse(src, &tokens[i..=end]));
            i = end + 1;
            continue;
        }
        if token.kind == TokenKind::Ident && MODIFIERS.contains(&token.text(src)) {
            modifiers.push(token.text(src).to_string());
        }
        i += 1;
    }

    (attributes, modifiers)
}

/// `using (var x = ...)` and `using var x = ...` are statements, not directives.
fn is_using_statement(src: &str, tokens: &[Token], at: usize) -> bool {
    lexer::next_significant(tokens, at + 1)
        .is_some_and(|j| tokens[j].is_punct(src, '(') || tokens[j].is_ident(src, "var"))
}

fn find_punct(src: &str, tokens: &[Token], from: usize, c: char) -> Option<usize> {
    (from..tokens.len()).find(|&j| tokens[j].is_punct(src, c))
}

/// Join token texts, collapsing trivia runs into single spaces.
pub fn collapse(src: &str, tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut pending_space = false;
    for token in tokens {
        if token.is_trivia() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push_str(token.text(src));
    }
    out
}
