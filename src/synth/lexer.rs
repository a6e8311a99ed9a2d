//! Token scanner for C#-family source fragments.
//!
//! Only as much lexing as merging needs: identifiers, punctuation, and the
//! spans that must never be rewritten (strings, chars, comments, directives).
//! Every byte of the input belongs to exactly one token, so concatenating
//! token texts reproduces the source.

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    /// String literal, or the literal text of an interpolated string
    Str,
    Char,
    Comment,
    /// Preprocessor line (`#region`, `#if DEBUG`, ...)
    Directive,
    Whitespace,
    Punct,
}

/// A token as a byte span into the scanned source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }

    /// Whitespace and comments carry no syntax.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::Comment | TokenKind::Directive
        )
    }

    pub fn is_punct(&self, src: &str, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text(src).starts_with(c)
    }

    pub fn is_ident(&self, src: &str, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(src) == name
    }
}

/// Scan `src` into a lossless token stream.
///
/// Holes of interpolated strings (`$"{new MainPage()}"`) are scanned as code;
/// the literal text around them, including the hole braces and any format
/// specifier, stays in `Str` tokens.
pub fn scan(src: &str) -> Vec<Token> {
    let mut scanner = Scanner {
        src,
        bytes: src.as_bytes(),
        pos: 0,
        line_start: true,
        tokens: Vec::new(),
    };
    scanner.code(false);
    scanner.tokens
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line_start: bool,
    tokens: Vec<Token>,
}

impl Scanner<'_> {
    /// Scan code until the end of input, or until the end of the current
    /// interpolation hole when `in_hole` is set.
    fn code(&mut self, in_hole: bool) {
        let mut depth = 0usize;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if in_hole && depth == 0 {
                let format = b == b':'
                    && self.bytes.get(self.pos + 1) != Some(&b':')
                    && self.bytes[self.pos - 1] != b':';
                if b == b'}' || format {
                    return;
                }
            }
            let kind = self.token();
            if kind == TokenKind::Punct {
                match b {
                    b'{' | b'(' | b'[' => depth += 1,
                    b'}' | b')' | b']' => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
        }
    }

    /// Scan one token starting at `pos` and return its kind.
    fn token(&mut self) -> TokenKind {
        let start = self.pos;
        let bytes = self.bytes;
        let b = bytes[start];
        if let Some(prefix) = string_prefix(bytes, start) {
            if prefix.interpolated {
                self.interpolated(prefix);
            } else {
                self.pos = verbatim_string_end(bytes, start + prefix.len);
                self.push(TokenKind::Str, start);
            }
            return TokenKind::Str;
        }
        let kind = match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                while self.pos < bytes.len() && matches!(bytes[self.pos], b' ' | b'\t' | b'\r' | b'\n') {
                    self.pos += 1;
                }
                TokenKind::Whitespace
            }
            b'#' if self.line_start => {
                self.pos = line_end(bytes, start);
                TokenKind::Directive
            }
            b'/' if bytes.get(start + 1) == Some(&b'/') => {
                self.pos = line_end(bytes, start);
                TokenKind::Comment
            }
            b'/' if bytes.get(start + 1) == Some(&b'*') => {
                self.pos = find_from(bytes, start + 2, b"*/").map_or(bytes.len(), |i| i + 2);
                TokenKind::Comment
            }
            b'"' => {
                self.pos = regular_string_end(bytes, start + 1);
                TokenKind::Str
            }
            b'\'' => {
                self.pos = char_end(bytes, start + 1);
                TokenKind::Char
            }
            b'0'..=b'9' => {
                while self.pos < bytes.len()
                    && (bytes[self.pos].is_ascii_alphanumeric() || bytes[self.pos] == b'.' || bytes[self.pos] == b'_')
                {
                    self.pos += 1;
                }
                TokenKind::Number
            }
            _ if is_ident_start(self.src, start) => {
                // `@class` style escaped identifiers
                if b == b'@' {
                    self.pos += 1;
                }
                while self.pos < bytes.len() && is_ident_continue(self.src, self.pos) {
                    self.pos += char_len(self.src, self.pos);
                }
                TokenKind::Ident
            }
            _ => {
                self.pos += char_len(self.src, start);
                TokenKind::Punct
            }
        };
        self.push(kind, start);
        kind
    }

    /// Scan an interpolated string, alternating literal segments and holes.
    fn interpolated(&mut self, prefix: StringPrefix) {
        let bytes = self.bytes;
        let mut start = self.pos;
        self.pos += prefix.len;

        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'"' if prefix.verbatim && bytes.get(self.pos + 1) == Some(&b'"') => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    break;
                }
                b'\\' if !prefix.verbatim => self.pos += 2,
                b'\n' if !prefix.verbatim => break,
                b'{' | b'}' if bytes.get(self.pos + 1) == Some(&bytes[self.pos]) => self.pos += 2,
                b'{' => {
                    self.pos += 1;
                    self.push(TokenKind::Str, start);
                    self.code(true);
                    start = self.pos;
                    // format specifier up to the closing brace
                    while self.pos < bytes.len() && !matches!(bytes[self.pos], b'}' | b'"' | b'\n') {
                        self.pos += 1;
                    }
                    if bytes.get(self.pos) == Some(&b'}') {
                        self.pos += 1;
                    }
                }
                _ => self.pos += 1,
            }
        }
        self.push(TokenKind::Str, start);
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.pos = self.pos.min(self.bytes.len());
        if self.pos == start {
            return;
        }
        self.line_start = match kind {
            TokenKind::Whitespace => self.src[start..self.pos].contains('\n') || self.line_start,
            TokenKind::Directive => true,
            _ => false,
        };
        self.tokens.push(Token {
            kind,
            start,
            end: self.pos,
        });
    }
}

/// Index of the next non-trivia token at or after `from`.
pub fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !tokens[i].is_trivia())
}

/// Index of the previous non-trivia token strictly before `before`.
pub fn prev_significant(tokens: &[Token], before: usize) -> Option<usize> {
    (0..before).rev().find(|&i| !tokens[i].is_trivia())
}

/// Index of the `}` matching the `{` at `open`.
pub fn matching_brace(src: &str, tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct(src, '{') {
            depth += 1;
        } else if token.is_punct(src, '}') {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

// ============================================================================
// Byte-level helpers
// ============================================================================

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |i| from + i)
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i)
}

#[derive(Debug, Clone, Copy)]
struct StringPrefix {
    len: usize,
    verbatim: bool,
    interpolated: bool,
}

/// String prefix at `pos`: `@"`, `$"`, `$@"` or `@$"`.
fn string_prefix(bytes: &[u8], pos: usize) -> Option<StringPrefix> {
    let prefix = |len, verbatim, interpolated| StringPrefix {
        len,
        verbatim,
        interpolated,
    };
    match (bytes.get(pos), bytes.get(pos + 1), bytes.get(pos + 2)) {
        (Some(b'@'), Some(b'"'), _) => Some(prefix(2, true, false)),
        (Some(b'$'), Some(b'"'), _) => Some(prefix(2, false, true)),
        (Some(b'$'), Some(b'@'), Some(b'"')) | (Some(b'@'), Some(b'$'), Some(b'"')) => {
            Some(prefix(3, true, true))
        }
        _ => None,
    }
}

/// End of a `"..."` string whose body starts at `pos`; stops at newline if unterminated.
fn regular_string_end(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'"' => return pos + 1,
            b'\n' => return pos,
            _ => pos += 1,
        }
    }
    bytes.len()
}

/// End of a verbatim string body starting at `pos` (`""` escapes a quote).
fn verbatim_string_end(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() {
        if bytes[pos] == b'"' {
            if bytes.get(pos + 1) == Some(&b'"') {
                pos += 2;
                continue;
            }
            return pos + 1;
        }
        pos += 1;
    }
    bytes.len()
}

fn char_end(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'\'' => return pos + 1,
            b'\n' => return pos,
            _ => pos += 1,
        }
    }
    bytes.len()
}

fn char_len(src: &str, pos: usize) -> usize {
    src[pos..].chars().next().map_or(1, char::len_utf8)
}

fn is_ident_start(src: &str, pos: usize) -> bool {
    let mut chars = src[pos..].chars();
    match chars.next() {
        Some('@') => chars.next().is_some_and(|c| c == '_' || c.is_alphabetic()),
        Some(c) => c == '_' || c.is_alphabetic(),
        None => false,
    }
}

fn is_ident_continue(src: &str, pos: usize) -> bool {
    src[pos..]
        .chars()
        .next()
        .is_some_and(|c| c == '_' || c.is_alphanumeric())
}
