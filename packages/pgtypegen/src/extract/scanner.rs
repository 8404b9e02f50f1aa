//!
//! A shallow scanner for `sql` tagged templates in TypeScript source.
//!
//! Not a parser. It understands just enough of the language (comments, string, template and
//! regular expression literals) to avoid finding tags where there are none, and recognises one
//! call pattern: `sql`, optionally `<TypeArguments>`, then a template literal.
//!
use crate::error::ExtractError;
use std::ops::Range;

const TAG: &str = "sql";

/// A `sql` tagged template found in source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// Byte offset just past the `sql` identifier, where type arguments go
    pub tag_end: usize,
    /// Existing type arguments, brackets included
    pub type_arguments: Option<Range<usize>>,
    /// The template literal, backticks included
    pub template: Range<usize>,
    /// 1-based line of the `sql` identifier
    pub line: usize,
    /// Template text with each `${...}` replaced by `$1`, `$2`, ...
    pub sql: String,
    pub param_count: usize,
}

pub fn scan(source: &str) -> Result<Vec<Tag>, ExtractError> {
    Scanner::new(source).scan()
}

struct Scanner<'s> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
}

impl<'s> Scanner<'s> {
    fn new(src: &'s str) -> Self {
        Scanner {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn line_at(&self, offset: usize) -> usize {
        self.bytes[..offset.min(self.bytes.len())]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1
    }

    fn scan(mut self) -> Result<Vec<Tag>, ExtractError> {
        let mut tags = vec![];
        // Last significant byte, used to tell a regex literal from division
        let mut previous: Option<u8> = None;

        while let Some(byte) = self.peek(0) {
            match byte {
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment()?,
                b'/' if regex_allowed(previous) => {
                    self.skip_regex()?;
                    previous = Some(b'/');
                }
                b'\'' | b'"' => {
                    self.skip_string(byte)?;
                    previous = Some(byte);
                }
                b'`' => {
                    self.skip_template()?;
                    previous = Some(b'`');
                }
                b if is_ident_start(b) => {
                    let start = self.pos;
                    self.skip_ident();
                    let ident = &self.src[start..self.pos];

                    if ident == TAG {
                        if let Some(tag) = self.try_tag(start)? {
                            tags.push(tag);
                            previous = Some(b'`');
                            continue;
                        }
                    }
                    previous = Some(b'a');
                }
                b if b.is_ascii_whitespace() => self.pos += 1,
                _ => {
                    previous = Some(byte);
                    self.pos += 1;
                }
            }
        }

        Ok(tags)
    }

    ///
    /// Called with `pos` just past a `sql` identifier starting at `start`.
    /// On success `pos` is past the template literal, otherwise it is left where it was.
    ///
    fn try_tag(&mut self, start: usize) -> Result<Option<Tag>, ExtractError> {
        let tag_end = self.pos;
        let mut cursor = skip_whitespace(self.bytes, tag_end);

        let type_arguments = if self.bytes.get(cursor) == Some(&b'<') {
            match type_arguments_end(self.bytes, cursor) {
                Some(end) => {
                    let range = cursor..end;
                    cursor = skip_whitespace(self.bytes, end);
                    Some(range)
                }
                None => return Ok(None),
            }
        } else {
            None
        };

        if self.bytes.get(cursor) != Some(&b'`') {
            return Ok(None);
        }

        self.pos = cursor;
        let (sql, param_count) = self.read_template()?;

        Ok(Some(Tag {
            tag_end,
            type_arguments,
            template: cursor..self.pos,
            line: self.line_at(start),
            sql,
            param_count,
        }))
    }

    fn skip_ident(&mut self) {
        while self.peek(0).is_some_and(is_ident_continue) {
            self.pos += 1;
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(byte) = self.peek(0) {
            if byte == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ExtractError> {
        let start = self.pos;
        self.pos += 2;
        while self.pos < self.bytes.len() {
            if self.peek(0) == Some(b'*') && self.peek(1) == Some(b'/') {
                self.pos += 2;
                return Ok(());
            }
            self.pos += 1;
        }
        Err(self.unterminated("comment", start))
    }

    fn skip_string(&mut self, quote: u8) -> Result<(), ExtractError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(byte) = self.peek(0) {
            match byte {
                b'\\' => self.pos += 2,
                b'\n' => break,
                b if b == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(self.unterminated("string", start))
    }

    fn skip_regex(&mut self) -> Result<(), ExtractError> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        while let Some(byte) = self.peek(0) {
            match byte {
                b'\\' => self.pos += 2,
                b'\n' => break,
                b'[' => {
                    in_class = true;
                    self.pos += 1;
                }
                b']' => {
                    in_class = false;
                    self.pos += 1;
                }
                b'/' if !in_class => {
                    self.pos += 1;
                    self.skip_ident();
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(self.unterminated("regular expression", start))
    }

    fn skip_template(&mut self) -> Result<(), ExtractError> {
        self.read_template().map(|_| ())
    }

    ///
    /// Reads a template literal starting at the opening backtick.
    /// Returns the cooked text with placeholders substituted and the placeholder count.
    ///
    fn read_template(&mut self) -> Result<(String, usize), ExtractError> {
        let start = self.pos;
        self.pos += 1;

        let mut text = String::new();
        let mut params = 0;
        let mut chunk_start = self.pos;

        while let Some(byte) = self.peek(0) {
            match byte {
                b'\\' => {
                    // Only the escapes that matter to SQL text are cooked
                    if let Some(escaped @ (b'`' | b'$' | b'\\')) = self.peek(1) {
                        text.push_str(&self.src[chunk_start..self.pos]);
                        text.push(escaped as char);
                        chunk_start = self.pos + 2;
                    }
                    self.pos += 2;
                }
                b'`' => {
                    text.push_str(&self.src[chunk_start..self.pos]);
                    self.pos += 1;
                    return Ok((text, params));
                }
                b'$' if self.peek(1) == Some(b'{') => {
                    text.push_str(&self.src[chunk_start..self.pos]);
                    self.pos += 2;
                    self.skip_code_to_close_brace()?;
                    params += 1;
                    text.push_str(&format!("${params}"));
                    chunk_start = self.pos;
                }
                _ => self.pos += 1,
            }
        }

        Err(self.unterminated("template literal", start))
    }

    /// Skips an interpolated expression up to and including its closing brace
    fn skip_code_to_close_brace(&mut self) -> Result<(), ExtractError> {
        let start = self.pos;
        let mut depth = 0usize;
        let mut previous: Option<u8> = Some(b'{');

        while let Some(byte) = self.peek(0) {
            match byte {
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment()?,
                b'/' if regex_allowed(previous) => {
                    self.skip_regex()?;
                    previous = Some(b'/');
                }
                b'\'' | b'"' => {
                    self.skip_string(byte)?;
                    previous = Some(byte);
                }
                b'`' => {
                    self.skip_template()?;
                    previous = Some(b'`');
                }
                b'{' => {
                    depth += 1;
                    previous = Some(byte);
                    self.pos += 1;
                }
                b'}' if depth == 0 => {
                    self.pos += 1;
                    return Ok(());
                }
                b'}' => {
                    depth -= 1;
                    previous = Some(byte);
                    self.pos += 1;
                }
                b if is_ident_start(b) => {
                    self.skip_ident();
                    previous = Some(b'a');
                }
                b if b.is_ascii_whitespace() => self.pos += 1,
                _ => {
                    previous = Some(byte);
                    self.pos += 1;
                }
            }
        }

        Err(self.unterminated("template expression", start))
    }

    fn unterminated(&self, what: &'static str, start: usize) -> ExtractError {
        ExtractError::Unterminated {
            what,
            line: self.line_at(start),
        }
    }
}

///
/// End (exclusive) of the type arguments opening at `open`.
/// `None` when this is not a balanced `<...>`, e.g. a less-than comparison.
///
fn type_arguments_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;

    while let Some(&byte) = bytes.get(i) {
        match byte {
            b'<' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'=' => {}
            b'>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            b'\'' | b'"' => {
                i += 1;
                while bytes.get(i).is_some_and(|b| *b != byte && *b != b'\n') {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b';' | b'`' => return None,
            _ => {}
        }
        i += 1;
    }

    None
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).is_some_and(u8::is_ascii_whitespace) {
        i += 1;
    }
    i
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte == b'$' || byte >= 0x80
}

fn is_ident_continue(byte: u8) -> bool {
    is_ident_start(byte) || byte.is_ascii_digit()
}

/// A `/` starts a regular expression unless it follows an operand
fn regex_allowed(previous: Option<u8>) -> bool {
    match previous {
        None => true,
        Some(b) => {
            !(b.is_ascii_alphanumeric()
                || matches!(b, b')' | b']' | b'}' | b'_' | b'$' | b'`' | b'\'' | b'"'))
        }
    }
}
