//! Transfer encodings for message bodies and headers.
//!
//! - Folded base64 with a column counter carried across chunks
//! - Quoted-printable for bodies (soft line breaks) and RFC 2047 Q words
//! - Header value encoding that picks Q or B words from the share of
//!   characters that stay legible

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quoted_printable::ParseMode;
use serde::{Deserialize, Serialize};

use crate::errors::{SmtpError, SmtpResult};

/// Default maximum output line length for folded encodings.
pub const MAX_LINE_LENGTH: usize = 76;

/// Maximum length of a single RFC 2047 encoded word.
const MAX_ENCODED_WORD: usize = 75;

/// Share of legible characters at which Q encoding is preferred over B.
const Q_ENCODING_THRESHOLD: f64 = 0.8;

/// Longest space-free run `Auto` leaves as plain text; folding only
/// happens at spaces and a header line may not exceed 998 octets.
const MAX_PLAIN_RUN: usize = 900;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Streaming base64 encoder that folds its output with CRLF.
#[derive(Debug, Clone)]
pub struct Base64Folder {
    max_line_len: usize,
    column: usize,
    carry: Vec<u8>,
}

impl Base64Folder {
    /// Creates a folder; a `max_line_len` of zero disables folding.
    pub fn new(max_line_len: usize) -> Self {
        Self {
            max_line_len,
            column: 0,
            carry: Vec::with_capacity(3),
        }
    }

    /// Encodes the next chunk, keeping up to two bytes for the next call.
    pub fn push(&mut self, chunk: &[u8], out: &mut String) {
        self.carry.extend_from_slice(chunk);
        let usable = self.carry.len() / 3 * 3;
        if usable == 0 {
            return;
        }
        let encoded = BASE64.encode(&self.carry[..usable]);
        self.carry.drain(..usable);
        self.emit(&encoded, out);
    }

    /// Encodes the remaining bytes with padding.
    pub fn finish(&mut self, out: &mut String) {
        if !self.carry.is_empty() {
            let encoded = BASE64.encode(&self.carry);
            self.carry.clear();
            self.emit(&encoded, out);
        }
    }

    fn emit(&mut self, encoded: &str, out: &mut String) {
        for ch in encoded.chars() {
            if self.max_line_len > 0 && self.column == self.max_line_len {
                out.push_str("\r\n");
                self.column = 0;
            }
            out.push(ch);
            self.column += 1;
        }
    }
}

/// Encodes `bytes` as base64 with a CRLF after every `max_line_len` characters.
///
/// The last line carries no trailing CRLF.
pub fn encode_base64_folded(bytes: &[u8], max_line_len: usize) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 / 3 + bytes.len() / 38 + 4);
    let mut folder = Base64Folder::new(max_line_len);
    folder.push(bytes, &mut out);
    folder.finish(&mut out);
    out
}

/// Character counts gathered while quoted-printable encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QpCounts {
    /// Bytes written as themselves (space-as-underscore included).
    pub printable: usize,
    /// Bytes written as `=XX`.
    pub escaped: usize,
}

impl QpCounts {
    /// Returns the share of legible bytes, 1.0 for empty input.
    pub fn printable_ratio(&self) -> f64 {
        let total = self.printable + self.escaped;
        if total == 0 {
            1.0
        } else {
            self.printable as f64 / total as f64
        }
    }
}

/// Streaming quoted-printable body encoder.
///
/// A CRLF pair in the input is a hard line break and is copied literally.
/// Lone CR or LF bytes are escaped. Whitespace right before a hard break, or
/// at the very end, is escaped so that transports cannot strip it.
#[derive(Debug, Clone)]
pub struct QuotedPrintableFolder {
    max_line_len: usize,
    column: usize,
    pending_cr: bool,
    pending_ws: Option<u8>,
    counts: QpCounts,
}

impl QuotedPrintableFolder {
    /// Creates a folder; lines never exceed `max_line_len` characters.
    pub fn new(max_line_len: usize) -> Self {
        Self {
            max_line_len: max_line_len.max(4),
            column: 0,
            pending_cr: false,
            pending_ws: None,
            counts: QpCounts::default(),
        }
    }

    /// Encodes the next chunk.
    pub fn push(&mut self, chunk: &[u8], out: &mut String) {
        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    self.flush_whitespace(true, out);
                    out.push_str("\r\n");
                    self.column = 0;
                    continue;
                }
                self.flush_whitespace(false, out);
                self.escaped(b'\r', out);
            }

            match byte {
                b'\r' => self.pending_cr = true,
                b' ' | b'\t' => {
                    self.flush_whitespace(false, out);
                    self.pending_ws = Some(byte);
                }
                _ => {
                    self.flush_whitespace(false, out);
                    if is_qp_literal(byte) {
                        self.literal(byte, out);
                    } else {
                        self.escaped(byte, out);
                    }
                }
            }
        }
    }

    /// Flushes held-back bytes at the end of the input.
    pub fn finish(&mut self, out: &mut String) {
        if self.pending_cr {
            self.pending_cr = false;
            self.flush_whitespace(false, out);
            self.escaped(b'\r', out);
        } else {
            self.flush_whitespace(true, out);
        }
    }

    /// Returns the counts gathered so far.
    pub fn counts(&self) -> QpCounts {
        self.counts
    }

    fn flush_whitespace(&mut self, escape: bool, out: &mut String) {
        if let Some(ws) = self.pending_ws.take() {
            if escape {
                self.escaped(ws, out);
            } else {
                self.literal(ws, out);
            }
        }
    }

    fn literal(&mut self, byte: u8, out: &mut String) {
        self.make_room(1, out);
        out.push(byte as char);
        self.column += 1;
        self.counts.printable += 1;
    }

    fn escaped(&mut self, byte: u8, out: &mut String) {
        self.make_room(3, out);
        push_hex_escape(byte, out);
        self.column += 3;
        self.counts.escaped += 1;
    }

    fn make_room(&mut self, token_len: usize, out: &mut String) {
        // One column stays reserved for the soft break's `=`.
        if self.column + token_len > self.max_line_len - 1 {
            out.push_str("=\r\n");
            self.column = 0;
        }
    }
}

fn is_qp_literal(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte) && byte != b'='
}

fn is_q_word_literal(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'!' | b'*' | b'+' | b'-' | b'/')
}

fn push_hex_escape(byte: u8, out: &mut String) {
    out.push('=');
    out.push(HEX[(byte >> 4) as usize] as char);
    out.push(HEX[(byte & 0x0F) as usize] as char);
}

/// Quoted-printable encodes `bytes`.
///
/// In `rfc2047_mode` the output is the payload of a Q encoded word: no line
/// folding, space becomes `_`, and only alphanumerics and `! * + - /` are kept
/// literally.
pub fn encode_quoted_printable(bytes: &[u8], rfc2047_mode: bool) -> String {
    encode_quoted_printable_with_counts(bytes, rfc2047_mode).0
}

/// Like [`encode_quoted_printable`], also returning the literal/escaped counts.
pub fn encode_quoted_printable_with_counts(bytes: &[u8], rfc2047_mode: bool) -> (String, QpCounts) {
    if rfc2047_mode {
        let mut out = String::with_capacity(bytes.len() * 3);
        let mut counts = QpCounts::default();
        for &byte in bytes {
            counts_q_byte(byte, &mut out, &mut counts);
        }
        return (out, counts);
    }

    let mut out = String::with_capacity(bytes.len() + bytes.len() / 8);
    let mut folder = QuotedPrintableFolder::new(MAX_LINE_LENGTH);
    folder.push(bytes, &mut out);
    folder.finish(&mut out);
    (out, folder.counts())
}

fn counts_q_byte(byte: u8, out: &mut String, counts: &mut QpCounts) {
    if byte == b' ' {
        out.push('_');
        counts.printable += 1;
    } else if is_q_word_literal(byte) {
        out.push(byte as char);
        counts.printable += 1;
    } else {
        push_hex_escape(byte, out);
        counts.escaped += 1;
    }
}

/// Decodes quoted-printable data.
///
/// Soft line breaks are removed and `=XX` escapes decoded in either case.
/// A malformed escape is copied through unchanged. Hard line breaks come
/// back as CRLF, a final one included.
pub fn decode_quoted_printable(bytes: &[u8]) -> SmtpResult<Vec<u8>> {
    let mut decoded = quoted_printable::decode(bytes, ParseMode::Robust).map_err(|e| {
        SmtpError::serialization(format!("Invalid quoted-printable data: {}", e))
    })?;

    if ends_with_hard_break(bytes) {
        decoded.extend_from_slice(b"\r\n");
    }
    Ok(decoded)
}

/// True if `bytes` ends with a line break that is not a soft break.
fn ends_with_hard_break(bytes: &[u8]) -> bool {
    let Some(line) = bytes.strip_suffix(b"\n") else {
        return false;
    };
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let content = match line.iter().rposition(|&b| b != b' ' && b != b'\t') {
        Some(last) => &line[..=last],
        None => return true,
    };
    !content.ends_with(b"=")
}

/// How header text is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderEncoding {
    /// Written as-is (8-bit headers).
    Raw,
    /// Always RFC 2047 Q words.
    QuotedPrintable,
    /// Always RFC 2047 B words.
    Base64,
    /// Plain ASCII as-is, otherwise Q or B depending on legibility.
    #[default]
    Auto,
}

/// Encodes a header value, including the leading space after the colon.
///
/// Encoded words are limited to 75 characters each; several words are joined
/// with a folding `\r\n ` and never split a character.
pub fn encode_header_value(policy: HeaderEncoding, text: &str) -> String {
    let choice = match policy {
        HeaderEncoding::Raw => return format!(" {}", text),
        HeaderEncoding::QuotedPrintable => HeaderEncoding::QuotedPrintable,
        HeaderEncoding::Base64 => HeaderEncoding::Base64,
        HeaderEncoding::Auto => {
            if text.bytes().all(|b| (0x20..=0x7E).contains(&b))
                && text.split(' ').all(|run| run.len() <= MAX_PLAIN_RUN)
            {
                return format!(" {}", text);
            }
            let (_, counts) = encode_quoted_printable_with_counts(text.as_bytes(), true);
            if counts.printable_ratio() >= Q_ENCODING_THRESHOLD {
                HeaderEncoding::QuotedPrintable
            } else {
                HeaderEncoding::Base64
            }
        }
    };

    let words = match choice {
        HeaderEncoding::Base64 => b_words(text),
        _ => q_words(text),
    };
    format!(" {}", words.join("\r\n "))
}

fn q_words(text: &str) -> Vec<String> {
    const PREFIX: &str = "=?utf-8?Q?";
    let budget = MAX_ENCODED_WORD - PREFIX.len() - 2;
    let mut words = Vec::new();
    let mut payload = String::new();
    let mut counts = QpCounts::default();
    let mut buf = [0u8; 4];

    for ch in text.chars() {
        let mut token = String::new();
        for &byte in ch.encode_utf8(&mut buf).as_bytes() {
            counts_q_byte(byte, &mut token, &mut counts);
        }
        if !payload.is_empty() && payload.len() + token.len() > budget {
            words.push(format!("{}{}?=", PREFIX, payload));
            payload.clear();
        }
        payload.push_str(&token);
    }
    words.push(format!("{}{}?=", PREFIX, payload));
    words
}

fn b_words(text: &str) -> Vec<String> {
    const PREFIX: &str = "=?utf-8?B?";
    // 45 input bytes encode to 60 characters, the largest multiple of 4 that fits.
    const MAX_CHUNK: usize = (MAX_ENCODED_WORD - 12) / 4 * 3;
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;

    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > MAX_CHUNK && end > start {
            words.push(format!("{}{}?=", PREFIX, BASE64.encode(&text[start..end])));
            start = end;
        }
        end = next;
    }
    words.push(format!("{}{}?=", PREFIX, BASE64.encode(&text[start..end])));
    words
}
