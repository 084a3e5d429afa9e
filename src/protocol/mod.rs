//! SMTP protocol implementation.
//!
//! Implements the RFC 5321 command set used by the session engine, reply
//! line parsing, and ESMTP capability discovery. Replies arrive as arbitrary
//! byte chunks; [`ReplyParser`] buffers partial lines and groups multi-line
//! replies before handing them to the engine.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{EnhancedStatusCode, SmtpError, SmtpResult};

/// Longest reply line accepted before the stream is considered broken.
pub const MAX_REPLY_LINE: usize = 16 * 1024;

/// SMTP commands.
#[derive(Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Start TLS negotiation.
    StartTls,
    /// `AUTH PLAIN` with its initial response.
    AuthPlain(String),
    /// `AUTH LOGIN`.
    AuthLogin,
    /// `AUTH CRAM-MD5`.
    AuthCramMd5,
    /// A bare base64 line answering a 334 continuation.
    AuthResponse(String),
    /// MAIL FROM command.
    MailFrom(String),
    /// RCPT TO command.
    RcptTo(String),
    /// DATA command.
    Data,
    /// Reset transaction.
    Rset,
    /// No operation (keepalive).
    Noop,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command without its line terminator.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::AuthPlain(response) => format!("AUTH PLAIN {}", response),
            SmtpCommand::AuthLogin => "AUTH LOGIN".to_string(),
            SmtpCommand::AuthCramMd5 => "AUTH CRAM-MD5".to_string(),
            SmtpCommand::AuthResponse(response) => response.clone(),
            SmtpCommand::MailFrom(address) => format!("MAIL FROM:<{}>", address),
            SmtpCommand::RcptTo(address) => format!("RCPT TO:<{}>", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Rset => "RSET".to_string(),
            SmtpCommand::Noop => "NOOP".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Returns the CRLF-terminated bytes written to the socket.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut line = self.to_smtp_string().into_bytes();
        line.extend_from_slice(b"\r\n");
        line
    }

    /// Returns true if the command carries authentication material.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, SmtpCommand::AuthPlain(_) | SmtpCommand::AuthResponse(_))
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpCommand::AuthPlain(_) => write!(f, "AUTH PLAIN [REDACTED]"),
            SmtpCommand::AuthResponse(_) => write!(f, "[REDACTED]"),
            other => write!(f, "{}", other.to_smtp_string()),
        }
    }
}

impl fmt::Debug for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SmtpCommand({})", self)
    }
}

/// A single reply line: `NNN[-| ]text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// Three-digit reply code.
    pub code: u16,
    /// True when the fourth byte is `-` and more lines follow.
    pub continuation: bool,
    /// Text after the separator.
    pub text: String,
}

impl ReplyLine {
    /// Parses one line, with or without its trailing CRLF.
    pub fn parse(line: &str) -> SmtpResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let bytes = line.as_bytes();

        if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(SmtpError::protocol(format!("Malformed reply line: {:?}", line)));
        }

        let code = line[..3]
            .parse()
            .map_err(|_| SmtpError::protocol(format!("Invalid reply code: {:?}", line)))?;

        let (continuation, text) = match bytes.get(3) {
            None => (false, ""),
            Some(b'-') => (true, &line[4..]),
            Some(b' ') => (false, &line[4..]),
            Some(_) => {
                return Err(SmtpError::protocol(format!(
                    "Invalid reply separator: {:?}",
                    line
                )))
            }
        };

        Ok(Self {
            code,
            continuation,
            text: text.to_string(),
        })
    }
}

/// A complete, possibly multi-line, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code of the final line.
    pub code: u16,
    /// Text of every line, in order.
    pub lines: Vec<String>,
}

impl Reply {
    /// Creates a single-line reply.
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// Returns the first line's text.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Returns true for 2xx.
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true for 4xx or 5xx.
    pub fn is_negative(&self) -> bool {
        (400..600).contains(&self.code)
    }

    /// Returns the enhanced status code the reply text starts with.
    pub fn enhanced_code(&self) -> Option<EnhancedStatusCode> {
        EnhancedStatusCode::from_reply_text(self.first_line())
    }

    /// Converts the reply into an error.
    pub fn to_error(&self) -> SmtpError {
        SmtpError::from_reply(self.code, self.text())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_line())
    }
}

/// Splits an incoming byte stream into text lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Removes and returns the next newline-terminated line, without CR/LF.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Returns the number of buffered bytes not yet forming a line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drops buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Groups reply lines into complete replies.
#[derive(Debug, Default)]
pub struct ReplyParser {
    lines: LineBuffer,
    pending: Vec<String>,
}

impl ReplyParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.lines.extend(data);
    }

    /// Returns the next complete reply, if one is buffered.
    ///
    /// A malformed line or an overlong partial line is a protocol violation.
    pub fn next_reply(&mut self) -> Option<SmtpResult<Reply>> {
        while let Some(raw) = self.lines.next_line() {
            let line = match ReplyLine::parse(&raw) {
                Ok(line) => line,
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(e));
                }
            };

            self.pending.push(line.text);
            if !line.continuation {
                return Some(Ok(Reply {
                    code: line.code,
                    lines: std::mem::take(&mut self.pending),
                }));
            }
        }

        if self.lines.pending_len() > MAX_REPLY_LINE {
            self.lines.clear();
            return Some(Err(SmtpError::protocol("Reply line exceeds maximum length")));
        }

        None
    }

    /// Drops all buffered state, e.g. after a disconnect.
    pub fn reset(&mut self) {
        self.lines.clear();
        self.pending.clear();
    }
}

/// ESMTP server capabilities.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Supported authentication mechanisms.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// STARTTLS supported.
    pub starttls: bool,
    /// 8BITMIME supported.
    pub eight_bit_mime: bool,
    /// PIPELINING supported.
    pub pipelining: bool,
    /// SMTPUTF8 supported.
    pub smtputf8: bool,
    /// Enhanced status codes supported.
    pub enhanced_status_codes: bool,
    /// Raw capability strings.
    pub raw: Vec<String>,
}

impl EsmtpCapabilities {
    /// Parses capabilities from the EHLO reply.
    ///
    /// Every line is inspected, the greeting line included, so a banner of
    /// `250-PIPELINING` / `250 OK` still enables pipelining.
    pub fn from_reply(reply: &Reply) -> Self {
        Self::from_reply_lines(&reply.lines)
    }

    /// Parses capabilities from the text of each EHLO reply line.
    pub fn from_reply_lines(lines: &[String]) -> Self {
        let mut caps = Self::default();

        for line in lines {
            let line = line.trim().to_uppercase();
            caps.raw.push(line.clone());

            let mut parts = line.splitn(2, |c: char| c == ' ' || c == '=');
            let capability = parts.next().unwrap_or("");
            let params = parts.next().unwrap_or("");

            match capability {
                "SIZE" => {
                    caps.size = params.trim().parse().ok();
                }
                "AUTH" => {
                    for mech in params.split_whitespace() {
                        if let Some(method) = AuthMethod::from_capability(mech) {
                            caps.auth_mechanisms.insert(method);
                        }
                    }
                }
                "STARTTLS" => caps.starttls = true,
                "8BITMIME" => caps.eight_bit_mime = true,
                "PIPELINING" => caps.pipelining = true,
                "SMTPUTF8" => caps.smtputf8 = true,
                "ENHANCEDSTATUSCODES" => caps.enhanced_status_codes = true,
                _ => {}
            }
        }

        caps
    }

    /// Returns true if the mechanism was advertised.
    pub fn supports_auth(&self, method: AuthMethod) -> bool {
        self.auth_mechanisms.contains(&method)
    }

    /// Checks if a specific capability keyword is present.
    pub fn has_capability(&self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.raw
            .iter()
            .any(|c| c.split_whitespace().next() == Some(upper.as_str()))
    }
}

/// Reply codes the session engine waits for.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Service unavailable; the server is closing the connection.
    pub const SERVICE_UNAVAILABLE: u16 = 421;
}
