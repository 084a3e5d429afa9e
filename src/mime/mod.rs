//! MIME part tree.
//!
//! A message body is a tree of [`MimePart`] values:
//! - Leaf parts carry a body (in memory or read lazily from a file)
//! - Multipart containers carry a boundary and ordered children
//!
//! Serialization writes RFC 2045/2046 bytes to any [`std::io::Write`] sink.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::codec::{Base64Folder, QuotedPrintableFolder, MAX_LINE_LENGTH};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Size of the chunks a body source is read and encoded in.
const READ_CHUNK_SIZE: usize = 4096;

/// Column at which header lines are folded.
const MAX_HEADER_LINE: usize = 78;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// 7-bit ASCII (no encoding).
    SevenBit,
    /// 8-bit data.
    EightBit,
    /// Quoted-printable encoding.
    #[default]
    QuotedPrintable,
    /// Base64 encoding.
    Base64,
}

impl TransferEncoding {
    /// Returns the header value.
    pub fn header_value(&self) -> &'static str {
        match self {
            TransferEncoding::SevenBit => "7bit",
            TransferEncoding::EightBit => "8bit",
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
        }
    }
}

/// Multipart subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartKind {
    /// Independent parts in order (body plus attachments).
    Mixed,
    /// Parts defaulting to `message/rfc822`.
    Digest,
    /// Alternative renderings of the same content, simplest first.
    Alternative,
    /// A root part and the resources it references.
    Related,
    /// Delivery or disposition report.
    Report,
    /// Content plus detached signature.
    Signed,
    /// Control part plus encrypted data.
    Encrypted,
}

impl MultipartKind {
    /// Returns the full content type.
    pub fn content_type(&self) -> &'static str {
        match self {
            MultipartKind::Mixed => "multipart/mixed",
            MultipartKind::Digest => "multipart/digest",
            MultipartKind::Alternative => "multipart/alternative",
            MultipartKind::Related => "multipart/related",
            MultipartKind::Report => "multipart/report",
            MultipartKind::Signed => "multipart/signed",
            MultipartKind::Encrypted => "multipart/encrypted",
        }
    }
}

/// Where a leaf part's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySource {
    /// Owned bytes.
    Memory(Vec<u8>),
    /// File read when the part is serialized.
    File(PathBuf),
}

impl BodySource {
    /// Feeds the body to `f` in bounded chunks.
    fn for_each_chunk<F>(&self, mut f: F) -> SmtpResult<()>
    where
        F: FnMut(&[u8]) -> SmtpResult<()>,
    {
        match self {
            BodySource::Memory(bytes) => {
                for chunk in bytes.chunks(READ_CHUNK_SIZE) {
                    f(chunk)?;
                }
                Ok(())
            }
            BodySource::File(path) => {
                let mut file = File::open(path).map_err(|e| {
                    SmtpError::serialization(format!("Cannot open {}: {}", path.display(), e))
                        .with_cause(e)
                })?;
                let mut buf = [0u8; READ_CHUNK_SIZE];
                loop {
                    let n = file.read(&mut buf).map_err(|e| {
                        SmtpError::serialization(format!("Cannot read {}: {}", path.display(), e))
                            .with_cause(e)
                    })?;
                    if n == 0 {
                        return Ok(());
                    }
                    f(&buf[..n])?;
                }
            }
        }
    }
}

/// Header fields shared by every part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeaders {
    /// Content type, e.g. `text/plain`.
    pub content_type: String,
    /// Optional `name` parameter.
    pub content_name: Option<String>,
    /// Optional `charset` parameter.
    pub charset: Option<String>,
    /// Optional content id, stored without angle brackets.
    pub content_id: Option<String>,
    /// Body transfer encoding.
    pub transfer_encoding: TransferEncoding,
    /// Extra complete header lines, without CRLF.
    pub header_lines: Vec<String>,
}

impl PartHeaders {
    fn new(content_type: impl Into<String>, transfer_encoding: TransferEncoding) -> Self {
        Self {
            content_type: content_type.into(),
            content_name: None,
            charset: None,
            content_id: None,
            transfer_encoding,
            header_lines: Vec::new(),
        }
    }

    fn write<W: Write>(&self, sink: &mut W, boundary: Option<&str>) -> SmtpResult<()> {
        let mut content_type = self.content_type.clone();
        if let Some(name) = &self.content_name {
            content_type.push_str(&format!("; name=\"{}\"", quote_parameter(name)));
        }
        if let Some(charset) = &self.charset {
            content_type.push_str(&format!("; charset={}", charset));
        }
        if let Some(boundary) = boundary {
            content_type.push_str(&format!("; boundary={}", boundary));
        }

        write_header(sink, "Content-Type", &content_type)?;
        write_header(sink, "Content-Transfer-Encoding", self.transfer_encoding.header_value())?;
        if let Some(id) = &self.content_id {
            write_header(sink, "Content-ID", &format!("<{}>", id))?;
        }
        for line in &self.header_lines {
            write_bytes(sink, line.as_bytes())?;
            write_bytes(sink, b"\r\n")?;
        }
        write_bytes(sink, b"\r\n")
    }
}

/// Part with a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafPart {
    headers: PartHeaders,
    body: BodySource,
}

impl LeafPart {
    /// Returns the body source.
    pub fn body(&self) -> &BodySource {
        &self.body
    }

    fn serialize<W: Write>(&self, sink: &mut W) -> SmtpResult<()> {
        self.headers.write(sink, None)?;

        let mut out = String::new();
        match self.headers.transfer_encoding {
            TransferEncoding::SevenBit | TransferEncoding::EightBit => {
                self.body.for_each_chunk(|chunk| write_bytes(&mut *sink, chunk))?;
            }
            TransferEncoding::Base64 => {
                let mut folder = Base64Folder::new(MAX_LINE_LENGTH);
                self.body.for_each_chunk(|chunk| {
                    folder.push(chunk, &mut out);
                    write_bytes(&mut *sink, out.as_bytes())?;
                    out.clear();
                    Ok(())
                })?;
                folder.finish(&mut out);
                write_bytes(sink, out.as_bytes())?;
            }
            TransferEncoding::QuotedPrintable => {
                let mut folder = QuotedPrintableFolder::new(MAX_LINE_LENGTH);
                self.body.for_each_chunk(|chunk| {
                    folder.push(chunk, &mut out);
                    write_bytes(&mut *sink, out.as_bytes())?;
                    out.clear();
                    Ok(())
                })?;
                folder.finish(&mut out);
                write_bytes(sink, out.as_bytes())?;
            }
        }

        write_bytes(sink, b"\r\n")
    }
}

/// Container of ordered child parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    headers: PartHeaders,
    kind: MultipartKind,
    boundary: String,
    children: Vec<MimePart>,
}

impl MultipartPart {
    /// Creates an empty container with a fresh boundary.
    pub fn new(kind: MultipartKind) -> Self {
        Self {
            headers: PartHeaders::new(kind.content_type(), TransferEncoding::EightBit),
            kind,
            boundary: generate_boundary(),
            children: Vec::new(),
        }
    }

    /// Appends a child part.
    pub fn add_part(&mut self, part: impl Into<MimePart>) {
        self.children.push(part.into());
    }

    /// Appends a child part, builder style.
    pub fn part(mut self, part: impl Into<MimePart>) -> Self {
        self.add_part(part);
        self
    }

    /// Returns the subtype.
    pub fn kind(&self) -> MultipartKind {
        self.kind
    }

    /// Returns the boundary token.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Returns the children in insertion order.
    pub fn children(&self) -> &[MimePart] {
        &self.children
    }

    fn serialize<W: Write>(&self, sink: &mut W) -> SmtpResult<()> {
        self.headers.write(sink, Some(&self.boundary))?;
        for child in &self.children {
            write_bytes(sink, format!("--{}\r\n", self.boundary).as_bytes())?;
            child.serialize(sink)?;
        }
        write_bytes(sink, format!("--{}--\r\n", self.boundary).as_bytes())
    }
}

/// Node of the MIME tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePart {
    /// Part with a body.
    Leaf(LeafPart),
    /// Container of child parts.
    Multipart(MultipartPart),
}

impl MimePart {
    /// Creates a leaf part from raw pieces.
    pub fn leaf(
        content_type: impl Into<String>,
        transfer_encoding: TransferEncoding,
        body: BodySource,
    ) -> Self {
        MimePart::Leaf(LeafPart {
            headers: PartHeaders::new(content_type, transfer_encoding),
            body,
        })
    }

    /// `text/plain; charset=utf-8`, quoted-printable.
    pub fn text(text: impl Into<String>) -> Self {
        Self::leaf(
            mime::TEXT_PLAIN.essence_str(),
            TransferEncoding::QuotedPrintable,
            BodySource::Memory(text.into().into_bytes()),
        )
        .with_charset("utf-8")
    }

    /// `text/html; charset=utf-8`, quoted-printable.
    pub fn html(html: impl Into<String>) -> Self {
        Self::leaf(
            mime::TEXT_HTML.essence_str(),
            TransferEncoding::QuotedPrintable,
            BodySource::Memory(html.into().into_bytes()),
        )
        .with_charset("utf-8")
    }

    /// Base64 part read from `path` at serialization time.
    ///
    /// The content type is guessed from the file extension.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content_type = mime_guess::from_path(&path).first_or_octet_stream();
        let name = file_name(&path);
        let mut part = Self::leaf(
            content_type.essence_str(),
            TransferEncoding::Base64,
            BodySource::File(path),
        );
        part.headers_mut().content_name = name;
        part
    }

    /// Base64 part from bytes, typed by guessing from `filename`.
    pub fn file_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename).first_or_octet_stream();
        let mut part = Self::leaf(
            content_type.essence_str(),
            TransferEncoding::Base64,
            BodySource::Memory(data),
        );
        part.headers_mut().content_name = Some(filename);
        part
    }

    /// File part with `Content-Disposition: attachment`.
    pub fn attachment(path: impl Into<PathBuf>) -> Self {
        let part = Self::file(path);
        let filename = part.headers().content_name.clone().unwrap_or_default();
        part.with_disposition("attachment", &filename)
    }

    /// In-memory attachment.
    pub fn attachment_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        Self::file_bytes(filename.clone(), data).with_disposition("attachment", &filename)
    }

    /// File part referenced from HTML as `cid:<content_id>`.
    pub fn inline_file(path: impl Into<PathBuf>, content_id: impl Into<String>) -> Self {
        Self::file(path)
            .with_content_id(content_id)
            .with_raw_line("Content-Disposition: inline")
    }

    /// In-memory inline part referenced as `cid:<content_id>`.
    pub fn inline_bytes(
        filename: impl Into<String>,
        data: Vec<u8>,
        content_id: impl Into<String>,
    ) -> Self {
        Self::file_bytes(filename, data)
            .with_content_id(content_id)
            .with_raw_line("Content-Disposition: inline")
    }

    /// Creates an empty multipart container.
    pub fn multipart(kind: MultipartKind) -> MultipartPart {
        MultipartPart::new(kind)
    }

    /// Returns the common header fields.
    pub fn headers(&self) -> &PartHeaders {
        match self {
            MimePart::Leaf(leaf) => &leaf.headers,
            MimePart::Multipart(multi) => &multi.headers,
        }
    }

    /// Returns the common header fields mutably.
    pub fn headers_mut(&mut self) -> &mut PartHeaders {
        match self {
            MimePart::Leaf(leaf) => &mut leaf.headers,
            MimePart::Multipart(multi) => &mut multi.headers,
        }
    }

    /// Returns the container if this is a multipart.
    pub fn as_multipart_mut(&mut self) -> Option<&mut MultipartPart> {
        match self {
            MimePart::Multipart(multi) => Some(multi),
            MimePart::Leaf(_) => None,
        }
    }

    /// Sets the charset parameter.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.headers_mut().charset = Some(charset.into());
        self
    }

    /// Sets the content id; surrounding angle brackets are dropped.
    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        let id = content_id.into();
        let id = id.trim_start_matches('<').trim_end_matches('>').to_string();
        self.headers_mut().content_id = Some(id);
        self
    }

    /// Overrides the transfer encoding.
    pub fn with_transfer_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.headers_mut().transfer_encoding = encoding;
        self
    }

    /// Adds an extra header line after validating name and value.
    pub fn with_header(mut self, name: &str, value: &str) -> SmtpResult<Self> {
        validate_header(name, value)?;
        self.headers_mut().header_lines.push(format!("{}: {}", name, value));
        Ok(self)
    }

    fn with_raw_line(mut self, line: impl Into<String>) -> Self {
        self.headers_mut().header_lines.push(line.into());
        self
    }

    fn with_disposition(self, disposition: &str, filename: &str) -> Self {
        let line = format!(
            "Content-Disposition: {}; filename=\"{}\"",
            disposition,
            quote_parameter(filename)
        );
        self.with_raw_line(line)
    }

    /// Writes the part, headers first, to `sink`.
    pub fn serialize<W: Write>(&self, sink: &mut W) -> SmtpResult<()> {
        match self {
            MimePart::Leaf(leaf) => leaf.serialize(sink),
            MimePart::Multipart(multi) => multi.serialize(sink),
        }
    }

    /// Serializes the part into a buffer.
    pub fn to_bytes(&self) -> SmtpResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.serialize(&mut buf)?;
        Ok(buf)
    }
}

impl From<MultipartPart> for MimePart {
    fn from(multi: MultipartPart) -> Self {
        MimePart::Multipart(multi)
    }
}

impl From<LeafPart> for MimePart {
    fn from(leaf: LeafPart) -> Self {
        MimePart::Leaf(leaf)
    }
}

/// Writer that doubles a `.` at the start of every line.
#[derive(Debug)]
pub struct DotStuffer<W: Write> {
    inner: W,
    at_line_start: bool,
    scratch: Vec<u8>,
}

impl<W: Write> DotStuffer<W> {
    /// Wraps `inner`; the first byte written counts as a line start.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            at_line_start: true,
            scratch: Vec::new(),
        }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for DotStuffer<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.scratch.clear();
        self.scratch.reserve(buf.len() + 8);
        for &byte in buf {
            if self.at_line_start && byte == b'.' {
                self.scratch.push(b'.');
            }
            self.scratch.push(byte);
            self.at_line_start = byte == b'\n';
        }
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Generates a boundary: 128 random bits as lowercase hex.
pub fn generate_boundary() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Writes `Name: value\r\n`, folding long lines.
pub(crate) fn write_header<W: Write>(sink: &mut W, name: &str, value: &str) -> SmtpResult<()> {
    validate_header(name, value)?;
    let header = format!("{}: {}", name, value);
    write_bytes(sink, fold_header(&header).as_bytes())?;
    write_bytes(sink, b"\r\n")
}

/// Rejects names and values that could start a new header line.
pub(crate) fn validate_header(name: &str, value: &str) -> SmtpResult<()> {
    if name.is_empty() || name.chars().any(|c| c.is_control() || c == ':' || c == ' ') {
        return Err(SmtpError::new(
            SmtpErrorKind::InvalidHeader,
            format!("Invalid header name: {:?}", name),
        ));
    }

    // Folding inserted by the header encoders is the only CRLF allowed.
    let unfolded = value.replace("\r\n ", " ");
    if unfolded.contains('\r') || unfolded.contains('\n') {
        return Err(SmtpError::new(
            SmtpErrorKind::InvalidHeader,
            format!("Header {} contains a line break", name),
        ));
    }

    Ok(())
}

/// Folds a header line at 78 characters, breaking only at spaces.
///
/// Lines that already contain a fold are returned unchanged. Unfolding the
/// result (removing each `\r\n`) gives back the input.
pub(crate) fn fold_header(header: &str) -> String {
    if header.len() <= MAX_HEADER_LINE || header.contains("\r\n") {
        return header.to_string();
    }

    let mut result = String::new();
    let mut words = header.split(' ');
    let mut current_line = words.next().unwrap_or_default().to_string();

    for word in words {
        if current_line.len() + 1 + word.len() <= MAX_HEADER_LINE - 2 || current_line.trim().is_empty() {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            result.push_str(&current_line);
            result.push_str("\r\n ");
            current_line = word.to_string();
        }
    }

    result.push_str(&current_line);
    result
}

/// Escapes a quoted parameter value; non-ASCII becomes one B word.
fn quote_parameter(value: &str) -> String {
    if value.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
        value.replace('\\', "\\\\").replace('"', "\\\"")
    } else {
        format!("=?utf-8?B?{}?=", BASE64.encode(value.as_bytes()))
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

pub(crate) fn write_bytes<W: Write>(sink: &mut W, bytes: &[u8]) -> SmtpResult<()> {
    sink.write_all(bytes).map_err(|e| {
        SmtpError::serialization(format!("Failed to write message: {}", e)).with_cause(e)
    })
}
