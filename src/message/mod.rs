//! Messages and their RFC 5322 serialization.
//!
//! A [`Message`] pairs an envelope (sender plus To/Cc/Bcc recipients) with
//! header fields and a root [`MimePart`]. Bcc recipients take part in the
//! RCPT command set only; they are never written into a header.

use chrono::Utc;
use std::io::Write;
use uuid::Uuid;

use crate::codec::{encode_header_value, HeaderEncoding};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::{
    fold_header, validate_header, write_bytes, write_header, DotStuffer, MimePart, MultipartKind,
};
use crate::types::EmailAddress;

/// Column at which address lists wrap to a new line.
const MAX_ADDRESS_LINE: usize = 78;

/// SMTP end-of-data marker.
pub const DATA_TERMINATOR: &[u8] = b"\r\n.\r\n";

/// Email message.
#[derive(Debug, Clone)]
pub struct Message {
    sender: EmailAddress,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    bcc: Vec<EmailAddress>,
    reply_to: Option<EmailAddress>,
    subject: String,
    extra_headers: Vec<(String, String)>,
    header_encoding: HeaderEncoding,
    content: MimePart,
    message_id: Option<String>,
}

impl Message {
    /// Creates a new message builder.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Returns the sender.
    pub fn sender(&self) -> &EmailAddress {
        &self.sender
    }

    /// Returns the To recipients.
    pub fn to(&self) -> &[EmailAddress] {
        &self.to
    }

    /// Returns the Cc recipients.
    pub fn cc(&self) -> &[EmailAddress] {
        &self.cc
    }

    /// Returns the Bcc recipients.
    pub fn bcc(&self) -> &[EmailAddress] {
        &self.bcc
    }

    /// Returns the subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the root part.
    pub fn content(&self) -> &MimePart {
        &self.content
    }

    /// Replaces the root part, e.g. with a signed or encrypted wrapper.
    pub fn set_content(&mut self, content: MimePart) {
        self.content = content;
    }

    /// Returns every envelope recipient: To, then Cc, then Bcc.
    pub fn recipients(&self) -> impl Iterator<Item = &EmailAddress> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Writes headers, content, and the end-of-data terminator to `sink`.
    ///
    /// Everything before the terminator is dot-stuffed.
    pub fn serialize<W: Write>(&self, sink: &mut W) -> SmtpResult<()> {
        {
            let mut out = DotStuffer::new(&mut *sink);
            self.write_headers(&mut out)?;
            self.content.serialize(&mut out)?;
        }
        write_bytes(sink, DATA_TERMINATOR)
    }

    /// Serializes the message into a buffer.
    pub fn to_bytes(&self) -> SmtpResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(1024);
        self.serialize(&mut buf)?;
        Ok(buf)
    }

    fn write_headers<W: Write>(&self, out: &mut W) -> SmtpResult<()> {
        for (name, value) in &self.extra_headers {
            write_header(out, name, value)?;
        }

        self.write_address_header(out, "From", std::slice::from_ref(&self.sender))?;
        if let Some(reply_to) = &self.reply_to {
            self.write_address_header(out, "Reply-To", std::slice::from_ref(reply_to))?;
        }
        self.write_address_header(out, "To", &self.to)?;
        self.write_address_header(out, "Cc", &self.cc)?;

        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S %z").to_string();
        write_header(out, "Date", &date)?;

        let subject = encode_header_value(self.header_encoding, &self.subject);
        let subject = fold_header(&format!("Subject:{}", subject));
        write_bytes(out, format!("{}\r\n", subject).as_bytes())?;

        write_header(out, "Message-ID", &self.message_id())?;
        write_header(out, "MIME-Version", "1.0")
    }

    /// Writes `Name: addr, addr` folded at address boundaries; nothing for an empty list.
    fn write_address_header<W: Write>(
        &self,
        out: &mut W,
        name: &str,
        addresses: &[EmailAddress],
    ) -> SmtpResult<()> {
        if addresses.is_empty() {
            return Ok(());
        }

        let mut line = format!("{}: ", name);
        let mut column = line.len();
        for (i, address) in addresses.iter().enumerate() {
            let entry = address.to_header(self.header_encoding);
            if i > 0 {
                if column + 2 + entry.len() >= MAX_ADDRESS_LINE {
                    line.push_str(",\r\n ");
                    column = 1;
                } else {
                    line.push_str(", ");
                    column += 2;
                }
            }
            column = match entry.rfind('\n') {
                Some(pos) => entry.len() - pos - 1,
                None => column + entry.len(),
            };
            line.push_str(&entry);
        }
        line.push_str("\r\n");
        write_bytes(out, line.as_bytes())
    }

    fn message_id(&self) -> String {
        match &self.message_id {
            Some(id) => format!("<{}>", id.trim_start_matches('<').trim_end_matches('>')),
            None => format!(
                "<{}@{}>",
                Uuid::new_v4(),
                self.sender.domain().unwrap_or("localhost")
            ),
        }
    }
}

/// Builder for [`Message`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    sender: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    bcc: Vec<EmailAddress>,
    reply_to: Option<EmailAddress>,
    subject: String,
    extra_headers: Vec<(String, String)>,
    header_encoding: HeaderEncoding,
    content: Option<MimePart>,
    message_id: Option<String>,
}

impl MessageBuilder {
    /// Sets the sender.
    pub fn from(mut self, address: EmailAddress) -> Self {
        self.sender = Some(address);
        self
    }

    /// Adds a To recipient.
    pub fn to(mut self, address: EmailAddress) -> Self {
        self.to.push(address);
        self
    }

    /// Adds a Cc recipient.
    pub fn cc(mut self, address: EmailAddress) -> Self {
        self.cc.push(address);
        self
    }

    /// Adds a Bcc recipient.
    pub fn bcc(mut self, address: EmailAddress) -> Self {
        self.bcc.push(address);
        self
    }

    /// Sets the Reply-To address.
    pub fn reply_to(mut self, address: EmailAddress) -> Self {
        self.reply_to = Some(address);
        self
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Adds a raw header written before the standard ones.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Sets how the subject and display names are encoded.
    pub fn header_encoding(mut self, encoding: HeaderEncoding) -> Self {
        self.header_encoding = encoding;
        self
    }

    /// Sets the root part.
    pub fn content(mut self, content: impl Into<MimePart>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Sets a plain text body.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.content(MimePart::text(text))
    }

    /// Appends a part to a `multipart/mixed` root, wrapping any existing content.
    pub fn part(mut self, part: impl Into<MimePart>) -> Self {
        let root = match self.content.take() {
            Some(MimePart::Multipart(multi)) if multi.kind() == MultipartKind::Mixed => multi,
            Some(existing) => MimePart::multipart(MultipartKind::Mixed).part(existing),
            None => MimePart::multipart(MultipartKind::Mixed),
        };
        self.content = Some(root.part(part).into());
        self
    }

    /// Overrides the generated Message-ID.
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Validates and builds the message.
    pub fn build(self) -> SmtpResult<Message> {
        let sender = self.sender.ok_or_else(|| {
            SmtpError::new(SmtpErrorKind::InvalidAddress, "Message has no sender")
        })?;

        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidAddress,
                "Message has no recipients",
            ));
        }

        for (name, value) in &self.extra_headers {
            validate_header(name, value)?;
        }
        validate_header("Subject", &self.subject)?;
        if let Some(id) = &self.message_id {
            validate_header("Message-ID", id)?;
        }

        Ok(Message {
            sender,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            reply_to: self.reply_to,
            subject: self.subject,
            extra_headers: self.extra_headers,
            header_encoding: self.header_encoding,
            content: self.content.unwrap_or_else(|| MimePart::text("")),
            message_id: self.message_id,
        })
    }
}
