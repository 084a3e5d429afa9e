//! Core value types.
//!
//! [`EmailAddress`] is an immutable mailbox with an optional display name.
//! Two addresses are equal when their address parts are equal; the display
//! name is presentation only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::codec::{encode_header_value, HeaderEncoding};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Longest address accepted (RFC 5321 path limit).
const MAX_ADDRESS_LENGTH: usize = 254;

/// Email address with optional display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "EmailAddressRepr")]
pub struct EmailAddress {
    address: String,
    display_name: String,
}

impl EmailAddress {
    /// Creates an address without display name.
    pub fn new(address: impl Into<String>) -> SmtpResult<Self> {
        Self::with_name(address, "")
    }

    /// Creates an address with a display name.
    pub fn with_name(address: impl Into<String>, display_name: impl Into<String>) -> SmtpResult<Self> {
        let address = address.into();
        let display_name = display_name.into();
        Self::validate_address(&address)?;

        if display_name.chars().any(|c| c.is_control()) {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidAddress,
                "Display name cannot contain control characters",
            ));
        }

        Ok(Self {
            address,
            display_name,
        })
    }

    /// Rejects addresses that would corrupt an SMTP command or a header.
    fn validate_address(address: &str) -> SmtpResult<()> {
        if address.is_empty() {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidAddress,
                "Email address cannot be empty",
            ));
        }

        if address.len() > MAX_ADDRESS_LENGTH {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidAddress,
                "Email address too long (max 254 characters)",
            ));
        }

        if address
            .chars()
            .any(|c| c.is_control() || c.is_whitespace() || c == '<' || c == '>')
        {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidAddress,
                format!("Email address contains forbidden characters: {:?}", address),
            ));
        }

        Ok(())
    }

    /// Returns the address part.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the display name, empty if none.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the domain part, if the address has one.
    pub fn domain(&self) -> Option<&str> {
        self.address.rsplit_once('@').map(|(_, domain)| domain)
    }

    /// Formats the address for a header: `[display-name ]<address>`.
    pub fn to_header(&self, policy: HeaderEncoding) -> String {
        if self.display_name.is_empty() {
            return format!("<{}>", self.address);
        }

        let name = &self.display_name;
        let ascii = name.bytes().all(|b| (0x20..=0x7E).contains(&b));

        let rendered = if (ascii && policy == HeaderEncoding::Auto) || policy == HeaderEncoding::Raw {
            if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                name.clone()
            }
        } else {
            encode_header_value(policy, name).trim_start().to_string()
        };

        format!("{} <{}>", rendered, self.address)
    }
}

impl PartialEq for EmailAddress {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for EmailAddress {}

impl Hash for EmailAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header(HeaderEncoding::Raw))
    }
}

/// Unvalidated form read by serde; converted through [`EmailAddress::with_name`].
#[derive(Deserialize)]
struct EmailAddressRepr {
    address: String,
    #[serde(default)]
    display_name: String,
}

impl TryFrom<EmailAddressRepr> for EmailAddress {
    type Error = SmtpError;

    fn try_from(repr: EmailAddressRepr) -> Result<Self, Self::Error> {
        EmailAddress::with_name(repr.address, repr.display_name)
    }
}

impl TryFrom<&str> for EmailAddress {
    type Error = SmtpError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        EmailAddress::new(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = SmtpError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        EmailAddress::new(s)
    }
}
