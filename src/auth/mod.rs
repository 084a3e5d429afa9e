//! Authentication mechanisms for SMTP.
//!
//! Supports:
//! - PLAIN (RFC 4616), sent as an initial response
//! - LOGIN (obsolete but widely used), two 334 round trips
//! - CRAM-MD5 (RFC 2195), HMAC-MD5 over the server challenge
//!
//! Only the payloads live here; the order of the exchange is driven by the
//! session engine.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SmtpError, SmtpResult};

/// Authentication methods supported by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// No authentication.
    #[default]
    None,
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
    /// CRAM-MD5 challenge-response.
    CramMd5,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::None => "NONE",
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
            AuthMethod::CramMd5 => "CRAM-MD5",
        }
    }

    /// Parses a mechanism advertised in the AUTH capability.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            "CRAM-MD5" => Some(AuthMethod::CramMd5),
            _ => None,
        }
    }

    /// Returns true if the secret crosses the wire in recoverable form.
    pub fn exposes_password(&self) -> bool {
        matches!(self, AuthMethod::Plain | AuthMethod::Login)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password used by every mechanism.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials from an already protected password.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Creates credentials from plain strings.
    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(username, SecretString::new(password.into()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Authentication payload builders.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(credentials: &Credentials) -> String {
        // Format: \0username\0password
        let response = format!(
            "\0{}\0{}",
            credentials.username,
            credentials.password.expose_secret()
        );
        BASE64.encode(response)
    }

    /// Generates LOGIN username response.
    pub fn login_username(credentials: &Credentials) -> String {
        BASE64.encode(&credentials.username)
    }

    /// Generates LOGIN password response.
    pub fn login_password(credentials: &Credentials) -> String {
        BASE64.encode(credentials.password.expose_secret())
    }

    /// Generates the CRAM-MD5 response to a base64 challenge.
    pub fn cram_md5_response(challenge: &str, credentials: &Credentials) -> SmtpResult<String> {
        let challenge_bytes = BASE64.decode(challenge.trim()).map_err(|e| {
            SmtpError::authentication(format!("Invalid CRAM-MD5 challenge: {}", e)).with_cause(e)
        })?;

        type HmacMd5 = Hmac<Md5>;
        let mut mac = HmacMd5::new_from_slice(credentials.password.expose_secret().as_bytes())
            .map_err(|e| SmtpError::authentication(format!("HMAC error: {}", e)))?;
        mac.update(&challenge_bytes);
        let digest = mac.finalize().into_bytes();

        // Format: username space hex-digest
        let hex_digest: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let response = format!("{} {}", credentials.username, hex_digest);
        Ok(BASE64.encode(response))
    }
}
