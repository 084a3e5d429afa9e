//! Configuration types for the SMTP session.
//!
//! Provides configuration with builder pattern for:
//! - Server address and connection mode (plain, implicit TLS, STARTTLS)
//! - TLS peer verification
//! - Authentication credentials and method
//! - Connect, response and send timeouts

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{AuthMethod, Credentials};
use crate::errors::{SmtpError, SmtpResult};

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_PORT: u16 = 587;

/// Default timeout for opening a connection, TLS handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for waiting on a server reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for a single socket write.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(300);

/// Default EHLO name.
pub const DEFAULT_CLIENT_NAME: &str = "localhost";

/// How the connection to the server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Plain TCP, never encrypted.
    Plain,
    /// TLS from the first byte (port 465).
    ImplicitTls,
    /// Plain TCP upgraded with STARTTLS before authentication.
    #[default]
    StartTls,
}

impl ConnectionMode {
    /// Returns the conventional port for this mode.
    pub fn default_port(&self) -> u16 {
        match self {
            ConnectionMode::Plain => 25,
            ConnectionMode::ImplicitTls => 465,
            ConnectionMode::StartTls => DEFAULT_PORT,
        }
    }
}

/// Whether the server certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerVerification {
    /// Accept any certificate (testing only).
    VerifyNone,
    /// Verify the certificate chain and host name.
    #[default]
    VerifyPeer,
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Peer verification mode.
    #[serde(default)]
    pub verification: PeerVerification,
    /// Path to an extra PEM bundle of trusted CA certificates.
    pub ca_cert_path: Option<PathBuf>,
    /// Server Name Indication override.
    pub sni_override: Option<String>,
}

impl TlsConfig {
    /// Creates a new TLS config builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Returns true if certificates are verified.
    pub fn verifies_peer(&self) -> bool {
        self.verification == PeerVerification::VerifyPeer
    }

    /// Returns the name presented during the handshake.
    pub fn server_name<'a>(&'a self, host: &'a str) -> &'a str {
        self.sni_override.as_deref().unwrap_or(host)
    }

    /// Validates the TLS configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if let Some(path) = &self.ca_cert_path {
            if path.as_os_str().is_empty() {
                return Err(SmtpError::configuration("CA certificate path is empty"));
            }
        }

        if !self.verifies_peer() {
            #[cfg(feature = "tracing")]
            tracing::warn!("TLS peer verification is disabled");
        }

        Ok(())
    }
}

/// Builder for TLS configuration.
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    config: TlsConfig,
}

impl TlsConfigBuilder {
    /// Sets the peer verification mode.
    pub fn verification(mut self, verification: PeerVerification) -> Self {
        self.config.verification = verification;
        self
    }

    /// Sets the CA certificate path.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_cert_path = Some(path.into());
        self
    }

    /// Sets the SNI override.
    pub fn sni_override(mut self, sni: impl Into<String>) -> Self {
        self.config.sni_override = Some(sni.into());
        self
    }

    /// Builds the TLS configuration.
    pub fn build(self) -> SmtpResult<TlsConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// SMTP session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SmtpConfigFields")]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Connection mode.
    pub mode: ConnectionMode,
    /// Name announced with EHLO.
    pub client_name: String,
    /// TLS configuration.
    pub tls: TlsConfig,
    /// Authentication username.
    pub username: Option<String>,
    /// Authentication password (never serialized).
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,
    /// Authentication method.
    pub auth_method: AuthMethod,
    /// Connect timeout.
    #[serde(serialize_with = "humantime_serde::serialize")]
    pub connect_timeout: Duration,
    /// Response timeout.
    #[serde(serialize_with = "humantime_serde::serialize")]
    pub response_timeout: Duration,
    /// Send timeout.
    #[serde(serialize_with = "humantime_serde::serialize")]
    pub send_timeout: Duration,
}

/// Deserialized form of [`SmtpConfig`]; a missing port follows the mode.
#[derive(Deserialize)]
struct SmtpConfigFields {
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    mode: ConnectionMode,
    #[serde(default = "default_client_name")]
    client_name: String,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<SecretString>,
    #[serde(default)]
    auth_method: AuthMethod,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    connect_timeout: Duration,
    #[serde(default = "default_response_timeout", with = "humantime_serde")]
    response_timeout: Duration,
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    send_timeout: Duration,
}

impl From<SmtpConfigFields> for SmtpConfig {
    fn from(fields: SmtpConfigFields) -> Self {
        Self {
            port: fields.port.unwrap_or_else(|| fields.mode.default_port()),
            host: fields.host,
            mode: fields.mode,
            client_name: fields.client_name,
            tls: fields.tls,
            username: fields.username,
            password: fields.password,
            auth_method: fields.auth_method,
            connect_timeout: fields.connect_timeout,
            response_timeout: fields.response_timeout,
            send_timeout: fields.send_timeout,
        }
    }
}

fn default_client_name() -> String { DEFAULT_CLIENT_NAME.to_string() }
fn default_connect_timeout() -> Duration { DEFAULT_CONNECT_TIMEOUT }
fn default_response_timeout() -> Duration { DEFAULT_RESPONSE_TIMEOUT }
fn default_send_timeout() -> Duration { DEFAULT_SEND_TIMEOUT }

impl SmtpConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Loads and validates a configuration from JSON.
    pub fn from_json(json: &str) -> SmtpResult<Self> {
        let config: SmtpConfig = serde_json::from_str(json).map_err(|e| {
            SmtpError::configuration(format!("Invalid configuration JSON: {}", e)).with_cause(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.host.is_empty() {
            return Err(SmtpError::configuration("Host is required"));
        }

        if self.port == 0 {
            return Err(SmtpError::configuration("Port must be non-zero"));
        }

        if self.client_name.is_empty() || self.client_name.contains(char::is_whitespace) {
            return Err(SmtpError::configuration(
                "Client name must be a single non-empty token",
            ));
        }

        if self.auth_method != AuthMethod::None && !self.has_auth() {
            return Err(SmtpError::configuration(format!(
                "Auth method {} requires a username and password",
                self.auth_method
            )));
        }

        for (name, timeout) in [
            ("connect_timeout", self.connect_timeout),
            ("response_timeout", self.response_timeout),
            ("send_timeout", self.send_timeout),
        ] {
            if timeout.is_zero() {
                return Err(SmtpError::configuration(format!("{} must be non-zero", name)));
            }
        }

        self.tls.validate()
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if credentials are configured.
    pub fn has_auth(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Returns the configured credentials.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                Some(Credentials::new(username.clone(), password.clone()))
            }
            _ => None,
        }
    }
}

/// Builder for SMTP configuration.
#[derive(Debug, Default)]
pub struct SmtpConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    mode: ConnectionMode,
    client_name: Option<String>,
    tls: TlsConfig,
    username: Option<String>,
    password: Option<SecretString>,
    auth_method: AuthMethod,
    connect_timeout: Option<Duration>,
    response_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
}

impl SmtpConfigBuilder {
    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    ///
    /// When unset, the conventional port of the connection mode is used.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the connection mode.
    pub fn mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the EHLO name.
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets username and password.
    ///
    /// Switches the auth method from `None` to `Plain`; an explicitly chosen
    /// method is kept.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        if self.auth_method == AuthMethod::None {
            self.auth_method = AuthMethod::Plain;
        }
        self
    }

    /// Sets the authentication method.
    pub fn auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    /// Sets the TLS configuration.
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = config;
        self
    }

    /// Sets the peer verification mode.
    pub fn peer_verification(mut self, verification: PeerVerification) -> Self {
        self.tls.verification = verification;
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Sets send timeout.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SmtpResult<SmtpConfig> {
        let config = SmtpConfig {
            host: self.host.ok_or_else(|| SmtpError::configuration("Host is required"))?,
            port: self.port.unwrap_or_else(|| self.mode.default_port()),
            mode: self.mode,
            client_name: self.client_name.unwrap_or_else(default_client_name),
            tls: self.tls,
            username: self.username,
            password: self.password,
            auth_method: self.auth_method,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            response_timeout: self.response_timeout.unwrap_or(DEFAULT_RESPONSE_TIMEOUT),
            send_timeout: self.send_timeout.unwrap_or(DEFAULT_SEND_TIMEOUT),
        };

        config.validate()?;
        Ok(config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_config_builder() {
        let config = SmtpConfig::builder()
            .host("smtp.example.com")
            .port(587)
            .client_name("client.example.com")
            .credentials("user", "pass")
            .build()
            .unwrap();

        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.client_name, "client.example.com");
        assert_eq!(config.username, Some("user".to_string()));
        assert_eq!(config.password.as_ref().unwrap().expose_secret(), "pass");
    }

    #[test]
    fn test_config_defaults() {
        let config = SmtpConfig::builder()
            .host("smtp.example.com")
            .build()
            .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.mode, ConnectionMode::StartTls);
        assert_eq!(config.client_name, DEFAULT_CLIENT_NAME);
        assert_eq!(config.auth_method, AuthMethod::None);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.response_timeout, DEFAULT_RESPONSE_TIMEOUT);
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
        assert!(config.tls.verifies_peer());
    }

    #[test]
    fn test_port_follows_mode() {
        let config = SmtpConfig::builder()
            .host("smtp.example.com")
            .mode(ConnectionMode::ImplicitTls)
            .build()
            .unwrap();
        assert_eq!(config.port, 465);
    }

    #[test]
    fn test_credentials_enable_plain_auth() {
        let config = SmtpConfig::builder()
            .host("smtp.example.com")
            .credentials("user", "pass")
            .build()
            .unwrap();
        assert_eq!(config.auth_method, AuthMethod::Plain);

        let config = SmtpConfig::builder()
            .host("smtp.example.com")
            .auth_method(AuthMethod::CramMd5)
            .credentials("user", "pass")
            .build()
            .unwrap();
        assert_eq!(config.auth_method, AuthMethod::CramMd5);
    }

    #[test]
    fn test_config_validation() {
        assert!(SmtpConfig::builder().build().is_err());

        let result = SmtpConfig::builder()
            .host("smtp.example.com")
            .auth_method(AuthMethod::Login)
            .build();
        assert!(result.is_err());

        let result = SmtpConfig::builder()
            .host("smtp.example.com")
            .response_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());

        let result = SmtpConfig::builder()
            .host("smtp.example.com")
            .client_name("two words")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config = SmtpConfig::from_json(
            r#"{
                "host": "mail.example.com",
                "port": 2525,
                "mode": "plain",
                "username": "bob",
                "password": "hunter2",
                "auth_method": "login",
                "response_timeout": "15s",
                "tls": { "verification": "verify_none" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 2525);
        assert_eq!(config.mode, ConnectionMode::Plain);
        assert_eq!(config.auth_method, AuthMethod::Login);
        assert_eq!(config.response_timeout, Duration::from_secs(15));
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
        assert_eq!(config.tls.verification, PeerVerification::VerifyNone);
        assert!(config.credentials().is_some());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"15s\""));
    }

    #[test]
    fn test_json_port_follows_mode() {
        let config =
            SmtpConfig::from_json(r#"{ "host": "mail.example.com", "mode": "implicit_tls" }"#)
                .unwrap();
        assert_eq!(config.port, 465);

        let config = SmtpConfig::from_json(r#"{ "host": "mail.example.com" }"#).unwrap();
        assert_eq!(config.mode, ConnectionMode::StartTls);
        assert_eq!(config.port, 587);

        let config = SmtpConfig::from_json(
            r#"{ "host": "mail.example.com", "mode": "implicit_tls", "port": 2465 }"#,
        )
        .unwrap();
        assert_eq!(config.port, 2465);

        let reloaded: SmtpConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(reloaded.port, 2465);
        assert_eq!(reloaded.connect_timeout, config.connect_timeout);
    }

    #[test]
    fn test_tls_config() {
        let tls = TlsConfig::builder()
            .verification(PeerVerification::VerifyNone)
            .sni_override("mx.example.com")
            .build()
            .unwrap();

        assert!(!tls.verifies_peer());
        assert_eq!(tls.server_name("10.0.0.1"), "mx.example.com");
    }
}
