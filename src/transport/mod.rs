//! Transport layer for SMTP connections.
//!
//! The session engine never touches sockets. The client driver opens
//! connections through a [`TransportConnector`] and moves bytes through the
//! resulting [`SmtpTransport`]: plain TCP, implicit TLS, or TCP upgraded in
//! place after STARTTLS.

use async_trait::async_trait;
use std::fmt;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{SmtpConfig, TlsConfig};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Byte stream to an SMTP server.
#[async_trait]
pub trait SmtpTransport: Send + fmt::Debug {
    /// Writes and flushes all bytes.
    async fn write_all(&mut self, data: &[u8]) -> SmtpResult<()>;

    /// Reads available bytes; 0 means the server closed the connection.
    async fn read(&mut self, buf: &mut [u8]) -> SmtpResult<usize>;

    /// Upgrades the connection to TLS in place.
    async fn upgrade_tls(&mut self, host: &str, tls: &TlsConfig) -> SmtpResult<()>;

    /// Returns true if TLS is active.
    fn is_tls(&self) -> bool;

    /// Closes the connection.
    async fn close(&mut self) -> SmtpResult<()>;
}

/// Opens transports for the session driver.
#[async_trait]
pub trait TransportConnector: Send + Sync + fmt::Debug {
    /// Connects to the configured server, TLS-wrapped if `implicit_tls`.
    async fn connect(
        &self,
        config: &SmtpConfig,
        implicit_tls: bool,
    ) -> SmtpResult<Box<dyn SmtpTransport>>;
}

/// Connector producing [`TcpTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(
        &self,
        config: &SmtpConfig,
        implicit_tls: bool,
    ) -> SmtpResult<Box<dyn SmtpTransport>> {
        let mut transport = TcpTransport::connect(&config.address()).await?;
        if implicit_tls {
            transport.upgrade_tls(&config.host, &config.tls).await?;
        }
        Ok(Box::new(transport))
    }
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(TcpStream),
    #[cfg(feature = "rustls-tls")]
    Rustls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    #[cfg(feature = "native-tls")]
    NativeTls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Taken out while a TLS handshake owns the socket.
    stream: Option<TransportStream>,
    /// Remote address.
    address: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("address", &self.address)
            .field("tls", &self.is_tls())
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl TcpTransport {
    /// Opens a plain TCP connection.
    pub async fn connect(address: &str) -> SmtpResult<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| Self::map_io_error(e, address))?;

        stream.set_nodelay(true).ok();

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %address, "TCP connection established");

        Ok(Self {
            stream: Some(TransportStream::Plain(stream)),
            address: address.to_string(),
        })
    }

    /// Maps IO errors to SMTP errors.
    fn map_io_error(error: io::Error, address: &str) -> SmtpError {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => {
                SmtpError::connection(format!("Connection refused to {}", address))
            }
            io::ErrorKind::TimedOut => SmtpError::timeout(
                SmtpErrorKind::ConnectionTimeout,
                format!("Connection to {} timed out", address),
            ),
            _ => SmtpError::connection(format!("Cannot connect to {}: {}", address, error)),
        }
        .with_cause(error)
    }

    fn stream_mut(&mut self) -> SmtpResult<&mut TransportStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| SmtpError::transport("Connection is closed"))
    }

    fn take_plain(&mut self) -> SmtpResult<TcpStream> {
        match self.stream.take() {
            Some(TransportStream::Plain(tcp)) => Ok(tcp),
            Some(other) => {
                self.stream = Some(other);
                Err(SmtpError::tls("Connection already uses TLS"))
            }
            None => Err(SmtpError::transport("Connection is closed")),
        }
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn write_all(&mut self, data: &[u8]) -> SmtpResult<()> {
        let result = match self.stream_mut()? {
            TransportStream::Plain(s) => write_flush(s, data).await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Rustls(s) => write_flush(s.as_mut(), data).await,
            #[cfg(feature = "native-tls")]
            TransportStream::NativeTls(s) => write_flush(s.as_mut(), data).await,
        };
        result.map_err(|e| SmtpError::transport(format!("Write error: {}", e)).with_cause(e))
    }

    async fn read(&mut self, buf: &mut [u8]) -> SmtpResult<usize> {
        let result = match self.stream_mut()? {
            TransportStream::Plain(s) => s.read(buf).await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Rustls(s) => s.read(buf).await,
            #[cfg(feature = "native-tls")]
            TransportStream::NativeTls(s) => s.read(buf).await,
        };
        result.map_err(|e| SmtpError::transport(format!("Read error: {}", e)).with_cause(e))
    }

    #[allow(unused_variables)]
    async fn upgrade_tls(&mut self, host: &str, tls: &TlsConfig) -> SmtpResult<()> {
        #[cfg(feature = "rustls-tls")]
        {
            let connector = tls::rustls_connector(tls)?;
            let server_name = tls::rustls_server_name(tls.server_name(host))?;
            let tcp = self.take_plain()?;

            let stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))?;

            #[cfg(feature = "tracing")]
            tracing::debug!(address = %self.address, "TLS established (rustls)");

            self.stream = Some(TransportStream::Rustls(Box::new(stream)));
            Ok(())
        }

        #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
        {
            let connector = tls::native_connector(tls)?;
            let tcp = self.take_plain()?;

            let stream = connector
                .connect(tls.server_name(host), tcp)
                .await
                .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))?;

            #[cfg(feature = "tracing")]
            tracing::debug!(address = %self.address, "TLS established (native-tls)");

            self.stream = Some(TransportStream::NativeTls(Box::new(stream)));
            Ok(())
        }

        #[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
        {
            Err(SmtpError::configuration("No TLS implementation available"))
        }
    }

    fn is_tls(&self) -> bool {
        !matches!(self.stream, Some(TransportStream::Plain(_)) | None)
    }

    async fn close(&mut self) -> SmtpResult<()> {
        let result = match self.stream.take() {
            None => Ok(()),
            Some(TransportStream::Plain(mut s)) => s.shutdown().await,
            #[cfg(feature = "rustls-tls")]
            Some(TransportStream::Rustls(mut s)) => s.shutdown().await,
            #[cfg(feature = "native-tls")]
            Some(TransportStream::NativeTls(mut s)) => s.shutdown().await,
        };
        result.map_err(SmtpError::from)
    }
}

async fn write_flush<W>(writer: &mut W, data: &[u8]) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(data).await?;
    writer.flush().await
}

/// TLS connector construction.
pub mod tls {
    #[allow(unused_imports)]
    use super::*;

    #[cfg(feature = "rustls-tls")]
    pub use self::rustls_impl::{rustls_client_config, rustls_connector, rustls_server_name};

    #[cfg(feature = "rustls-tls")]
    mod rustls_impl {
        use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
        use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
        use rustls::{DigitallySignedStruct, SignatureScheme};
        use std::fs::File;
        use std::io::BufReader;
        use std::sync::Arc;

        use crate::config::TlsConfig;
        use crate::errors::{SmtpError, SmtpResult};

        /// Accepts any server certificate.
        #[derive(Debug)]
        struct NoCertificateVerification {
            provider: Arc<rustls::crypto::CryptoProvider>,
        }

        impl ServerCertVerifier for NoCertificateVerification {
            fn verify_server_cert(
                &self,
                _end_entity: &CertificateDer<'_>,
                _intermediates: &[CertificateDer<'_>],
                _server_name: &ServerName<'_>,
                _ocsp_response: &[u8],
                _now: UnixTime,
            ) -> Result<ServerCertVerified, rustls::Error> {
                Ok(ServerCertVerified::assertion())
            }

            fn verify_tls12_signature(
                &self,
                message: &[u8],
                cert: &CertificateDer<'_>,
                dss: &DigitallySignedStruct,
            ) -> Result<HandshakeSignatureValid, rustls::Error> {
                rustls::crypto::verify_tls12_signature(
                    message,
                    cert,
                    dss,
                    &self.provider.signature_verification_algorithms,
                )
            }

            fn verify_tls13_signature(
                &self,
                message: &[u8],
                cert: &CertificateDer<'_>,
                dss: &DigitallySignedStruct,
            ) -> Result<HandshakeSignatureValid, rustls::Error> {
                rustls::crypto::verify_tls13_signature(
                    message,
                    cert,
                    dss,
                    &self.provider.signature_verification_algorithms,
                )
            }

            fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
                self.provider
                    .signature_verification_algorithms
                    .supported_schemes()
            }
        }

        /// Builds the rustls client configuration for `tls`.
        pub fn rustls_client_config(tls: &TlsConfig) -> SmtpResult<rustls::ClientConfig> {
            if !tls.verifies_peer() {
                let verifier = NoCertificateVerification {
                    provider: Arc::new(rustls::crypto::ring::default_provider()),
                };
                return Ok(rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_no_client_auth());
            }

            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            if let Some(path) = &tls.ca_cert_path {
                let file = File::open(path).map_err(|e| {
                    SmtpError::configuration(format!(
                        "Cannot open CA bundle {}: {}",
                        path.display(),
                        e
                    ))
                    .with_cause(e)
                })?;
                for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
                    let cert = cert.map_err(|e| {
                        SmtpError::configuration(format!("Invalid CA bundle: {}", e)).with_cause(e)
                    })?;
                    roots.add(cert).map_err(|e| {
                        SmtpError::configuration(format!("Invalid CA certificate: {}", e))
                            .with_cause(e)
                    })?;
                }
            }

            Ok(rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth())
        }

        /// Builds a connector for `tls`.
        pub fn rustls_connector(tls: &TlsConfig) -> SmtpResult<tokio_rustls::TlsConnector> {
            let config = rustls_client_config(tls)?;
            Ok(tokio_rustls::TlsConnector::from(Arc::new(config)))
        }

        /// Parses the handshake server name.
        pub fn rustls_server_name(name: &str) -> SmtpResult<ServerName<'static>> {
            ServerName::try_from(name.to_string())
                .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", name)))
        }
    }

    /// Builds a native-tls connector for `tls`.
    #[cfg(feature = "native-tls")]
    pub fn native_connector(tls: &TlsConfig) -> SmtpResult<tokio_native_tls::TlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();

        if !tls.verifies_peer() {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }

        if let Some(path) = &tls.ca_cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                SmtpError::configuration(format!("Cannot read CA bundle {}: {}", path.display(), e))
                    .with_cause(e)
            })?;
            let cert = native_tls::Certificate::from_pem(&pem).map_err(|e| {
                SmtpError::configuration(format!("Invalid CA certificate: {}", e)).with_cause(e)
            })?;
            builder.add_root_certificate(cert);
        }

        let connector = builder.build().map_err(|e| {
            SmtpError::tls(format!("Failed to build TLS connector: {}", e)).with_cause(e)
        })?;
        Ok(tokio_native_tls::TlsConnector::from(connector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_plain_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220 ready\r\n").await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });

        let mut transport = TcpTransport::connect(&address).await.unwrap();
        assert!(!transport.is_tls());

        let mut buf = [0u8; 64];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"220 ready\r\n");

        transport.write_all(b"EHLO x\r\n").await.unwrap();
        assert_eq!(server.await.unwrap(), b"EHLO x\r\n");

        transport.close().await.unwrap();
        assert!(transport.read(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_close_reads_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = TcpTransport::connect(&address).await.unwrap();
        server.await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpTransport::connect(&address).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConnectionRefused);
    }

    #[cfg(feature = "rustls-tls")]
    #[test]
    fn test_rustls_config() {
        let verify_none = TlsConfig::builder()
            .verification(crate::config::PeerVerification::VerifyNone)
            .build()
            .unwrap();
        assert!(tls::rustls_client_config(&verify_none).is_ok());
        assert!(tls::rustls_client_config(&TlsConfig::default()).is_ok());

        let missing = TlsConfig::builder()
            .ca_cert_path("/nonexistent/ca.pem")
            .build()
            .unwrap();
        let err = tls::rustls_client_config(&missing).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConfigurationInvalid);
    }

    #[cfg(feature = "rustls-tls")]
    #[test]
    fn test_server_name() {
        assert!(tls::rustls_server_name("smtp.example.com").is_ok());
        assert!(tls::rustls_server_name("127.0.0.1").is_ok());
        assert!(tls::rustls_server_name("bad name").is_err());
    }
}
