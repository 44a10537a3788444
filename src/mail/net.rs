//! TCP + implicit TLS connections for the retrieval protocols.
//!
//! Certificate verification is a per-connection choice carried by
//! [`MailboxConfig::verify_certificates`]; nothing here touches process-wide
//! TLS state.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::MailboxConfig;
use crate::error::MailError;

/// Byte stream a protocol session runs over (plain TCP, TLS, or an in-memory pipe in tests).
pub trait MailStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> MailStream for T {}

/// Open a connection to the configured server, wrapping it in TLS when enabled.
pub async fn connect(config: &MailboxConfig) -> Result<Box<dyn MailStream>, MailError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|e| MailError::Connect {
            host: config.host.clone(),
            port: config.port,
            reason: e.to_string(),
        })?;
    debug!(host = %config.host, port = config.port, tls = config.tls, "TCP connected");

    if !config.tls {
        return Ok(Box::new(tcp));
    }

    let tls_config = client_config(config.verify_certificates)?;
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| MailError::Tls(format!("invalid server name '{}': {e}", config.host)))?;
    let tls = TlsConnector::from(tls_config)
        .connect(server_name, tcp)
        .await
        .map_err(|e| MailError::Connect {
            host: config.host.clone(),
            port: config.port,
            reason: format!("TLS handshake failed: {e}"),
        })?;
    Ok(Box::new(tls))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build a rustls client config. With `verify == false` any certificate is accepted.
fn client_config(verify: bool) -> Result<Arc<ClientConfig>, MailError> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| MailError::Tls(e.to_string()))?;

    let config = if verify {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        warn!("TLS certificate verification disabled for this connection");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Verifier for self-signed test servers: skips chain validation but still
/// checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
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
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
