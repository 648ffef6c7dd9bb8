//! rustls configuration for both ends of the tunnel.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use tokio_rustls::TlsAcceptor;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::error::TunnelError;

/// Client-side TLS configuration. With `insecure_skip_verify` the server
/// certificate is accepted unconditionally (explicit opt-in for
/// self-signed/testing deployments); handshake signatures are still
/// verified.
pub(crate) fn client_config(insecure_skip_verify: bool) -> ClientConfig {
    install_provider();

    if insecure_skip_verify {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(DisabledVerification::new())
            .with_no_client_auth()
    } else {
        let root_store = RootCertStore::from_iter(TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    }
}

/// Server-side TLS acceptor from PEM certificate and key files. ALPN is
/// pinned to `h2`; this endpoint never negotiates HTTP/1.1.
pub(crate) fn server_acceptor(cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor, TunnelError> {
    install_provider();

    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TunnelError::Tls(format!("invalid certificate/key pair: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn install_provider() {
    let _ = aws_lc_rs::default_provider().install_default();
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TunnelError> {
    let file = File::open(path)
        .map_err(|e| TunnelError::Tls(format!("failed to open {}: {e}", path.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| TunnelError::Tls(format!("failed to parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(TunnelError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TunnelError> {
    let file = File::open(path)
        .map_err(|e| TunnelError::Tls(format!("failed to open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TunnelError::Tls(format!("failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| TunnelError::Tls(format!("no private key found in {}", path.display())))
}

#[derive(Debug)]
struct DisabledVerification {
    crypto: Arc<rustls::crypto::CryptoProvider>,
}

impl DisabledVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            crypto: Arc::new(aws_lc_rs::default_provider()),
        })
    }
}

impl ServerCertVerifier for DisabledVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
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
            &self.crypto.signature_verification_algorithms,
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
            &self.crypto.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.crypto
            .signature_verification_algorithms
            .supported_schemes()
    }
}
