use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig as RustlsServerConfig;

use dispatch_common::DispatchError;

/// Loads (or, on first boot, generates and persists) the self-signed
/// certificate/key pair used by the command channel's TLS listener.
///
/// A throwaway cert is generated once and reused on every subsequent boot,
/// stored as PEM files under `cert_dir`.
pub fn load_or_create_server_config(cert_dir: &Path) -> Result<RustlsServerConfig, DispatchError> {
    std::fs::create_dir_all(cert_dir)
        .map_err(|e| DispatchError::Filesystem(format!("creating cert dir: {e}")))?;

    let cert_path = cert_dir.join("server.crt");
    let key_path = cert_dir.join("server.key");

    let (cert_pem, key_pem) = if cert_path.exists() && key_path.exists() {
        tracing::info!("loading existing self-signed certificate");
        let cert = std::fs::read_to_string(&cert_path)
            .map_err(|e| DispatchError::Filesystem(format!("reading {}: {e}", cert_path.display())))?;
        let key = std::fs::read_to_string(&key_path)
            .map_err(|e| DispatchError::Filesystem(format!("reading {}: {e}", key_path.display())))?;
        (cert, key)
    } else {
        tracing::info!("generating new self-signed certificate");
        let params = rcgen::CertificateParams::new(Vec::new())
            .map_err(|e| DispatchError::Internal(format!("cert params: {e}")))?;
        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| DispatchError::Internal(format!("key generation: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| DispatchError::Internal(format!("self-signing cert: {e}")))?;

        let cert_pem = cert.pem();
        let key_pem = key_pair.serialize_pem();

        std::fs::write(&cert_path, &cert_pem)
            .map_err(|e| DispatchError::Filesystem(format!("writing {}: {e}", cert_path.display())))?;
        std::fs::write(&key_path, &key_pem)
            .map_err(|e| DispatchError::Filesystem(format!("writing {}: {e}", key_path.display())))?;

        (cert_pem, key_pem)
    };

    let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<CertificateDer>, _>>()
        .map_err(|e| DispatchError::Internal(format!("parsing certificate PEM: {e}")))?;

    let key_der = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_bytes())
        .next()
        .ok_or_else(|| DispatchError::Internal("no private key found in PEM".into()))?
        .map_err(|e| DispatchError::Internal(format!("parsing key PEM: {e}")))?;

    let config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            cert_der,
            rustls::pki_types::PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.secret_pkcs8_der().to_vec())),
        )
        .map_err(|e| DispatchError::Internal(format!("building TLS config: {e}")))?;

    Ok(config)
}

/// Wrap a built server config in an `Arc` the way `tokio_rustls::TlsAcceptor` expects.
pub fn acceptor(config: RustlsServerConfig) -> tokio_rustls::TlsAcceptor {
    tokio_rustls::TlsAcceptor::from(Arc::new(config))
}
