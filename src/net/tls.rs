//! TLS configuration and certificate loading.

use axum_server::tls_rustls::RustlsConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    let chain_len = count_certificates(cert_path)?;
    if chain_len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("No certificate found in {:?}", cert_path),
        ));
    }
    tracing::debug!(cert_path = ?cert_path, chain_len, "Loading TLS certificate chain");

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

fn count_certificates(cert_path: &Path) -> Result<usize, std::io::Error> {
    let mut reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    Ok(certs.len())
}
