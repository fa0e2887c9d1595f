use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};

use crate::error::TlsError;

/// Checks that the PEM pair can actually back a TLS listener before the
/// server commits to serving HTTPS/WSS with it.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, TlsError> {
    let cert_reader = &mut BufReader::new(File::open(cert_path)?);
    let key_reader = &mut BufReader::new(File::open(key_path)?);

    let certs = certs(cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate);
    }
    let key = private_key(key_reader)?.ok_or(TlsError::NoPrivateKey)?;

    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_tls_config(&dir.path().join("cert.pem"), &dir.path().join("key.pem"));
        assert!(matches!(result, Err(TlsError::Io(_))));
    }

    #[test]
    fn pem_without_certificate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        File::create(&cert).unwrap().write_all(b"not a pem file\n").unwrap();
        File::create(&key).unwrap().write_all(b"").unwrap();

        assert!(matches!(load_tls_config(&cert, &key), Err(TlsError::NoCertificate)));
    }
}
