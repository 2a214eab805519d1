//! # TLS Material
//!
//! Load the server certificate chain and private key from PEM files and
//! build a [`TlsAcceptor`].
//!
//! ## Notes
//! - Files are read for every accepted TLS connection, so a rotated
//!   certificate takes effect without a restart.
//! - A load failure is reported to the caller, which drops only the
//!   connection being accepted.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::ServerConfig;
use crate::error::TlsError;

/// Builds an acceptor from the configured certificate and key paths.
pub fn load_acceptor(config: &ServerConfig) -> Result<TlsAcceptor, TlsError> {
    let server_config = load_server_config(&config.cert_path, &config.key_path)?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Reads both PEM files into a rustls server configuration.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<rustls::ServerConfig, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = read(path)?;
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = read(path)?;
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Human-readable certificate status for the `SHOW CERTIFICATES` command.
pub fn describe(config: &ServerConfig) -> Vec<String> {
    let mut lines = vec![
        format!("Certificate file: {}", config.cert_path.display()),
        format!("Key file: {}", config.key_path.display()),
    ];
    match load_certs(&config.cert_path) {
        Ok(certs) => lines.push(format!("Certificate chain holds {} certificate(s).", certs.len())),
        Err(err) => lines.push(format!("Certificate unavailable: {err}")),
    }
    match load_server_config(&config.cert_path, &config.key_path) {
        Ok(_) => lines.push("TLS connections are being accepted.".to_string()),
        Err(err) => lines.push(format!("TLS connections will be refused: {err}")),
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_files_are_read_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            cert_path: dir.path().join("absent.crt"),
            key_path: dir.path().join("absent.key"),
            ..ServerConfig::default()
        };
        assert!(matches!(load_acceptor(&config), Err(TlsError::Read { .. })));
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();

        let err = load_server_config(cert.path(), key.path()).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }

    #[test]
    fn describe_reports_paths_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            cert_path: dir.path().join("server.crt"),
            key_path: dir.path().join("server.key"),
            ..ServerConfig::default()
        };
        let lines = describe(&config);
        assert!(lines[0].ends_with("server.crt"));
        assert!(lines[1].ends_with("server.key"));
        assert!(lines.last().unwrap().starts_with("TLS connections will be refused"));
    }
}
