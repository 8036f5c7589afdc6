//! Mutual-TLS listener configuration.
//!
//! The bridge terminates TLS itself and requires every peer to present a
//! certificate chaining to the configured CA. Connections that fail the
//! TLS handshake are dropped at the transport layer without a protocol
//! reply. Certificate material is loaded once at startup; rotation
//! requires a restart.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::server::AllowAnyAuthenticatedClient;
use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use thiserror::Error;

use crate::config::TlsConfig;

/// Errors raised while building the TLS server configuration. All are
/// fatal at startup (exit code 2).
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Path that failed to open.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A PEM file could not be parsed.
    #[error("failed to parse PEM in {path}: {source}")]
    ParsePem {
        /// Path that failed to parse.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// No certificate was found in the file.
    #[error("no certificate found in {path}")]
    NoCertificate {
        /// Path that held no certificate.
        path: String,
    },

    /// No usable private key was found in the file.
    #[error("no PKCS#8 or RSA private key found in {path}")]
    NoPrivateKey {
        /// Path that held no key.
        path: String,
    },

    /// A CA certificate could not be added to the root store.
    #[error("invalid CA certificate in {path}: {source}")]
    InvalidCa {
        /// Path the certificate came from.
        path: String,
        /// Underlying rustls failure.
        #[source]
        source: rustls::Error,
    },

    /// The server configuration could not be assembled.
    #[error("failed to build TLS server config: {0}")]
    Build(#[from] rustls::Error),
}

/// Builds the rustls server configuration for the bridge endpoint:
/// the server certificate chain plus mandatory client authentication
/// against the configured CA.
///
/// # Errors
///
/// Returns [`TlsError`] when any PEM file is missing, unparsable, or the
/// resulting configuration is rejected by rustls.
pub fn make_server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;

    let mut roots = RootCertStore::empty();
    for ca in load_certs(&tls.ca_path)? {
        roots.add(&ca).map_err(|source| TlsError::InvalidCa {
            path: tls.ca_path.clone(),
            source,
        })?;
    }
    let verifier = AllowAnyAuthenticatedClient::new(roots);

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

fn load_certs(path: &str) -> Result<Vec<Certificate>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Open {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).map_err(|source| TlsError::ParsePem {
        path: path.to_string(),
        source,
    })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate {
            path: path.to_string(),
        });
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &str) -> Result<PrivateKey, TlsError> {
    let keys = read_keys(path, rustls_pemfile::pkcs8_private_keys)?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    // Fall back to legacy RSA keys.
    let keys = read_keys(path, rustls_pemfile::rsa_private_keys)?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    Err(TlsError::NoPrivateKey {
        path: path.to_string(),
    })
}

fn read_keys(
    path: &str,
    parse: impl Fn(&mut dyn std::io::BufRead) -> std::io::Result<Vec<Vec<u8>>>,
) -> Result<Vec<Vec<u8>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Open {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    parse(&mut reader).map_err(|source| TlsError::ParsePem {
        path: path.to_string(),
        source,
    })
}
