//! Certificate inspection.
//!
//! # Responsibilities
//! - Read PEM certificate and key files from the certificate store
//! - Check the certificate validity window
//! - Prove that a certificate and a private key belong together
//!
//! # Design Decisions
//! - Never generates or renews certificates; paths are only referenced
//! - Pairing compares the public key in the leaf certificate with the public
//!   key derived from the private key
//! - Private keys may be PKCS#8, PKCS#1 (RSA) or SEC1 (EC) encoded

pub mod keypair;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use keypair::{load_certificate, load_private_key, verify_pair, CertificateInfo};

/// Failure while inspecting a certificate or private key.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no PEM certificate found in {}", path.display())]
    NoCertificate { path: PathBuf },

    #[error("invalid certificate in {}: {reason}", path.display())]
    InvalidCertificate { path: PathBuf, reason: String },

    #[error("certificate {} is not valid now (valid from {not_before} until {not_after})", path.display())]
    OutsideValidity {
        path: PathBuf,
        not_before: String,
        not_after: String,
    },

    #[error("no PEM private key found in {}", path.display())]
    NoPrivateKey { path: PathBuf },

    #[error("unsupported private key in {}: {reason}", path.display())]
    UnsupportedKey { path: PathBuf, reason: String },

    #[error("private key {} does not match certificate {}", key.display(), certificate.display())]
    KeyMismatch { certificate: PathBuf, key: PathBuf },
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    if !path.exists() {
        return Err(TlsError::NotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read(path).map_err(|source| TlsError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Self-signed fixtures for tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::{Path, PathBuf};

    /// Write a certificate for `host` and its key into `dir`.
    pub fn write_pair(dir: &Path, name: &str, host: &str) -> (PathBuf, PathBuf) {
        let certified = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        let cert_path = dir.join(format!("{name}.crt"));
        let key_path = dir.join(format!("{name}.key"));
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }
}
