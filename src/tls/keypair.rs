//! Certificate and private key loading and pairing.

use std::path::Path;

use rcgen::KeyPair;
use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use super::{read_file, TlsError};

/// Facts about a leaf certificate needed for validation.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub not_before: String,
    pub not_after: String,
    pub currently_valid: bool,
    /// Raw subject public key bits.
    pub public_key: Vec<u8>,
}

/// Load the first certificate of a PEM file.
pub fn load_certificate(path: &Path) -> Result<CertificateInfo, TlsError> {
    let pem = read_file(path)?;
    let der = rustls_pemfile::certs(&mut pem.as_slice())
        .next()
        .ok_or_else(|| TlsError::NoCertificate {
            path: path.to_path_buf(),
        })?
        .map_err(|e| TlsError::InvalidCertificate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let (_, cert) = X509Certificate::from_der(der.as_ref()).map_err(|e| {
        TlsError::InvalidCertificate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    let validity = cert.validity();
    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        not_before: validity.not_before.to_string(),
        not_after: validity.not_after.to_string(),
        currently_valid: validity.is_valid(),
        public_key: cert.public_key().subject_public_key.data.to_vec(),
    })
}

/// Load a private key from a PEM file.
///
/// PKCS#1 (RSA) and SEC1 (EC) keys are re-encoded as PKCS#8 so that the
/// public key can be derived the same way for every encoding.
pub fn load_private_key(path: &Path) -> Result<KeyPair, TlsError> {
    let pem = read_file(path)?;
    let unsupported = |reason: String| TlsError::UnsupportedKey {
        path: path.to_path_buf(),
        reason,
    };
    let key = rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| unsupported(e.to_string()))?
        .ok_or_else(|| TlsError::NoPrivateKey {
            path: path.to_path_buf(),
        })?;

    match &key {
        PrivateKeyDer::Pkcs8(pkcs8) => KeyPair::try_from(pkcs8).map_err(|e| unsupported(e.to_string())),
        PrivateKeyDer::Pkcs1(pkcs1) => {
            let pkcs8 = wrap_pkcs8(&[RSA_ENCRYPTION, DER_NULL].concat(), pkcs1.secret_pkcs1_der());
            KeyPair::try_from(&PrivatePkcs8KeyDer::from(pkcs8))
                .map_err(|e| unsupported(format!("PKCS#1 RSA key: {}", e)))
        }
        // SEC1 does not always name its curve; try the ones nginx keys use.
        PrivateKeyDer::Sec1(sec1) => [P256, P384]
            .into_iter()
            .find_map(|curve| {
                let pkcs8 = wrap_pkcs8(&[EC_PUBLIC_KEY, curve].concat(), sec1.secret_sec1_der());
                KeyPair::try_from(&PrivatePkcs8KeyDer::from(pkcs8)).ok()
            })
            .ok_or_else(|| unsupported("SEC1 EC key is not a valid P-256 or P-384 key".to_string())),
        _ => Err(unsupported("unknown key encoding".to_string())),
    }
}

// DER encodings of the algorithm identifier parts.
const RSA_ENCRYPTION: &[u8] = &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
const DER_NULL: &[u8] = &[0x05, 0x00];
const EC_PUBLIC_KEY: &[u8] = &[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
const P256: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const P384: &[u8] = &[0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x22];

/// `PrivateKeyInfo ::= SEQUENCE { version 0, AlgorithmIdentifier, OCTET STRING key }`
fn wrap_pkcs8(algorithm: &[u8], key: &[u8]) -> Vec<u8> {
    let mut body = vec![0x02, 0x01, 0x00];
    body.extend(der_tlv(0x30, algorithm));
    body.extend(der_tlv(0x04, key));
    der_tlv(0x30, &body)
}

fn der_tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = value.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(value);
    out
}

/// Check that `key_path` holds the private key of the certificate in
/// `cert_path` and that the certificate is currently valid.
pub fn verify_pair(cert_path: &Path, key_path: &Path) -> Result<CertificateInfo, TlsError> {
    let info = load_certificate(cert_path)?;
    let key = load_private_key(key_path)?;

    if key.public_key_raw() != info.public_key.as_slice() {
        return Err(TlsError::KeyMismatch {
            certificate: cert_path.to_path_buf(),
            key: key_path.to_path_buf(),
        });
    }

    if !info.currently_valid {
        return Err(TlsError::OutsideValidity {
            path: cert_path.to_path_buf(),
            not_before: info.not_before,
            not_after: info.not_after,
        });
    }

    tracing::debug!(
        certificate = %cert_path.display(),
        subject = %info.subject,
        not_after = %info.not_after,
        "Certificate and key match"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::tls::fixtures::write_pair;

    /// PEM files produced by openssl, valid until 2126.
    fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("src/tls/testdata")
            .join(name)
    }

    #[test]
    fn test_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path(), "registry", "registry.example.org");
        let info = verify_pair(&cert, &key).unwrap();
        assert!(info.currently_valid);
        assert!(!info.public_key.is_empty());
    }

    #[test]
    fn test_mismatched_pair() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = write_pair(dir.path(), "a", "a.example.org");
        let (_, other_key) = write_pair(dir.path(), "b", "b.example.org");
        let err = verify_pair(&cert, &other_key).unwrap_err();
        assert!(matches!(err, TlsError::KeyMismatch { .. }));
    }

    #[test]
    fn test_missing_and_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.crt");
        assert!(matches!(
            load_certificate(&missing),
            Err(TlsError::NotFound { .. })
        ));

        let garbage = dir.path().join("garbage.pem");
        std::fs::write(&garbage, "not a pem file").unwrap();
        assert!(matches!(
            load_certificate(&garbage),
            Err(TlsError::NoCertificate { .. })
        ));
        assert!(matches!(
            load_private_key(&garbage),
            Err(TlsError::NoPrivateKey { .. })
        ));
    }

    #[test]
    fn test_key_file_given_as_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let (_, key) = write_pair(dir.path(), "git", "git.example.org");
        assert!(matches!(
            load_certificate(&key),
            Err(TlsError::NoCertificate { .. })
        ));
    }

    #[test]
    fn test_pkcs1_rsa_key() {
        let info = verify_pair(&testdata("git-rsa.crt"), &testdata("git-rsa-pkcs1.key")).unwrap();
        assert!(info.subject.contains("git.example.org"));
    }

    #[test]
    fn test_sec1_ec_key() {
        verify_pair(
            &testdata("registry-ec.crt"),
            &testdata("registry-ec-sec1.key"),
        )
        .unwrap();
    }

    #[test]
    fn test_legacy_encodings_still_detect_mismatch() {
        let err = verify_pair(&testdata("registry-ec.crt"), &testdata("git-rsa-pkcs1.key")).unwrap_err();
        assert!(matches!(err, TlsError::KeyMismatch { .. }));

        let err = verify_pair(&testdata("git-rsa.crt"), &testdata("registry-ec-sec1.key")).unwrap_err();
        assert!(matches!(err, TlsError::KeyMismatch { .. }));
    }

    #[test]
    fn test_expired_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["old.example.org".to_string()]).unwrap();
        params.not_before = rcgen::date_time_ymd(2015, 1, 1);
        params.not_after = rcgen::date_time_ymd(2016, 1, 1);
        let cert = params.self_signed(&key_pair).unwrap();

        let cert_path = dir.path().join("old.crt");
        let key_path = dir.path().join("old.key");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

        let info = load_certificate(&cert_path).unwrap();
        assert!(!info.currently_valid);
        match verify_pair(&cert_path, &key_path).unwrap_err() {
            TlsError::OutsideValidity { not_after, .. } => assert!(not_after.contains("2016")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
