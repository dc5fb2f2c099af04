//! Certificate and private key pairing checks.

use rustls::crypto::ring::sign::any_supported_type;
use rustls::sign::CertifiedKey;
use rustls::{InconsistentKeys, SignatureAlgorithm};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use x509_parser::parse_x509_certificate;

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertError {
    #[error("failed to decode PEM certificate")]
    DecodeCert,

    #[error("failed to parse PEM certificate")]
    ParseCert,

    #[error("invalid certificate purpose (IsCA={0})")]
    Purpose(bool),

    #[error("failed to decode PEM private key")]
    DecodeKey,

    #[error("failed to parse private key")]
    ParseKey,

    #[error("private key type does not match public key type")]
    KeyTypeMismatch,

    #[error("private key does not match public key")]
    KeyMismatch,
}

/// Parse a PEM certificate and its PEM private key and check that they
/// belong together and that the certificate's CA flag equals `is_ca`.
pub fn validate_cert_and_key(cert_pem: &str, key_pem: &str, is_ca: bool) -> Result<(), CertError> {
    let cert_der =
        CertificateDer::from_pem_slice(cert_pem.as_bytes()).map_err(|_| CertError::DecodeCert)?;
    let (_, cert) = parse_x509_certificate(cert_der.as_ref()).map_err(|_| CertError::ParseCert)?;
    let cert_is_ca = cert.is_ca();
    if cert_is_ca != is_ca {
        return Err(CertError::Purpose(cert_is_ca));
    }

    let key_der =
        PrivateKeyDer::from_pem_slice(key_pem.as_bytes()).map_err(|_| CertError::DecodeKey)?;
    let signing_key = any_supported_type(&key_der).map_err(|_| CertError::ParseKey)?;

    let cert_key_oid = cert.public_key().algorithm.algorithm.to_id_string();
    let expected_oid = match signing_key.algorithm() {
        SignatureAlgorithm::RSA => OID_RSA_ENCRYPTION,
        SignatureAlgorithm::ECDSA => OID_EC_PUBLIC_KEY,
        SignatureAlgorithm::ED25519 => OID_ED25519,
        _ => return Err(CertError::KeyTypeMismatch),
    };
    if cert_key_oid != expected_oid {
        return Err(CertError::KeyTypeMismatch);
    }

    let certified = CertifiedKey::new(vec![cert_der.clone()], signing_key);
    match certified.keys_match() {
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => {
            Err(CertError::KeyMismatch)
        }
        // Key types whose public half cannot be derived are accepted.
        _ => Ok(()),
    }
}
