//! X.509 signing identities and SHA-1 digests.
//!
//! Supplements the cipher/KDF half of this module with the asymmetric
//! side of the container's signature trailer: loading a private key and
//! certificate, signing a byte range, and verifying a signature against
//! an embedded certificate. Kept as its own small adapter module per
//! external primitive, same shape as the sibling cipher/KDF module.

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::Sha256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("failed to read key material: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("signature verification failed")]
    VerificationFailed,
}

/// A loaded signing identity: a private key paired with the DER-encoded
/// certificate that vouches for its public half.
pub struct Identity {
    private_key: RsaPrivateKey,
    certificate_der: Vec<u8>,
}

impl Identity {
    /// Load a PEM private key (optionally PKCS#8-encrypted) and a DER
    /// certificate from disk.
    pub fn open(
        key_path: &std::path::Path,
        certificate_path: &std::path::Path,
        password: Option<&str>,
    ) -> Result<Identity, CryptoError> {
        let key_pem = std::fs::read_to_string(key_path)?;
        let private_key = match password {
            Some(pw) => RsaPrivateKey::from_pkcs8_encrypted_pem(&key_pem, pw)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
            None => RsaPrivateKey::from_pkcs8_pem(&key_pem)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
        };
        let certificate_der = std::fs::read(certificate_path)?;
        // Validate eagerly so a malformed certificate is reported at
        // open time rather than at the next verify/describe call.
        x509_parser::parse_x509_certificate(&certificate_der)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        Ok(Identity { private_key, certificate_der })
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Sign `data` with PKCS#1 v1.5 / SHA-256.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key
            .try_sign_with_rng(&mut rand::thread_rng(), data)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        Ok(signature.to_vec())
    }

    /// Human-readable summary of the identity, used by the CLI's `info`
    /// subcommand (supplements `eet_identity_print`).
    pub fn describe(&self) -> String {
        describe_certificate(&self.certificate_der)
            .unwrap_or_else(|e| format!("<unreadable certificate: {e}>"))
    }
}

/// Verify `signature` over `data` against the RSA public key embedded in
/// `certificate_der`. Returns `Ok(())` on success, an error otherwise —
/// never panics on a malformed certificate.
pub fn verify_signature(
    certificate_der: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let public_key = extract_public_key(certificate_der)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature = Signature::try_from(signature)
        .map_err(|_| CryptoError::VerificationFailed)?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

fn extract_public_key(certificate_der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    use rsa::pkcs8::DecodePublicKey;
    let (_, cert) = x509_parser::parse_x509_certificate(certificate_der)
        .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
    // `spki.raw` is the DER encoding of the whole SubjectPublicKeyInfo
    // structure, which is exactly what `DecodePublicKey` expects.
    let spki_der = cert.public_key().raw;
    RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))
}

/// Diagnostic summary of a DER certificate: subject, issuer, validity
/// window (supplements `eet_identity_certificate_print`).
pub fn describe_certificate(certificate_der: &[u8]) -> Result<String, CryptoError> {
    let (_, cert) = x509_parser::parse_x509_certificate(certificate_der)
        .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
    Ok(format!(
        "subject: {}\nissuer: {}\nnot before: {}\nnot after: {}",
        cert.subject(),
        cert.issuer(),
        cert.validity().not_before,
        cert.validity().not_after,
    ))
}

/// SHA-1 digest of `data`, backing the container's `sha1()` accessor.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_known_vector() {
        // SHA-1("abc")
        let digest = sha1_digest(b"abc");
        assert_eq!(
            hex::encode(digest),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        use rsa::pkcs8::EncodePrivateKey;
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let signing_key = SigningKey::<Sha256>::new(private_key.clone());
        let data = b"container directory bytes to be signed";
        let signature = signing_key.try_sign_with_rng(&mut rng, data).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        let verifying_key = VerifyingKey::<Sha256>::new(public_key);
        assert!(verifying_key.verify(data, &signature).is_ok());
        let _ = private_key.to_pkcs8_der().unwrap();
    }
}
