//! # Token Encryptor
//!
//! Produces the encrypted authorisation token sent in the KSeF login step.
//!
//! ## Token Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   plaintext  =  secret  "|"  challenge epoch millis   (UTF-8 bytes)     │
//! │                                                                         │
//! │        │                                                                │
//! │        ▼  RSA PKCS#1 v1.5, environment public key, fresh randomness     │
//! │                                                                         │
//! │   ciphertext (modulus size bytes)                                       │
//! │                                                                         │
//! │        │                                                                │
//! │        ▼  standard base64                                               │
//! │                                                                         │
//! │   "encryptedToken" field of the login body                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The server rejects OAEP; padding must be PKCS#1 v1.5.
//! Nothing in here logs. Errors never carry the secret or the ciphertext.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use std::fmt;

use crate::error::CryptoError;

/// PKCS#1 v1.5 padding overhead in bytes.
const PKCS1_V15_OVERHEAD: usize = 11;

/// Environment public key used to encrypt login tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parses a PEM key. Accepts both `BEGIN PUBLIC KEY` (SPKI) and
    /// `BEGIN RSA PUBLIC KEY` (PKCS#1).
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let pem = pem.trim();
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|spki_err| {
                RsaPublicKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                    CryptoError::MalformedKey(format!(
                        "not SPKI ({}) nor PKCS#1 ({})",
                        spki_err, pkcs1_err
                    ))
                })
            })
            .map(PublicKey)
    }

    /// Parses an SPKI DER key.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        RsaPublicKey::from_public_key_der(der)
            .map(PublicKey)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }

    /// Longest plaintext one PKCS#1 v1.5 block can carry.
    pub fn max_plaintext_len(&self) -> usize {
        self.0.size().saturating_sub(PKCS1_V15_OVERHEAD)
    }
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        PublicKey(key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey").field("bits", &self.bits()).finish()
    }
}

/// Encrypts `secret|challenge_timestamp` for the login step.
///
/// Each call draws fresh padding randomness, so two calls with the same
/// inputs return different ciphertexts.
pub fn encrypt_token(
    secret: &str,
    challenge_timestamp: &str,
    public_key: &PublicKey,
) -> Result<String, CryptoError> {
    let plaintext = format!("{}|{}", secret, challenge_timestamp);
    let max = public_key.max_plaintext_len();
    if plaintext.len() > max {
        return Err(CryptoError::PlaintextTooLong {
            len: plaintext.len(),
            max,
        });
    }

    let mut rng = rand::thread_rng();
    let ciphertext = public_key
        .0
        .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(STANDARD.encode(ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;
    use std::sync::OnceLock;

    fn private_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate test key")
        })
    }

    fn public_key() -> PublicKey {
        PublicKey::from(private_key().to_public_key())
    }

    fn decrypt(encoded: &str) -> String {
        let ciphertext = STANDARD.decode(encoded).unwrap();
        let plaintext = private_key().decrypt(Pkcs1v15Encrypt, &ciphertext).unwrap();
        String::from_utf8(plaintext).unwrap()
    }

    #[test]
    fn test_decrypts_to_secret_and_timestamp() {
        let encoded = encrypt_token("A1B2C3D4E5", "1700000000123", &public_key()).unwrap();
        assert_eq!(decrypt(&encoded), "A1B2C3D4E5|1700000000123");
    }

    #[test]
    fn test_ciphertext_is_randomized() {
        let key = public_key();
        let first = encrypt_token("secret", "1", &key).unwrap();
        let second = encrypt_token("secret", "1", &key).unwrap();
        assert_ne!(first, second);
        assert_eq!(decrypt(&first), decrypt(&second));
    }

    #[test]
    fn test_plaintext_too_long() {
        let key = public_key();
        let secret = "x".repeat(key.max_plaintext_len());
        let err = encrypt_token(&secret, "1700000000000", &key).unwrap_err();
        match err {
            CryptoError::PlaintextTooLong { len, max } => {
                assert_eq!(max, 128 - 11);
                assert_eq!(len, secret.len() + 1 + 13);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pem_formats() {
        let rsa_key = private_key().to_public_key();
        let spki = rsa_key.to_public_key_pem(LineEnding::LF).unwrap();
        let pkcs1 = rsa_key.to_pkcs1_pem(LineEnding::LF).unwrap();
        let der = rsa_key.to_public_key_der().unwrap();

        let from_spki = PublicKey::from_pem(&spki).unwrap();
        let from_pkcs1 = PublicKey::from_pem(&pkcs1).unwrap();
        let from_der = PublicKey::from_der(der.as_bytes()).unwrap();

        assert_eq!(from_spki, from_pkcs1);
        assert_eq!(from_spki, from_der);
        assert_eq!(from_spki.bits(), 1024);
    }

    #[test]
    fn test_malformed_key() {
        assert!(matches!(
            PublicKey::from_pem("-----BEGIN PUBLIC KEY-----\nnope\n-----END PUBLIC KEY-----"),
            Err(CryptoError::MalformedKey(_))
        ));
        assert!(matches!(
            PublicKey::from_der(b"garbage"),
            Err(CryptoError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_debug_shows_only_size() {
        assert_eq!(format!("{:?}", public_key()), "PublicKey { bits: 1024 }");
    }
}
