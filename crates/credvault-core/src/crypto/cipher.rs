use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes128Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use super::keyset::{AeadAlgorithm, Keyset};
use crate::error::VaultError;

/// Nonce length shared by both supported algorithms (96 bits)
pub const NONCE_LEN: usize = 12;

/// Authentication tag length shared by both supported algorithms
pub const TAG_LEN: usize = 16;

enum Primitive {
    Aes128Gcm(Box<Aes128Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

/// Authenticated cipher bound to one keyset.
///
/// Output layout is `nonce || ciphertext || tag`; a fresh random nonce is
/// drawn for every call.
pub struct AeadCipher {
    algorithm: AeadAlgorithm,
    primitive: Primitive,
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCipher")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn bad_key<E>(_: E) -> VaultError {
    VaultError::Keyset("invalid key length".to_string())
}

impl AeadCipher {
    pub fn new(keyset: &Keyset) -> Result<Self, VaultError> {
        let key = keyset.key_bytes();
        let primitive = match keyset.algorithm {
            AeadAlgorithm::Aes128Gcm => {
                Primitive::Aes128Gcm(Box::new(Aes128Gcm::new_from_slice(key).map_err(bad_key)?))
            }
            AeadAlgorithm::ChaCha20Poly1305 => Primitive::ChaCha20Poly1305(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(bad_key)?,
            )),
        };
        Ok(Self {
            algorithm: keyset.algorithm,
            primitive,
        })
    }

    pub fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    pub fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let payload = Payload {
            msg: plaintext,
            aad: associated_data,
        };
        let sealed = match &self.primitive {
            Primitive::Aes128Gcm(c) => c.encrypt(aes_gcm::Nonce::from_slice(&nonce), payload),
            Primitive::ChaCha20Poly1305(c) => {
                c.encrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload)
            }
        }
        .map_err(|_| VaultError::Crypto("AEAD seal failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Fails on a wrong key, wrong associated data, truncation or any
    /// modified byte.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Crypto("ciphertext truncated".to_string()));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        let payload = Payload {
            msg: sealed,
            aad: associated_data,
        };
        let opened = match &self.primitive {
            Primitive::Aes128Gcm(c) => c.decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            Primitive::ChaCha20Poly1305(c) => {
                c.decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
            }
        }
        .map_err(|_| VaultError::Crypto("authentication failed".to_string()))?;
        Ok(Zeroizing::new(opened))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AD: &[u8] = b"test-ad-v1";

    #[test]
    fn test_roundtrip_both_algorithms() {
        for algorithm in [AeadAlgorithm::Aes128Gcm, AeadAlgorithm::ChaCha20Poly1305] {
            let cipher = AeadCipher::new(&Keyset::generate(algorithm)).unwrap();
            let sealed = cipher.encrypt(b"refresh-token", AD).unwrap();
            assert_eq!(sealed.len(), NONCE_LEN + b"refresh-token".len() + TAG_LEN);
            assert_eq!(&*cipher.decrypt(&sealed, AD).unwrap(), b"refresh-token");
        }
    }

    #[test]
    fn test_nonce_is_fresh() {
        let cipher = AeadCipher::new(&Keyset::generate(AeadAlgorithm::Aes128Gcm)).unwrap();
        let a = cipher.encrypt(b"same", AD).unwrap();
        let b = cipher.encrypt(b"same", AD).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_associated_data_fails() {
        let cipher = AeadCipher::new(&Keyset::generate(AeadAlgorithm::Aes128Gcm)).unwrap();
        let sealed = cipher.encrypt(b"secret", AD).unwrap();
        assert!(cipher.decrypt(&sealed, b"other-app-v1").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = AeadCipher::new(&Keyset::generate(AeadAlgorithm::Aes128Gcm)).unwrap();
        let b = AeadCipher::new(&Keyset::generate(AeadAlgorithm::Aes128Gcm)).unwrap();
        let sealed = a.encrypt(b"secret", AD).unwrap();
        assert!(b.decrypt(&sealed, AD).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let cipher = AeadCipher::new(&Keyset::generate(AeadAlgorithm::Aes128Gcm)).unwrap();
        let sealed = cipher.encrypt(b"secret", AD).unwrap();
        assert!(cipher.decrypt(&sealed[..NONCE_LEN + 3], AD).is_err());
        assert!(cipher.decrypt(&[], AD).is_err());
    }
}
