//! Optional wire transforms applied after framing and before the datagram is
//! handed to the transport: compression and, behind the `encryption`
//! feature, authenticated encryption.

use std::sync::Arc;

use bytes::Bytes;

use crate::config::{CodecConfig, Compression, Encryption};
use crate::error::{ProtocolError, Result};

pub trait CompressionCodec: Send + Sync {
    fn compress(&self, data: &[u8]) -> Bytes;
    fn decompress(&self, data: &[u8]) -> Result<Bytes>;
}

/// No-op compressor, the default when nothing more is configured.
pub struct IdentityCompression;

impl CompressionCodec for IdentityCompression {
    fn compress(&self, data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    fn decompress(&self, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }
}

pub trait EncryptionCodec: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Bytes>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Bytes>;
}

/// Build the compression codec named by `config`, falling back to the
/// identity codec (and logging why) when the crate was built without the
/// `compression` feature that backs the requested algorithm.
pub fn build_compression(config: &CodecConfig) -> Arc<dyn CompressionCodec> {
    match config.compression {
        Compression::None => Arc::new(IdentityCompression),
        #[cfg(feature = "compression")]
        Compression::Lz4 => Arc::new(compression::Lz4Compression),
        #[cfg(not(feature = "compression"))]
        Compression::Lz4 => {
            tracing::warn!("lz4 compression requested but the `compression` feature is disabled; using identity");
            Arc::new(IdentityCompression)
        }
        #[cfg(feature = "compression")]
        Compression::Zstd => Arc::new(compression::ZstdCompression::new(config.compression_level)),
        #[cfg(not(feature = "compression"))]
        Compression::Zstd => {
            tracing::warn!("zstd compression requested but the `compression` feature is disabled; using identity");
            Arc::new(IdentityCompression)
        }
    }
}

/// Build the encryption codec named by `config`, if any. Returns `None` when
/// encryption is disabled, or when the `encryption` feature isn't compiled
/// in for the requested algorithm.
pub fn build_encryption(config: &CodecConfig, key: &[u8; 32]) -> Option<Arc<dyn EncryptionCodec>> {
    match config.encryption {
        Encryption::None => None,
        #[cfg(feature = "encryption")]
        Encryption::ChaCha20Poly1305 => Some(Arc::new(chacha::ChaChaCodec::new(key))),
        #[cfg(not(feature = "encryption"))]
        Encryption::ChaCha20Poly1305 => {
            tracing::warn!("chacha20poly1305 requested but the `encryption` feature is disabled; sending plaintext");
            None
        }
        #[cfg(feature = "encryption")]
        Encryption::Aes256Gcm => Some(Arc::new(aes_gcm_codec::AesGcmCodec::new(key))),
        #[cfg(not(feature = "encryption"))]
        Encryption::Aes256Gcm => {
            tracing::warn!("aes-256-gcm requested but the `encryption` feature is disabled; sending plaintext");
            None
        }
    }
}

#[cfg(feature = "compression")]
pub mod compression {
    use super::*;

    /// LZ4 block compression with the uncompressed length prepended, so
    /// decompression doesn't need the original size tracked out of band.
    pub struct Lz4Compression;

    impl CompressionCodec for Lz4Compression {
        fn compress(&self, data: &[u8]) -> Bytes {
            Bytes::from(lz4_flex::compress_prepend_size(data))
        }

        fn decompress(&self, data: &[u8]) -> Result<Bytes> {
            lz4_flex::decompress_size_prepended(data)
                .map(Bytes::from)
                .map_err(|_| ProtocolError::Malformed("lz4 decompression failure").into())
        }
    }

    pub struct ZstdCompression {
        level: i32,
    }

    impl ZstdCompression {
        pub fn new(level: u32) -> Self {
            Self { level: level.min(21) as i32 }
        }
    }

    impl CompressionCodec for ZstdCompression {
        fn compress(&self, data: &[u8]) -> Bytes {
            zstd::bulk::compress(data, self.level)
                .map(Bytes::from)
                .unwrap_or_else(|_| Bytes::copy_from_slice(data))
        }

        fn decompress(&self, data: &[u8]) -> Result<Bytes> {
            zstd::stream::decode_all(data)
                .map(Bytes::from)
                .map_err(|_| ProtocolError::Malformed("zstd decompression failure").into())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn lz4_round_trips() {
            let codec = Lz4Compression;
            let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbb";
            let compressed = codec.compress(data);
            assert_eq!(&codec.decompress(&compressed).unwrap()[..], data);
        }

        #[test]
        fn zstd_round_trips() {
            let codec = ZstdCompression::new(3);
            let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbb";
            let compressed = codec.compress(data);
            assert_eq!(&codec.decompress(&compressed).unwrap()[..], data);
        }
    }
}

#[cfg(feature = "encryption")]
pub mod aes_gcm_codec {
    use super::*;
    use aes_gcm::aead::{Aead, KeyInit, OsRng};
    use aes_gcm::{Aes256Gcm, AeadCore, Key, Nonce};

    /// AES-256-GCM AEAD codec; each message is prefixed with its 12-byte
    /// nonce, same framing convention as [`super::chacha::ChaChaCodec`].
    pub struct AesGcmCodec {
        cipher: Aes256Gcm,
    }

    impl AesGcmCodec {
        pub fn new(key: &[u8; 32]) -> Self {
            let key = Key::<Aes256Gcm>::from_slice(key);
            Self { cipher: Aes256Gcm::new(key) }
        }
    }

    impl EncryptionCodec for AesGcmCodec {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Bytes> {
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let ciphertext = self
                .cipher
                .encrypt(&nonce, plaintext)
                .map_err(|_| ProtocolError::Malformed("encryption failure"))?;
            let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
            Ok(Bytes::from(out))
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Bytes> {
            if ciphertext.len() < 12 {
                return Err(ProtocolError::Malformed("ciphertext shorter than nonce").into());
            }
            let (nonce_bytes, body) = ciphertext.split_at(12);
            let nonce = Nonce::from_slice(nonce_bytes);
            let plaintext = self
                .cipher
                .decrypt(nonce, body)
                .map_err(|_| ProtocolError::Malformed("decryption failure"))?;
            Ok(Bytes::from(plaintext))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn encrypt_then_decrypt_round_trips() {
            let codec = AesGcmCodec::new(&[3u8; 32]);
            let plaintext = b"authoritative snapshot payload";
            let ciphertext = codec.encrypt(plaintext).unwrap();
            let decrypted = codec.decrypt(&ciphertext).unwrap();
            assert_eq!(&decrypted[..], plaintext);
        }
    }
}

#[cfg(feature = "encryption")]
pub mod chacha {
    use super::*;
    use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
    use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};

    /// ChaCha20-Poly1305 AEAD codec; each message is prefixed with its
    /// 12-byte nonce so decryption doesn't need out-of-band nonce tracking.
    pub struct ChaChaCodec {
        cipher: ChaCha20Poly1305,
    }

    impl ChaChaCodec {
        pub fn new(key: &[u8; 32]) -> Self {
            let key = Key::from_slice(key);
            Self {
                cipher: ChaCha20Poly1305::new(key),
            }
        }
    }

    impl EncryptionCodec for ChaChaCodec {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Bytes> {
            let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
            let ciphertext = self
                .cipher
                .encrypt(&nonce, plaintext)
                .map_err(|_| ProtocolError::Malformed("encryption failure"))?;
            let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
            Ok(Bytes::from(out))
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Bytes> {
            if ciphertext.len() < 12 {
                return Err(ProtocolError::Malformed("ciphertext shorter than nonce").into());
            }
            let (nonce_bytes, body) = ciphertext.split_at(12);
            let nonce = Nonce::from_slice(nonce_bytes);
            let plaintext = self
                .cipher
                .decrypt(nonce, body)
                .map_err(|_| ProtocolError::Malformed("decryption failure"))?;
            Ok(Bytes::from(plaintext))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_compression_is_lossless() {
        let codec = IdentityCompression;
        let data = b"hello";
        let compressed = codec.compress(data);
        assert_eq!(&codec.decompress(&compressed).unwrap()[..], data);
    }
}
