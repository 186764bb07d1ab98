//! Primitives of the AES-128 / NIST P-256 EAC profile

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use cmac::{Cmac, Mac};
use p256::{
    AffinePoint, FieldBytes, NonZeroScalar, ProjectivePoint, PublicKey, Scalar,
    elliptic_curve::{ff::PrimeField, sec1::ToEncodedPoint},
};
use rand::RngCore;
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    backend::CryptoError,
    constants::{SM_BLOCK_LENGTH, tags},
    tlv::wrap,
};

/// KDF counter of the encryption key
pub(crate) const KDF_ENC: u32 = 1;
/// KDF counter of the MAC key
pub(crate) const KDF_MAC: u32 = 2;
/// KDF counter of the password key
pub(crate) const KDF_PI: u32 = 3;

/// Length of authentication tokens and checksums
pub(crate) const MAC_LENGTH: usize = 8;

pub(crate) type Key = [u8; 16];

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// Derive a 128-bit key from a shared secret and a counter.
///
/// # Arguments
///
/// * `secret` - The shared secret, optionally followed by a nonce.
/// * `counter` - One of [`KDF_ENC`], [`KDF_MAC`] or [`KDF_PI`].
///
/// # Returns
///
/// The first 16 bytes of `SHA-1(secret || counter)`.
pub(crate) fn kdf(secret: &[u8], counter: u32) -> Key {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(counter.to_be_bytes());
    let hash = hasher.finalize();

    let mut key = Key::default();
    key.copy_from_slice(&hash[..16]);
    key
}

/// The PACE password key K_pi
///
/// The MRZ password is the SHA-1 of the MRZ information.
pub(crate) fn password_key(password: &[u8], hash_password: bool) -> Key {
    if hash_password {
        kdf(&Sha1::digest(password), KDF_PI)
    } else {
        kdf(password, KDF_PI)
    }
}

/// AES-CBC encryption of block aligned data
pub(crate) fn cbc_encrypt(key: &Key, iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % SM_BLOCK_LENGTH != 0 {
        return Err(CryptoError::Padding);
    }
    let mut buf = data.to_vec();
    let len = buf.len();
    Encryptor::new_from_slices(key, iv)
        .map_err(|_| CryptoError::KeyLength)?
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| CryptoError::Padding)?;
    Ok(buf)
}

/// AES-CBC decryption of block aligned data
pub(crate) fn cbc_decrypt(key: &Key, iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % SM_BLOCK_LENGTH != 0 {
        return Err(CryptoError::Padding);
    }
    let mut buf = data.to_vec();
    Decryptor::new_from_slices(key, iv)
        .map_err(|_| CryptoError::KeyLength)?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::Padding)?;
    Ok(buf)
}

/// AES-CMAC truncated to 8 bytes
pub(crate) fn cmac(key: &Key, data: &[u8]) -> Result<[u8; MAC_LENGTH], CryptoError> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(|_| CryptoError::KeyLength)?;
    mac.update(data);
    let tag = mac.finalize().into_bytes();

    let mut out = [0u8; MAC_LENGTH];
    out.copy_from_slice(&tag[..MAC_LENGTH]);
    Ok(out)
}

/// Constant time comparison against a truncated AES-CMAC
pub(crate) fn cmac_verify(key: &Key, data: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = <Cmac<Aes128> as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(data);
    tag.len() == MAC_LENGTH && mac.verify_truncated_left(tag).is_ok()
}

/// The send sequence counter as a cipher block
pub(crate) fn ssc_block(ssc: u64) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[8..].copy_from_slice(&ssc.to_be_bytes());
    block
}

/// Random bytes from the thread local generator
pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// A random non-zero scalar
pub(crate) fn random_scalar() -> NonZeroScalar {
    NonZeroScalar::random(&mut rand_v8::thread_rng())
}

/// Interpret a big endian nonce of at most 32 bytes as a scalar
pub(crate) fn scalar_from_nonce(nonce: &[u8]) -> Result<Scalar, CryptoError> {
    if nonce.len() > 32 {
        return Err(CryptoError::Malformed("nonce"));
    }
    let mut repr = FieldBytes::default();
    repr[32 - nonce.len()..].copy_from_slice(nonce);
    Option::from(Scalar::from_repr(repr)).ok_or(CryptoError::Malformed("nonce"))
}

/// Decode an uncompressed SEC1 point, rejecting the identity
pub(crate) fn decode_point(encoded: &[u8]) -> Result<ProjectivePoint, CryptoError> {
    PublicKey::from_sec1_bytes(encoded)
        .map(|key| key.to_projective())
        .map_err(|_| CryptoError::InvalidPublicKey)
}

/// Encode a point uncompressed, rejecting the identity
pub(crate) fn encode_point(point: &ProjectivePoint) -> Result<Bytes, CryptoError> {
    if *point == ProjectivePoint::IDENTITY {
        return Err(CryptoError::InvalidPublicKey);
    }
    let encoded = AffinePoint::from(*point).to_encoded_point(false);
    Ok(Bytes::copy_from_slice(encoded.as_bytes()))
}

/// The x-coordinate of a point, which is also its compressed representation for EAC
pub(crate) fn x_coordinate(point: &ProjectivePoint) -> Result<Bytes, CryptoError> {
    if *point == ProjectivePoint::IDENTITY {
        return Err(CryptoError::InvalidPublicKey);
    }
    let encoded = AffinePoint::from(*point).to_encoded_point(false);
    encoded
        .x()
        .map(|x| Bytes::copy_from_slice(x))
        .ok_or(CryptoError::InvalidPublicKey)
}

/// ECDH: the x-coordinate of `secret * public`
pub(crate) fn shared_secret(secret: &Scalar, public: &[u8]) -> Result<Bytes, CryptoError> {
    x_coordinate(&(decode_point(public)? * secret))
}

/// Public key data object (tag 0x7F49) authenticated by the tokens
pub(crate) fn public_key_data_object(protocol: &[u8], point: &[u8]) -> Vec<u8> {
    let mut content = wrap(&[tags::OBJECT_IDENTIFIER], protocol);
    content.extend(wrap(&[tags::EC_PUBLIC_POINT], point));
    wrap(&tags::PUBLIC_KEY, &content)
}

/// Secure messaging keys derived from a key agreement
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SessionKeys {
    enc: Key,
    mac: Key,
}

impl SessionKeys {
    /// Derive K_enc and K_mac from the shared secret and an optional nonce
    pub(crate) fn derive(secret: &[u8], nonce: &[u8]) -> Self {
        let mut input = secret.to_vec();
        input.extend_from_slice(nonce);
        let keys = Self {
            enc: kdf(&input, KDF_ENC),
            mac: kdf(&input, KDF_MAC),
        };
        input.zeroize();
        keys
    }

    /// Authentication token over the other party's public key
    pub(crate) fn token(&self, protocol: &[u8], point: &[u8]) -> Result<Bytes, CryptoError> {
        let token = cmac(&self.mac, &public_key_data_object(protocol, point))?;
        Ok(Bytes::copy_from_slice(&token))
    }

    /// Verify a token over our own public key
    pub(crate) fn verify_token(&self, protocol: &[u8], point: &[u8], token: &[u8]) -> bool {
        cmac_verify(&self.mac, &public_key_data_object(protocol, point), token)
    }

    fn iv(&self, ssc: u64) -> Result<[u8; 16], CryptoError> {
        let encrypted = cbc_encrypt(&self.enc, &[0u8; 16], &ssc_block(ssc))?;
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&encrypted);
        Ok(iv)
    }

    /// Encrypt padded data under the IV derived from the counter
    pub(crate) fn encrypt(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        Ok(cbc_encrypt(&self.enc, &self.iv(ssc)?, data)?.into())
    }

    /// Decrypt to padded data under the IV derived from the counter
    pub(crate) fn decrypt(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        Ok(cbc_decrypt(&self.enc, &self.iv(ssc)?, data)?.into())
    }

    /// Checksum over the counter block and padded data
    pub(crate) fn authenticate(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        let mut input = ssc_block(ssc).to_vec();
        input.extend_from_slice(data);
        Ok(Bytes::copy_from_slice(&cmac(&self.mac, &input)?))
    }
}
