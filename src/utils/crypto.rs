//! Cryptographic helpers for the client key exchange and the one time key
//! hand off.
//!
//! RSA and AES are only ever applied to the login credential and the
//! post-select one time key; general session traffic is not encrypted.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts, Pkcs1v15Encrypt,
    RsaPublicKey,
};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Smallest RSA modulus accepted from clients
const MIN_RSA_BITS: usize = 1024;

/// Static key of the legacy DES password cipher. Old clients ship this
/// key baked in, so the server side must match it byte for byte.
const LEGACY_DES_KEY: [u8; 8] = *b"MERONG\0\0";

/// Length of the AES key + IV block exchanged during the RSA handshake
pub const AES_KEY_IV_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided PEM blob couldn't be parsed as an RSA public key
    #[error("invalid RSA public key")]
    InvalidPublicKey,
    /// The client key modulus is below the accepted minimum
    #[error("RSA modulus too small: {0} bits")]
    ModulusTooSmall(usize),
    /// RSA encryption of the AES key material failed
    #[error("RSA encrypt failure: {0}")]
    Encrypt(#[from] rsa::Error),
    /// AES encrypt/decrypt failed (bad key material or padding)
    #[error("AES failure")]
    Aes,
}

/// Imports a client provided RSA public key from PEM bytes.
///
/// Accepts both SPKI ("PUBLIC KEY") and PKCS#1 ("RSA PUBLIC KEY")
/// encodings. Keys with a modulus below [`MIN_RSA_BITS`] are rejected.
pub fn import_public_key(pem: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    let pem = std::str::from_utf8(pem).map_err(|_| CryptoError::InvalidPublicKey)?;

    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| CryptoError::InvalidPublicKey)?;

    let bits = key.n().bits();
    if bits < MIN_RSA_BITS {
        return Err(CryptoError::ModulusTooSmall(bits));
    }

    Ok(key)
}

/// Encrypts `data` with the client public key using PKCS#1 v1.5 padding.
/// The ciphertext length always equals the key modulus size.
pub fn rsa_encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = key.encrypt(&mut OsRng, Pkcs1v15Encrypt, data)?;
    Ok(ciphertext)
}

/// Generates the 32 byte AES key material for a session. The first 16
/// bytes are the key, the last 16 the IV.
pub fn generate_key_iv() -> [u8; AES_KEY_IV_LENGTH] {
    let mut key_iv = [0u8; AES_KEY_IV_LENGTH];
    OsRng.fill_bytes(&mut key_iv);
    key_iv
}

/// Generates the one time key handed to the client at server select
pub fn generate_one_time_key() -> u64 {
    OsRng.next_u64()
}

/// AES-128-CBC encrypt with PKCS7 padding
///
/// `key_iv` The 32 byte key material (key | iv)
/// `data`   The plaintext to encrypt
pub fn aes_encrypt(key_iv: &[u8; AES_KEY_IV_LENGTH], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes128CbcEnc::new_from_slices(&key_iv[..16], &key_iv[16..]).map_err(|_| CryptoError::Aes)?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
}

/// AES-128-CBC decrypt with PKCS7 padding
pub fn aes_decrypt(key_iv: &[u8; AES_KEY_IV_LENGTH], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes128CbcDec::new_from_slices(&key_iv[..16], &key_iv[16..]).map_err(|_| CryptoError::Aes)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| CryptoError::Aes)
}

/// Decrypts a legacy DES enciphered password buffer.
///
/// The legacy cipher runs DES over each full 8 byte block with the
/// static key; a trailing partial block is carried over untouched. The
/// result is truncated at the first NUL the same way the fixed width
/// packet fields are.
pub fn des_password_decrypt(data: &[u8]) -> Vec<u8> {
    let cipher = des::Des::new_from_slice(&LEGACY_DES_KEY).expect("static DES key length");

    let mut output = data.to_vec();
    for block in output.chunks_exact_mut(8) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let end = output.iter().position(|value| *value == 0).unwrap_or(output.len());
    output.truncate(end);
    output
}

/// Enciphers a password buffer with the legacy DES cipher. Only used by
/// tests and tooling to produce what old clients would send.
pub fn des_password_encrypt(data: &[u8]) -> Vec<u8> {
    let cipher = des::Des::new_from_slice(&LEGACY_DES_KEY).expect("static DES key length");

    let mut output = data.to_vec();
    for block in output.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    output
}

#[cfg(test)]
mod test {
    use super::*;
    use rsa::{
        pkcs8::{EncodePublicKey, LineEnding},
        RsaPrivateKey,
    };

    /// Tests that the AES key/IV round trips an 8 byte one time key with
    /// exactly one padded block of ciphertext
    #[test]
    fn test_aes_one_time_key_round_trip() {
        let key_iv = generate_key_iv();
        let one_time_key: u64 = 0xD00D_FEED_CAFE_1234;

        let encrypted = aes_encrypt(&key_iv, &one_time_key.to_le_bytes()).unwrap();
        assert_eq!(encrypted.len(), 16);

        let decrypted = aes_decrypt(&key_iv, &encrypted).unwrap();
        assert_eq!(decrypted, one_time_key.to_le_bytes());
    }

    /// Tests decryption with the wrong key material fails or yields
    /// different plaintext
    #[test]
    fn test_aes_wrong_key() {
        let key_iv = generate_key_iv();
        let other = generate_key_iv();
        let encrypted = aes_encrypt(&key_iv, b"12345678").unwrap();

        match aes_decrypt(&other, &encrypted) {
            Ok(value) => assert_ne!(value, b"12345678"),
            Err(CryptoError::Aes) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    /// Tests PEM import + encrypt against a locally generated key pair
    #[test]
    fn test_rsa_round_trip() {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let public = import_public_key(pem.as_bytes()).unwrap();
        assert_eq!(public.size(), 128);

        let key_iv = generate_key_iv();
        let encrypted = rsa_encrypt(&public, &key_iv).unwrap();
        assert_eq!(encrypted.len(), public.size());

        let decrypted = private.decrypt(Pkcs1v15Encrypt, &encrypted).unwrap();
        assert_eq!(decrypted, key_iv);
    }

    /// Tests that undersized client keys are rejected
    #[test]
    fn test_rsa_small_modulus_rejected() {
        let private = RsaPrivateKey::new(&mut OsRng, 512).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        assert!(matches!(
            import_public_key(pem.as_bytes()),
            Err(CryptoError::ModulusTooSmall(_))
        ));
    }

    /// Tests that garbage PEM input is rejected rather than panicking
    #[test]
    fn test_rsa_invalid_pem() {
        assert!(matches!(
            import_public_key(b"not a pem"),
            Err(CryptoError::InvalidPublicKey)
        ));
        assert!(matches!(
            import_public_key(&[0xFF, 0xFE, 0x00]),
            Err(CryptoError::InvalidPublicKey)
        ));
    }

    /// Tests the legacy DES cipher round trips full blocks and leaves a
    /// trailing partial block untouched
    #[test]
    fn test_des_round_trip() {
        let encrypted = des_password_encrypt(b"hunter2\0hunter2\0");
        assert_eq!(des_password_decrypt(&encrypted), b"hunter2");

        // 61 byte password field: 7 full blocks + 5 trailing bytes
        let mut field = [0u8; 61];
        field[..7].copy_from_slice(b"s3cret!");
        let encrypted = des_password_encrypt(&field);
        assert_eq!(des_password_decrypt(&encrypted), b"s3cret!");
    }
}
