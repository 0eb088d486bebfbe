//! AES-CBC decryption for PDF.
//!
//! AESV2 (128-bit) and AESV3 (256-bit) streams carry their IV as the first
//! 16 bytes of the encrypted data and use PKCS#7 padding.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

fn cbc_decrypt_no_pad<C>(mut cipher: C, data: &[u8]) -> Result<Vec<u8>, &'static str>
where
    C: BlockDecryptMut,
{
    if data.len() % 16 != 0 {
        return Err("encrypted data length must be a multiple of 16");
    }
    let mut buffer = data.to_vec();
    for block in buffer.chunks_exact_mut(16) {
        cipher.decrypt_block_mut(block.into());
    }
    Ok(buffer)
}

fn strip_pkcs7(mut data: Vec<u8>) -> Result<Vec<u8>, &'static str> {
    let Some(&pad) = data.last() else {
        return Ok(data);
    };
    let pad = pad as usize;
    if pad == 0 || pad > 16 || pad > data.len() {
        // tolerate broken padding: some writers pad incorrectly
        return Ok(data);
    }
    let start = data.len() - pad;
    if data[start..].iter().all(|&b| b as usize == pad) {
        data.truncate(start);
    }
    Ok(data)
}

/// Decrypt AES-128-CBC data (IV passed separately) and strip padding.
pub fn aes128_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    if key.len() != 16 {
        return Err("AES-128 key must be 16 bytes");
    }
    if iv.len() != 16 {
        return Err("IV must be 16 bytes");
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let cipher = Aes128CbcDec::new(key.into(), iv.into());
    strip_pkcs7(cbc_decrypt_no_pad(cipher, data)?)
}

/// Decrypt AES-256-CBC data (IV passed separately) and strip padding.
pub fn aes256_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    if key.len() != 32 {
        return Err("AES-256 key must be 32 bytes");
    }
    if iv.len() != 16 {
        return Err("IV must be 16 bytes");
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let cipher = Aes256CbcDec::new(key.into(), iv.into());
    strip_pkcs7(cbc_decrypt_no_pad(cipher, data)?)
}

/// Decrypt AES-256-CBC with a zero IV and no padding (file key unwrap).
pub fn aes256_decrypt_raw(key: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    if key.len() != 32 {
        return Err("AES-256 key must be 32 bytes");
    }
    let iv = [0u8; 16];
    let cipher = Aes256CbcDec::new(key.into(), (&iv).into());
    cbc_decrypt_no_pad(cipher, data)
}

/// Encrypt AES-128-CBC without padding (revision 6 hash rounds).
pub fn aes128_encrypt_raw(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    if key.len() != 16 || iv.len() != 16 || data.len() % 16 != 0 {
        return Err("bad AES-128 encrypt parameters");
    }
    let mut cipher = Aes128CbcEnc::new(key.into(), iv.into());
    let mut buffer = data.to_vec();
    for block in buffer.chunks_exact_mut(16) {
        cipher.encrypt_block_mut(block.into());
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::KeyIvInit;

    #[test]
    fn test_aes128_round_trip() {
        let key = [7u8; 16];
        let iv = [3u8; 16];
        let plain = b"sixteen byte msg"; // exactly one block; padding adds one more

        // encrypt manually with PKCS#7
        let mut padded = plain.to_vec();
        padded.extend_from_slice(&[16u8; 16]);
        let mut enc = cbc::Encryptor::<aes::Aes128>::new((&key).into(), (&iv).into());
        for block in padded.chunks_exact_mut(16) {
            enc.encrypt_block_mut(block.into());
        }

        let decrypted = aes128_decrypt(&key, &iv, &padded).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn test_aes256_raw_round_trip() {
        let key = [9u8; 32];
        let plain = [0x42u8; 32];
        // raw encrypt: reuse decryptor inverse by encrypting with cbc encryptor
        let iv = [0u8; 16];
        let mut enc = cbc::Encryptor::<aes::Aes256>::new((&key).into(), (&iv).into());
        let mut data = plain.to_vec();
        for block in data.chunks_exact_mut(16) {
            enc.encrypt_block_mut(block.into());
        }
        assert_eq!(aes256_decrypt_raw(&key, &data).unwrap(), plain.to_vec());
    }

    #[test]
    fn test_bad_lengths() {
        assert!(aes128_decrypt(&[0; 8], &[0; 16], &[0; 16]).is_err());
        assert!(aes128_decrypt(&[0; 16], &[0; 16], &[0; 15]).is_err());
    }
}
