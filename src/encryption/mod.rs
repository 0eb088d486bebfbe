//! PDF decryption support.
//!
//! Implements the standard security handler far enough to decrypt streams in
//! place during a mutation pass (ISO 32000-1:2008, Section 7.6):
//!
//! - RC4 (40- and 128-bit) for PDF 1.4-1.5 (V1/V2)
//! - AES-128 in CBC mode for PDF 1.6 (V4, AESV2)
//! - AES-256 in CBC mode for PDF 2.0 (V5, R5/R6, AESV3)
//!
//! Password validation follows Algorithms 2, 4 and 5 (MD5 family) and the
//! SHA-2 family derivation for revision 5/6. Only decryption is provided;
//! the rewritten document keeps the original encryption dictionary and
//! untouched objects pass through still encrypted.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Value};
use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};

mod aes;
mod rc4;

pub use self::aes::{aes128_decrypt, aes256_decrypt};
pub use self::rc4::rc4_crypt;

/// Padding string used in PDF password derivation (Algorithm 2, step 1).
const PADDING: &[u8; 32] = b"\x28\xBF\x4E\x5E\x4E\x75\x8A\x41\
                              \x64\x00\x4E\x56\xFF\xFA\x01\x08\
                              \x2E\x2E\x00\xB6\xD0\x68\x3E\x80\
                              \x2F\x0C\xA9\xFE\x64\x53\x69\x7A";

/// AES per-object key salt ("sAlT").
const AES_SALT: [u8; 4] = [0x73, 0x41, 0x6C, 0x54];

/// Encryption algorithm in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// RC4 with the key length from /Length (V1/V2)
    Rc4,
    /// AES-128-CBC (V4, AESV2)
    Aes128,
    /// AES-256-CBC (V5, AESV3)
    Aes256,
}

/// Decrypt-only standard security handler.
pub struct StandardDecryptor {
    algorithm: Algorithm,
    key: Vec<u8>,
}

impl StandardDecryptor {
    /// Build a decryptor from the document's `/Encrypt` dictionary and the
    /// first element of `/ID`. The password may be empty.
    pub fn from_encrypt_dict(
        dict: &Dictionary,
        file_id: &[u8],
        password: &[u8],
    ) -> Result<Self> {
        match dict.get("Filter").and_then(Value::as_name) {
            Some("Standard") | None => {}
            Some(other) => {
                return Err(Error::Unsupported(format!(
                    "security handler /{}",
                    other
                )));
            }
        }

        let v = dict.get("V").and_then(Value::as_i64).unwrap_or(0);
        let r = dict.get("R").and_then(Value::as_i64).unwrap_or(2) as u32;
        let owner_key = string_bytes(dict, "O")?;
        let user_key = string_bytes(dict, "U")?;
        let permissions = dict.get("P").and_then(Value::as_i64).unwrap_or(-1) as i32;
        let encrypt_metadata = dict
            .get("EncryptMetadata")
            .map(|value| !matches!(value, Value::Boolean(false)))
            .unwrap_or(true);

        let (algorithm, key_length) = match v {
            1 => (Algorithm::Rc4, 5),
            2 => (
                Algorithm::Rc4,
                (dict.get("Length").and_then(Value::as_i64).unwrap_or(40) / 8) as usize,
            ),
            4 => {
                let cfm = crypt_filter_method(dict);
                match cfm.as_deref() {
                    Some("AESV2") => (Algorithm::Aes128, 16),
                    Some("V2") | None => (Algorithm::Rc4, 16),
                    Some(other) => {
                        return Err(Error::Unsupported(format!("crypt filter {}", other)));
                    }
                }
            }
            5 => {
                let key = derive_aes256_key(dict, &owner_key, &user_key, password, r)?;
                return Ok(StandardDecryptor {
                    algorithm: Algorithm::Aes256,
                    key,
                });
            }
            other => {
                return Err(Error::Unsupported(format!("encryption version V={}", other)));
            }
        };

        // Algorithm 2 with the given password, then with the empty password
        for pass in [password, b"".as_slice()] {
            let key = compute_encryption_key(
                pass,
                file_id,
                &owner_key,
                permissions,
                r,
                key_length,
                encrypt_metadata,
            );
            if authenticate_user_key(&key, &user_key, file_id, r) {
                return Ok(StandardDecryptor { algorithm, key });
            }
            if pass.is_empty() {
                break;
            }
        }
        Err(Error::Unsupported(
            "document password is wrong or required".to_string(),
        ))
    }

    /// The algorithm in use.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Decrypt a stream's raw bytes, keyed by its object and generation.
    pub fn decrypt_stream(&self, data: &[u8], obj: u32, gen: u16) -> Result<Vec<u8>> {
        match self.algorithm {
            Algorithm::Rc4 => {
                let key = self.object_key(obj, gen, false);
                Ok(rc4_crypt(&key, data))
            }
            Algorithm::Aes128 => {
                if data.len() < 16 {
                    return Err(Error::Decode("AES stream shorter than its IV".into()));
                }
                let key = self.object_key(obj, gen, true);
                aes128_decrypt(&key, &data[..16], &data[16..])
                    .map_err(|e| Error::Decode(format!("AES-128 decrypt failed: {}", e)))
            }
            Algorithm::Aes256 => {
                if data.len() < 16 {
                    return Err(Error::Decode("AES stream shorter than its IV".into()));
                }
                aes256_decrypt(&self.key, &data[..16], &data[16..])
                    .map_err(|e| Error::Decode(format!("AES-256 decrypt failed: {}", e)))
            }
        }
    }

    /// Per-object key (Algorithm 1): MD5 of the file key, the low three
    /// bytes of the object number and two of the generation, plus the AES
    /// salt for AESV2.
    fn object_key(&self, obj: u32, gen: u16, aes: bool) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(&self.key);
        hasher.update(&obj.to_le_bytes()[..3]);
        hasher.update(&gen.to_le_bytes()[..2]);
        if aes {
            hasher.update(AES_SALT);
        }
        let digest = hasher.finalize();
        let len = (self.key.len() + 5).min(16);
        digest[..len].to_vec()
    }
}

fn string_bytes(dict: &Dictionary, key: &str) -> Result<Vec<u8>> {
    dict.get(key)
        .and_then(Value::as_string)
        .map(|s| s.decoded())
        .ok_or_else(|| Error::CorruptXref(format!("encryption dictionary missing /{}", key)))
}

fn crypt_filter_method(dict: &Dictionary) -> Option<String> {
    let cf = dict.get("CF")?.as_dict()?;
    let stmf = dict
        .get("StmF")
        .and_then(Value::as_name)
        .unwrap_or("StdCF");
    let filter = cf.get(stmf)?.as_dict()?;
    filter.get("CFM").and_then(Value::as_name).map(str::to_string)
}

/// Pad or truncate a password to its 32-byte form (Algorithm 2, step a):
/// the password's bytes, topped up from the start of the padding string.
fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    for (slot, &byte) in padded
        .iter_mut()
        .zip(password.iter().chain(PADDING.iter()))
    {
        *slot = byte;
    }
    padded
}

/// Strengthening rounds (Algorithm 2, step h): revision 3 and later re-hash
/// the truncated key fifty times.
fn strengthen_key(mut digest: Vec<u8>, key_length: usize, revision: u32) -> Vec<u8> {
    if revision >= 3 {
        for _ in 0..50 {
            digest = Md5::digest(&digest[..key_length]).to_vec();
        }
    }
    digest.truncate(key_length);
    digest
}

/// Compute the encryption key from a password (Algorithm 2).
pub fn compute_encryption_key(
    password: &[u8],
    file_id: &[u8],
    owner_key: &[u8],
    permissions: i32,
    revision: u32,
    key_length: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut seed = Md5::new();
    seed.update(pad_password(password));
    seed.update(owner_key);
    seed.update(permissions.to_le_bytes());
    seed.update(file_id);
    if revision >= 4 && !encrypt_metadata {
        seed.update(u32::MAX.to_le_bytes());
    }
    strengthen_key(seed.finalize().to_vec(), key_length, revision)
}

/// Check a derived key against /U (Algorithms 4 and 5).
fn authenticate_user_key(key: &[u8], user_key: &[u8], file_id: &[u8], revision: u32) -> bool {
    if user_key.len() < 16 {
        return false;
    }
    let expected = if revision >= 3 {
        let mut hasher = Md5::new();
        hasher.update(PADDING);
        hasher.update(file_id);
        let mut hash = hasher.finalize().to_vec();
        for i in 0..20u8 {
            let salted: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            hash = rc4_crypt(&salted, &hash);
        }
        hash
    } else {
        rc4_crypt(key, PADDING)
    };
    constant_time_eq(&expected[..16], &user_key[..16])
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Revision 6 hardened hash (Algorithm 2.B).
fn hash_2b(password: &[u8], salt: &[u8], udata: &[u8]) -> Vec<u8> {
    let mut k: Vec<u8> = {
        let mut h = Sha256::new();
        h.update(password);
        h.update(salt);
        h.update(udata);
        h.finalize().to_vec()
    };

    let mut round = 0usize;
    loop {
        let mut k1 = Vec::with_capacity(64 * (password.len() + k.len() + udata.len()));
        for _ in 0..64 {
            k1.extend_from_slice(password);
            k1.extend_from_slice(&k);
            k1.extend_from_slice(udata);
        }
        let e = self::aes::aes128_encrypt_raw(&k[..16], &k[16..32], &k1)
            .expect("round input is block-aligned");
        let sum: u32 = e[..16].iter().map(|&b| b as u32).sum();
        k = match sum % 3 {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };
        round += 1;
        if round >= 64 && (*e.last().unwrap() as usize) <= round - 32 {
            break;
        }
    }
    k.truncate(32);
    k
}

/// Derive the AES-256 file key from /U,/UE or /O,/OE (Algorithms 2.A, 8, 9).
fn derive_aes256_key(
    dict: &Dictionary,
    owner_key: &[u8],
    user_key: &[u8],
    password: &[u8],
    revision: u32,
) -> Result<Vec<u8>> {
    if user_key.len() < 48 || owner_key.len() < 48 {
        return Err(Error::CorruptXref(
            "AES-256 encryption dictionary with short /U or /O".into(),
        ));
    }
    let hash_with = |salt: &[u8], udata: &[u8]| -> Vec<u8> {
        if revision >= 6 {
            hash_2b(password, salt, udata)
        } else {
            let mut h = Sha256::new();
            h.update(password);
            h.update(salt);
            h.update(udata);
            h.finalize().to_vec()
        }
    };

    // user password path
    if constant_time_eq(&hash_with(&user_key[32..40], &[]), &user_key[..32]) {
        let ue = string_bytes(dict, "UE")?;
        let intermediate = hash_with(&user_key[40..48], &[]);
        return self::aes::aes256_decrypt_raw(&intermediate, &ue)
            .map(|mut k| {
                k.truncate(32);
                k
            })
            .map_err(|e| Error::Decode(format!("file key unwrap failed: {}", e)));
    }

    // owner password path
    if constant_time_eq(
        &hash_with(&owner_key[32..40], &user_key[..48]),
        &owner_key[..32],
    ) {
        let oe = string_bytes(dict, "OE")?;
        let intermediate = hash_with(&owner_key[40..48], &user_key[..48]);
        return self::aes::aes256_decrypt_raw(&intermediate, &oe)
            .map(|mut k| {
                k.truncate(32);
                k
            })
            .map_err(|e| Error::Decode(format!("file key unwrap failed: {}", e)));
    }

    Err(Error::Unsupported(
        "document password is wrong or required".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{PdfString, StringFormat};

    fn rc4_dict(user_key: &[u8], owner_key: &[u8]) -> Dictionary {
        let mut d = Dictionary::new();
        d.set("Filter", Value::name("Standard"));
        d.set("V", Value::integer(2));
        d.set("R", Value::integer(3));
        d.set("Length", Value::integer(128));
        d.set("P", Value::integer(-44));
        d.set(
            "O",
            Value::String(PdfString::from_raw(
                owner_key.to_vec(),
                StringFormat::Hex,
            )),
        );
        d.set(
            "U",
            Value::String(PdfString::from_raw(user_key.to_vec(), StringFormat::Hex)),
        );
        d
    }

    #[test]
    fn test_empty_password_authentication() {
        // build /U for the empty password so authentication succeeds
        let owner = [0x11u8; 32];
        let file_id = b"fileid01";
        let key = compute_encryption_key(b"", file_id, &owner, -44, 3, 16, true);

        let mut hasher = Md5::new();
        hasher.update(PADDING);
        hasher.update(file_id);
        let mut u = hasher.finalize().to_vec();
        for i in 0..20u8 {
            let salted: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            u = rc4_crypt(&salted, &u);
        }
        u.extend_from_slice(&[0u8; 16]);

        let u_hex: Vec<u8> = u
            .iter()
            .flat_map(|b| format!("{:02X}", b).into_bytes())
            .collect();
        let o_hex: Vec<u8> = owner
            .iter()
            .flat_map(|b| format!("{:02X}", b).into_bytes())
            .collect();
        let dict = rc4_dict(&u_hex, &o_hex);

        let dec = StandardDecryptor::from_encrypt_dict(&dict, file_id, b"").unwrap();
        assert_eq!(dec.algorithm(), Algorithm::Rc4);

        // stream decryption round-trips with the same object key
        let obj_key = dec.object_key(7, 0, false);
        let cipher = rc4_crypt(&obj_key, b"stream content");
        assert_eq!(dec.decrypt_stream(&cipher, 7, 0).unwrap(), b"stream content");
    }

    #[test]
    fn test_pad_password_tops_up_from_padding() {
        let padded = pad_password(b"test");
        assert_eq!(&padded[..4], b"test");
        assert_eq!(&padded[4..], &PADDING[..28]);
        // long passwords truncate at 32 bytes
        let long = pad_password(&[b'x'; 40]);
        assert_eq!(long, [b'x'; 32]);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let dict = rc4_dict(&[b'0'; 64], &[b'0'; 64]);
        let result = StandardDecryptor::from_encrypt_dict(&dict, b"id", b"nope");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_handler_rejected() {
        let mut d = Dictionary::new();
        d.set("Filter", Value::name("Custom"));
        assert!(matches!(
            StandardDecryptor::from_encrypt_dict(&d, b"", b""),
            Err(Error::Unsupported(_))
        ));
    }
}
