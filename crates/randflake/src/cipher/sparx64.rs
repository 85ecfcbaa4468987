//! SPARX-64/128 block cipher.
//!
//! A 64-bit block, 128-bit key ARX cipher built from the SPECKEY round
//! function: 8 steps of 3 rounds over 2 branches, with a linear Feistel mix
//! between steps. Blocks and keys are read as big-endian 16-bit words.
//!
//! Randflake only needs a keyed bijection over 64-bit values that hides the
//! layout of issued IDs. It is not used for confidentiality of arbitrary
//! data.

use core::fmt;

use crate::{Error, Result};

const STEPS: usize = 8;
const ROUNDS_PER_STEP: usize = 3;
const BRANCHES: usize = 2;
const SUBKEY_SETS: usize = BRANCHES * STEPS + 1;

/// Length of the secret in bytes.
pub const SECRET_LEN: usize = 16;

/// A keyed 64-bit permutation.
///
/// # Example
///
/// ```
/// use randflake::Sparx64;
///
/// let cipher = Sparx64::new(b"0123456789abcdef").unwrap();
/// let hidden = cipher.encrypt_id(42);
/// assert_ne!(hidden, 42);
/// assert_eq!(cipher.decrypt_id(hidden), 42);
/// ```
#[derive(Clone)]
pub struct Sparx64 {
    subkeys: [[u16; 2 * ROUNDS_PER_STEP]; SUBKEY_SETS],
}

impl Sparx64 {
    /// Expands a 16-byte secret into the round keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSecret`] if `secret` is not exactly
    /// [`SECRET_LEN`] bytes long.
    pub fn new(secret: &[u8]) -> Result<Self> {
        let secret: &[u8; SECRET_LEN] = secret
            .try_into()
            .map_err(|_| Error::InvalidSecret { len: secret.len() })?;

        let mut master = [0u16; 8];
        for (word, chunk) in master.iter_mut().zip(secret.chunks_exact(2)) {
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }

        let mut subkeys = [[0u16; 2 * ROUNDS_PER_STEP]; SUBKEY_SETS];
        for (c, set) in subkeys.iter_mut().enumerate() {
            set.copy_from_slice(&master[..2 * ROUNDS_PER_STEP]);
            permute_key(&mut master, c as u16 + 1);
        }

        Ok(Self { subkeys })
    }

    /// Encrypts one 8-byte block in place.
    pub fn encrypt_block(&self, block: &mut [u8; 8]) {
        let mut x = load(block);
        for s in 0..STEPS {
            for b in 0..BRANCHES {
                let k = &self.subkeys[BRANCHES * s + b];
                for r in 0..ROUNDS_PER_STEP {
                    x[2 * b] ^= k[2 * r];
                    x[2 * b + 1] ^= k[2 * r + 1];
                    (x[2 * b], x[2 * b + 1]) = speckey(x[2 * b], x[2 * b + 1]);
                }
            }
            mix(&mut x);
        }
        let last = &self.subkeys[SUBKEY_SETS - 1];
        for (word, k) in x.iter_mut().zip(last) {
            *word ^= k;
        }
        store(&x, block);
    }

    /// Decrypts one 8-byte block in place.
    pub fn decrypt_block(&self, block: &mut [u8; 8]) {
        let mut x = load(block);
        let last = &self.subkeys[SUBKEY_SETS - 1];
        for (word, k) in x.iter_mut().zip(last) {
            *word ^= k;
        }
        for s in (0..STEPS).rev() {
            unmix(&mut x);
            for b in 0..BRANCHES {
                let k = &self.subkeys[BRANCHES * s + b];
                for r in (0..ROUNDS_PER_STEP).rev() {
                    (x[2 * b], x[2 * b + 1]) = speckey_inv(x[2 * b], x[2 * b + 1]);
                    x[2 * b] ^= k[2 * r];
                    x[2 * b + 1] ^= k[2 * r + 1];
                }
            }
        }
        store(&x, block);
    }

    /// Encrypts an ID through its big-endian byte encoding.
    pub fn encrypt_id(&self, id: i64) -> i64 {
        let mut block = id.to_be_bytes();
        self.encrypt_block(&mut block);
        i64::from_be_bytes(block)
    }

    /// Inverse of [`Self::encrypt_id`].
    pub fn decrypt_id(&self, id: i64) -> i64 {
        let mut block = id.to_be_bytes();
        self.decrypt_block(&mut block);
        i64::from_be_bytes(block)
    }
}

impl fmt::Debug for Sparx64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sparx64").finish_non_exhaustive()
    }
}

fn load(block: &[u8; 8]) -> [u16; 4] {
    [
        u16::from_be_bytes([block[0], block[1]]),
        u16::from_be_bytes([block[2], block[3]]),
        u16::from_be_bytes([block[4], block[5]]),
        u16::from_be_bytes([block[6], block[7]]),
    ]
}

fn store(x: &[u16; 4], block: &mut [u8; 8]) {
    for (chunk, word) in block.chunks_exact_mut(2).zip(x) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
}

#[inline(always)]
const fn speckey(l: u16, r: u16) -> (u16, u16) {
    let l = l.rotate_left(9).wrapping_add(r);
    let r = r.rotate_left(2) ^ l;
    (l, r)
}

#[inline(always)]
const fn speckey_inv(l: u16, r: u16) -> (u16, u16) {
    let r = (r ^ l).rotate_left(14);
    let l = l.wrapping_sub(r).rotate_left(7);
    (l, r)
}

/// Linear layer for two branches.
#[inline(always)]
fn mix(x: &mut [u16; 4]) {
    let t = (x[0] ^ x[1]).rotate_left(8);
    x[2] ^= x[0] ^ t;
    x[3] ^= x[1] ^ t;
    x.swap(0, 2);
    x.swap(1, 3);
}

#[inline(always)]
fn unmix(x: &mut [u16; 4]) {
    x.swap(0, 2);
    x.swap(1, 3);
    let t = (x[0] ^ x[1]).rotate_left(8);
    x[2] ^= x[0] ^ t;
    x[3] ^= x[1] ^ t;
}

fn permute_key(k: &mut [u16; 8], c: u16) {
    (k[0], k[1]) = speckey(k[0], k[1]);
    k[2] = k[2].wrapping_add(k[0]);
    k[3] = k[3].wrapping_add(k[1]);
    k[7] = k[7].wrapping_add(c);
    k.rotate_right(2);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    const SECRET: &[u8; 16] = b"0123456789abcdef";

    #[test]
    fn rejects_secrets_of_the_wrong_length() {
        for len in [0, 8, 15, 17, 32] {
            let secret = vec![0u8; len];
            match Sparx64::new(&secret) {
                Err(Error::InvalidSecret { len: got }) => assert_eq!(got, len),
                other => panic!("expected InvalidSecret for {len} bytes, got {other:?}"),
            }
        }
    }

    #[test]
    fn matches_the_reference_test_vector() {
        let key = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ];
        let plaintext = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
        let ciphertext = [0x2b, 0xbe, 0xf1, 0x52, 0x01, 0xf5, 0x5f, 0x98];

        let cipher = Sparx64::new(&key).unwrap();
        let mut block = plaintext;
        cipher.encrypt_block(&mut block);
        assert_eq!(block, ciphertext);
        cipher.decrypt_block(&mut block);
        assert_eq!(block, plaintext);

        let id = i64::from_be_bytes(plaintext);
        assert_eq!(cipher.encrypt_id(id), i64::from_be_bytes(ciphertext));
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let cipher = Sparx64::new(SECRET).unwrap();
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            let id: i64 = rng.random();
            assert_eq!(cipher.decrypt_id(cipher.encrypt_id(id)), id);
        }
        for id in [0, 1, -1, i64::MIN, i64::MAX] {
            assert_eq!(cipher.decrypt_id(cipher.encrypt_id(id)), id);
        }
    }

    #[test]
    fn encryption_is_deterministic() {
        let a = Sparx64::new(SECRET).unwrap();
        let b = Sparx64::new(SECRET).unwrap();
        assert_eq!(a.encrypt_id(123_456), b.encrypt_id(123_456));
    }

    #[test]
    fn different_secrets_give_different_outputs() {
        let a = Sparx64::new(SECRET).unwrap();
        let b = Sparx64::new(b"fedcba9876543210").unwrap();
        let differing = (0..1_000i64)
            .filter(|id| a.encrypt_id(*id) != b.encrypt_id(*id))
            .count();
        assert!(differing > 990, "only {differing} of 1000 outputs differ");
    }

    #[test]
    fn sequential_inputs_map_to_distinct_scattered_outputs() {
        let cipher = Sparx64::new(SECRET).unwrap();
        let outputs: HashSet<i64> = (0..10_000i64).map(|id| cipher.encrypt_id(id)).collect();
        assert_eq!(outputs.len(), 10_000);
        assert!(outputs.iter().any(|id| *id >= 10_000 || *id < 0));
    }

    #[test]
    fn round_function_inverts() {
        let mut rng = rand::rng();
        for _ in 0..1_000 {
            let (l, r): (u16, u16) = (rng.random(), rng.random());
            let (el, er) = speckey(l, r);
            assert_eq!(speckey_inv(el, er), (l, r));

            let mut x: [u16; 4] = [rng.random(), rng.random(), rng.random(), rng.random()];
            let before = x;
            mix(&mut x);
            unmix(&mut x);
            assert_eq!(x, before);
        }
    }
}
