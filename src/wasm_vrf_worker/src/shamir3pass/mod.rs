//! Shamir 3-pass commutative encryption.
//!
//! Lets the relay server assist in unlocking the VRF keypair without either
//! party revealing plaintext to the other.
//!
//! Registration:
//! 1. Client generates random KEK, AEAD-encrypts the VRF keypair under it
//! 2. Client adds a temporary lock to KEK → KEK_c
//! 3. Server adds its lock → KEK_cs
//! 4. Client removes its lock → KEK_s (stored at rest)
//!
//! Login:
//! 1. Client adds a fresh temporary lock to KEK_s → KEK_st
//! 2. Server removes its lock → KEK_t
//! 3. Client removes its lock → KEK (original)
//! 4. Client decrypts the VRF keypair with KEK

#[cfg(test)]
mod tests;

use crate::config::{
    DEFAULT_SHAMIR_P_B64U, SHAMIR_AEAD_HKDF_INFO, SHAMIR_MIN_PRIME_BITS,
    SHAMIR_RANDOM_BYTES_OVERHEAD, SHAMIR_REJECTION_SAMPLING_MAX_ATTEMPTS,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, Key},
    ChaCha20Poly1305, KeyInit,
};
use getrandom::getrandom;
use hkdf::Hkdf;
use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use sha2::Sha256;

#[derive(Debug)]
pub enum Shamir3PassError {
    InvalidPrime(String),
    PrimeTooSmall { bits: usize, min_bits: usize },
    ModularInverseNotFound,
    RandomGenerationFailed,
    EncryptionFailed(String),
    DecryptionFailed(String),
}

/// One-time lock keys: `e` adds a lock, `d = e^-1 (mod p-1)` removes it.
#[derive(Clone, Debug)]
pub struct LockKeys {
    pub e: BigUint,
    pub d: BigUint,
}

/// Commutative modexp locks over a fixed prime, plus the KEK-wrapped AEAD
/// used for the actual VRF keypair bytes.
#[derive(Clone, Debug)]
pub struct Shamir3Pass {
    p: BigUint,
    p_minus_1: BigUint,
    min_k: BigUint,
    max_k: BigUint,
}

impl Shamir3Pass {
    pub fn new(p_b64u: &str) -> Result<Self, Shamir3PassError> {
        let p = decode_biguint_b64u(p_b64u)
            .map_err(|e| Shamir3PassError::InvalidPrime(e))?;

        let bits = p.bits();
        if bits < SHAMIR_MIN_PRIME_BITS as u64 {
            return Err(Shamir3PassError::PrimeTooSmall {
                bits: bits as usize,
                min_bits: SHAMIR_MIN_PRIME_BITS,
            });
        }

        Ok(Self::from_biguint(p))
    }

    /// Instance with the built-in default prime.
    pub fn new_default() -> Self {
        let p = decode_biguint_b64u(DEFAULT_SHAMIR_P_B64U).expect("Invalid default prime");
        Self::from_biguint(p)
    }

    fn from_biguint(p: BigUint) -> Self {
        let one = BigUint::one();
        let two = &one + &one;
        let p_minus_1 = &p - &one;
        let p_minus_2 = &p - &two;

        // Lower bound for exponents; scaled down for small primes so the
        // default 256-bit modulus keeps a usable range.
        let min_k = if p.bits() >= 1024 {
            BigUint::from(1u128 << 64)
        } else {
            BigUint::from(1u64 << 32)
        };

        Shamir3Pass {
            p,
            p_minus_1,
            min_k,
            max_k: p_minus_2,
        }
    }

    pub fn p_b64u(&self) -> String {
        encode_biguint_b64u(&self.p)
    }

    pub fn modexp(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        if self.p.is_zero() {
            return BigUint::zero();
        }
        base.modpow(exp, &self.p)
    }

    /// Modular inverse mod p-1 via extended Euclid; None when gcd != 1.
    pub fn modinv(&self, a: &BigUint) -> Option<BigUint> {
        let a_bigint = BigInt::from_biguint(Sign::Plus, a.clone());
        let m_bigint = BigInt::from_biguint(Sign::Plus, self.p_minus_1.clone());

        let (gcd, x, _) = extended_gcd(a_bigint, m_bigint.clone());
        if gcd != BigInt::one() {
            return None;
        }

        let mut x_mod = x % &m_bigint;
        if x_mod.sign() == Sign::Minus {
            x_mod += &m_bigint;
        }
        x_mod.to_biguint()
    }

    /// Random k in [min_k, p-2] with gcd(k, p-1) = 1, by rejection sampling.
    pub fn random_k(&self) -> Result<BigUint, Shamir3PassError> {
        let range = &self.max_k - &self.min_k;
        let bytes_needed = ((range.bits() + 7) / 8 + SHAMIR_RANDOM_BYTES_OVERHEAD as u64) as usize;

        for _ in 0..SHAMIR_REJECTION_SAMPLING_MAX_ATTEMPTS {
            let mut buf = vec![0u8; bytes_needed];
            getrandom(&mut buf).map_err(|_| Shamir3PassError::RandomGenerationFailed)?;

            let candidate = BigUint::from_bytes_be(&buf) % &range;
            let k = &self.min_k + candidate;

            if k.gcd(&self.p_minus_1) == BigUint::one() {
                return Ok(k);
            }
        }

        Err(Shamir3PassError::RandomGenerationFailed)
    }

    /// Generate lock keys (e, d) with e*d ≡ 1 (mod p-1).
    pub fn generate_lock_keys(&self) -> Result<LockKeys, Shamir3PassError> {
        let e = self.random_k()?;
        let d = self
            .modinv(&e)
            .ok_or(Shamir3PassError::ModularInverseNotFound)?;
        Ok(LockKeys { e, d })
    }

    /// AEAD-encrypt plaintext with a fresh random KEK; returns (ciphertext, kek).
    pub fn encrypt_with_random_kek(
        &self,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, BigUint), Shamir3PassError> {
        let kek = self.random_k()?;
        let ciphertext = self.encrypt_with_kek(&kek, plaintext)?;
        Ok((ciphertext, kek))
    }

    pub fn decrypt_with_kek(
        &self,
        ciphertext: &[u8],
        kek: &BigUint,
    ) -> Result<Vec<u8>, Shamir3PassError> {
        if ciphertext.len() < 12 {
            return Err(Shamir3PassError::DecryptionFailed(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ct) = ciphertext.split_at(12);
        let key_bytes = self.derive_aead_key(&kek.to_bytes_be())?;

        let cipher = ChaCha20Poly1305::new(Key::<ChaCha20Poly1305>::from_slice(&key_bytes));
        let nonce = GenericArray::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ct)
            .map_err(|e| Shamir3PassError::DecryptionFailed(e.to_string()))
    }

    /// Add a lock: base^e mod p.
    pub fn add_lock(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        self.modexp(base, exponent)
    }

    /// Remove a lock: base^d mod p (same operation, inverse exponent).
    pub fn remove_lock(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        self.modexp(base, exponent)
    }

    fn derive_aead_key(&self, kek_bytes: &[u8]) -> Result<[u8; 32], Shamir3PassError> {
        let hkdf = Hkdf::<Sha256>::new(None, kek_bytes);
        let mut key = [0u8; 32];
        hkdf.expand(SHAMIR_AEAD_HKDF_INFO, &mut key)
            .map_err(|_| Shamir3PassError::EncryptionFailed("HKDF expansion failed".to_string()))?;
        Ok(key)
    }

    fn encrypt_with_kek(
        &self,
        kek: &BigUint,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Shamir3PassError> {
        let key_bytes = self.derive_aead_key(&kek.to_bytes_be())?;
        let cipher = ChaCha20Poly1305::new(Key::<ChaCha20Poly1305>::from_slice(&key_bytes));

        let mut nonce = [0u8; 12];
        getrandom(&mut nonce).map_err(|_| Shamir3PassError::RandomGenerationFailed)?;
        let nonce_ga = GenericArray::from_slice(&nonce);

        let ciphertext = cipher
            .encrypt(nonce_ga, plaintext)
            .map_err(|e| Shamir3PassError::EncryptionFailed(e.to_string()))?;

        // Nonce is prepended to the ciphertext
        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }
}

fn extended_gcd(a: BigInt, b: BigInt) -> (BigInt, BigInt, BigInt) {
    if b.is_zero() {
        return (a, BigInt::one(), BigInt::zero());
    }

    let (gcd, x1, y1) = extended_gcd(b.clone(), &a % &b);
    let x = y1.clone();
    let y = x1 - (&a / &b) * y1;

    (gcd, x, y)
}

pub fn encode_biguint_b64u(x: &BigUint) -> String {
    Base64UrlUnpadded::encode_string(&x.to_bytes_be())
}

pub fn decode_biguint_b64u(s: &str) -> Result<BigUint, String> {
    let bytes =
        Base64UrlUnpadded::decode_vec(s).map_err(|_| "Invalid base64url".to_string())?;
    Ok(BigUint::from_bytes_be(&bytes))
}
