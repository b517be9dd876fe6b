//! Short authentication string (SAS) codes
//!
//! After the key agreement, each side derives a pair of 4-symbol codes from
//! both handshake nonces and the shared secret. The humans compare them out
//! of band: the claimer reads the greeter's code among decoys, the greeter
//! does the reverse. The alphabet drops the ambiguous symbols I, O, 0 and 1.

use crate::crypto::SharedSecretKey;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Symbols a SAS code may contain. 32 symbols, so each carries 5 bits.
pub const SAS_CODE_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in a SAS code.
pub const SAS_CODE_LEN: usize = 4;

/// Number of entropy bits in one SAS code.
pub const SAS_CODE_BITS: u32 = 20;

/// Number of entries in a SAS choice set, the true code included.
pub const SAS_CODE_CANDIDATES: usize = 4;

const SAS_CODE_MASK: u32 = (1 << SAS_CODE_BITS) - 1;

/// A short authentication string, e.g. `"25PA"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SasCode(String);

impl SasCode {
    /// Derive the claimer and greeter codes for one handshake.
    ///
    /// The first 40 bits of `HMAC(shared_secret, claimer_nonce || greeter_nonce)`
    /// are read little-endian: the low 20 bits become the claimer's code, the
    /// next 20 the greeter's. Both sides run this with identical inputs, so a
    /// mismatch means the key agreement was tampered with.
    pub fn generate_pair(
        claimer_nonce: &[u8],
        greeter_nonce: &[u8],
        shared_secret: &SharedSecretKey,
    ) -> (SasCode, SasCode) {
        let mut combined = Vec::with_capacity(claimer_nonce.len() + greeter_nonce.len());
        combined.extend_from_slice(claimer_nonce);
        combined.extend_from_slice(greeter_nonce);
        let digest = shared_secret.hmac(&combined);

        let mut low = [0u8; 8];
        low[..5].copy_from_slice(&digest[..5]);
        let bits = u64::from_le_bytes(low);

        let claimer = Self::from_u20((bits & u64::from(SAS_CODE_MASK)) as u32);
        let greeter = Self::from_u20(((bits >> SAS_CODE_BITS) & u64::from(SAS_CODE_MASK)) as u32);
        (claimer, greeter)
    }

    /// Build the choice set shown to a human: `size` codes containing the
    /// true one exactly once among random decoys, shuffled.
    pub fn generate_choices(correct: &SasCode, size: usize) -> Vec<SasCode> {
        let mut rng = rand::thread_rng();
        let mut choices = Vec::with_capacity(size);
        choices.push(correct.clone());
        while choices.len() < size {
            let decoy = Self::from_u20(rng.gen_range(0..(1 << SAS_CODE_BITS)));
            if !choices.contains(&decoy) {
                choices.push(decoy);
            }
        }
        choices.shuffle(&mut rng);
        choices
    }

    /// The code as displayed to the human.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Value is already masked to 20 bits, so the alphabet lookup cannot
    // go out of bounds.
    fn from_u20(mut num: u32) -> Self {
        let mut out = String::with_capacity(SAS_CODE_LEN);
        for _ in 0..SAS_CODE_LEN {
            out.push(SAS_CODE_CHARS[(num % 32) as usize] as char);
            num /= 32;
        }
        Self(out)
    }
}

impl TryFrom<u32> for SasCode {
    type Error = &'static str;

    fn try_from(num: u32) -> Result<Self, Self::Error> {
        if num >> SAS_CODE_BITS != 0 {
            return Err("Provided integer is too large");
        }
        Ok(Self::from_u20(num))
    }
}

impl FromStr for SasCode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SAS_CODE_LEN || !s.bytes().all(|b| SAS_CODE_CHARS.contains(&b)) {
            return Err("Invalid SAS code");
        }
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for SasCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SasCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_int_boundaries() {
        assert_eq!(SasCode::try_from(0).unwrap().as_str(), "AAAA");
        assert_eq!(SasCode::try_from(123456).unwrap().as_str(), "AU2D");
        assert_eq!(SasCode::try_from((1 << 20) - 1).unwrap().as_str(), "9999");
        assert_eq!(
            SasCode::try_from(1 << 20),
            Err("Provided integer is too large")
        );
    }

    #[test]
    fn test_from_str_good() {
        assert_eq!("AAAA".parse::<SasCode>().unwrap().as_str(), "AAAA");
        assert_eq!("9999".parse::<SasCode>().unwrap().as_str(), "9999");
    }

    #[test]
    fn test_from_str_bad() {
        for bad in ["AAA", "AAAAA", "AIAA", "AA1A", "#AAA", "aaaa"] {
            assert_eq!(bad.parse::<SasCode>(), Err("Invalid SAS code"), "{bad}");
        }
    }

    #[test]
    fn test_generate_pair_is_deterministic() {
        let secret = SharedSecretKey::from_bytes([9u8; 32]);
        let first = SasCode::generate_pair(b"claimer-nonce", b"greeter-nonce", &secret);
        let second = SasCode::generate_pair(b"claimer-nonce", b"greeter-nonce", &secret);
        assert_eq!(first, second);
    }

    #[test]
    fn test_generate_pair_depends_on_every_input() {
        let secret = SharedSecretKey::from_bytes([9u8; 32]);
        let other_secret = SharedSecretKey::from_bytes([10u8; 32]);
        let base = SasCode::generate_pair(b"cn", b"gn", &secret);
        assert_ne!(base, SasCode::generate_pair(b"cnX", b"gn", &secret));
        assert_ne!(base, SasCode::generate_pair(b"cn", b"gnX", &secret));
        assert_ne!(base, SasCode::generate_pair(b"cn", b"gn", &other_secret));
    }

    #[test]
    fn test_choices_contain_true_code_exactly_once() {
        let correct = SasCode::try_from(123456).unwrap();
        for _ in 0..50 {
            let choices = SasCode::generate_choices(&correct, SAS_CODE_CANDIDATES);
            assert_eq!(choices.len(), SAS_CODE_CANDIDATES);
            assert_eq!(choices.iter().filter(|c| **c == correct).count(), 1);
        }
    }

    proptest! {
        #[test]
        fn prop_u20_round_trips_through_display(num in 0u32..(1 << 20)) {
            let code = SasCode::try_from(num).unwrap();
            let parsed: SasCode = code.as_str().parse().unwrap();
            prop_assert_eq!(code, parsed);
        }

        #[test]
        fn prop_codes_use_only_the_alphabet(num in 0u32..(1 << 20)) {
            let code = SasCode::try_from(num).unwrap();
            prop_assert!(code.as_str().bytes().all(|b| SAS_CODE_CHARS.contains(&b)));
        }
    }
}
