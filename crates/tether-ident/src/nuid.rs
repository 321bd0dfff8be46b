//! Collision-resistant unique identifier generator.
//!
//! A [`Nuid`] emits 22-character identifiers over `[0-9A-Za-z]`: a 12
//! character per-instance random prefix followed by a 10 character base-62
//! rendering of a sequential counter. The counter advances by a random
//! per-instance stride, so observers cannot predict the next identifier from
//! the last one, and two instances collide only if they draw the same prefix
//! *and* overlapping counter windows.
//!
//! When the counter would reach `62^10` the prefix is re-randomized and the
//! counter restarts from a fresh random value, keeping the stream unbounded.

use rand::{rngs::OsRng, Rng, RngCore};

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u64 = 62;

const PREFIX_LEN: usize = 12;
const SEQ_LEN: usize = 10;

/// Total length of every generated identifier.
pub const NUID_LEN: usize = PREFIX_LEN + SEQ_LEN;

/// 62^10 - the exclusive upper bound of the counter.
const MAX_SEQ: u64 = 839_299_365_868_340_224;

const MIN_INC: u64 = 33;
const MAX_INC: u64 = 333;

/// Generator state: random prefix plus strided counter.
///
/// Not shared: each client owns one instance (and locks it if it hands out
/// clones of itself across tasks). Construction and rollover draw from the
/// OS RNG; [`Nuid::next`] itself never touches the RNG between rollovers.
#[derive(Debug, Clone)]
pub struct Nuid {
    prefix: [u8; PREFIX_LEN],
    seq: u64,
    inc: u64,
}

impl Nuid {
    /// Create a generator with a fresh random prefix, counter, and stride.
    #[must_use]
    pub fn new() -> Self {
        let mut nuid = Self { prefix: [0; PREFIX_LEN], seq: 0, inc: 0 };
        nuid.randomize();
        nuid
    }

    /// Produce the next identifier.
    pub fn next(&mut self) -> String {
        self.seq += self.inc;
        if self.seq >= MAX_SEQ {
            self.randomize();
        }

        let mut out = [0u8; NUID_LEN];
        out[..PREFIX_LEN].copy_from_slice(&self.prefix);

        let mut rem = self.seq;
        for slot in out[PREFIX_LEN..].iter_mut().rev() {
            *slot = ALPHABET[(rem % BASE) as usize];
            rem /= BASE;
        }

        // ALPHABET is ASCII, so the buffer is valid UTF-8 by construction.
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Re-seed prefix, counter, and stride from the OS RNG.
    ///
    /// The counter seed takes 62 random bits reduced modulo the maximum, so
    /// every restart lands uniformly inside the counter space.
    fn randomize(&mut self) {
        let mut rng = OsRng;
        for slot in &mut self.prefix {
            *slot = ALPHABET[rng.gen_range(0..BASE) as usize];
        }
        self.seq = (rng.next_u64() >> 2) % MAX_SEQ;
        self.inc = MIN_INC + rng.gen_range(0..MAX_INC - MIN_INC);
    }
}

impl Default for Nuid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn identifiers_have_fixed_length_and_alphabet() {
        let mut nuid = Nuid::new();
        for _ in 0..1000 {
            let id = nuid.next();
            assert_eq!(id.len(), NUID_LEN);
            assert!(id.bytes().all(|b| ALPHABET.contains(&b)), "bad id {id}");
        }
    }

    #[test]
    fn sequential_draws_are_unique_and_share_prefix() {
        let mut nuid = Nuid::new();
        let a = nuid.next();
        let b = nuid.next();
        assert_ne!(a, b);
        assert_eq!(a[..PREFIX_LEN], b[..PREFIX_LEN]);
    }

    #[test]
    fn independent_instances_never_pair_collide() {
        let mut a = Nuid::new();
        let mut b = Nuid::new();
        for _ in 0..10_000 {
            assert_ne!(a.next(), b.next());
        }
    }

    #[test]
    fn many_draws_from_one_instance_are_distinct() {
        let mut nuid = Nuid::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(nuid.next()));
        }
    }

    #[test]
    fn rollover_rerandomizes_prefix() {
        let mut nuid = Nuid::new();
        let before = nuid.prefix;
        nuid.seq = MAX_SEQ - 1;
        let _ = nuid.next();
        // Counter restarted inside the valid range with a fresh prefix.
        assert!(nuid.seq < MAX_SEQ);
        // 62^-12 odds of a false failure here.
        assert_ne!(nuid.prefix, before);
    }

    #[test]
    fn stride_stays_in_contract_range() {
        for _ in 0..100 {
            let nuid = Nuid::new();
            assert!((MIN_INC..MAX_INC).contains(&nuid.inc));
        }
    }
}
