//! Tiny deterministic RNG for workload simulation.
//!
//! Drives randomized transfer delays and spawn-order shuffling. The same seed
//! reproduces the same delays, which keeps a failing batch replayable.
//!
//! **Generator**: XorShift64 (Marsaglia shifts 13/7/17), full period.
//! **Bounded sampling**: Lemire's multiply-high method with rejection.
//! **No `Copy`**: copying would duplicate the stream; clone explicitly.

/// Deterministic RNG. Not thread-safe; fork one per runner thread.
#[derive(Clone, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Seed 0 is remapped to avoid the all-zero fixed point.
    #[inline]
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `[0, upper)`.
    ///
    /// # Panics
    /// Panics (debug) if `upper` is 0.
    #[inline]
    pub fn below(&mut self, upper: u64) -> u64 {
        debug_assert!(upper > 0, "upper bound must be > 0");
        if upper.is_power_of_two() {
            return self.next_u64() & (upper - 1);
        }
        let threshold = upper.wrapping_neg() % upper;
        loop {
            let m = (self.next_u64() as u128) * (upper as u128);
            if (m as u64) >= threshold {
                return (m >> 64) as u64;
            }
        }
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.below(i as u64 + 1) as usize;
            slice.swap(i, j);
        }
    }

    /// Independent child stream, decorrelated through splitmix64.
    pub fn fork(&mut self) -> Self {
        let raw = self.next_u64();
        Self::new(splitmix64(raw))
    }
}

impl Default for XorShift64 {
    fn default() -> Self {
        Self::new(0)
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}
