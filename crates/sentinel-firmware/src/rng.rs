//! Hardware RNG bridge.
//!
//! Adapts the chip's RNG peripheral to the `rand_core` traits the session
//! crypto is generic over. With the radio enabled the hardware generator is
//! fed from RF noise and is suitable as a CSPRNG.

use esp_hal::rng::Rng;
use rand_core::{CryptoRng, Error, RngCore};

pub struct HwRng(Rng);

impl HwRng {
    pub fn new(rng: Rng) -> Self {
        Self(rng)
    }
}

impl RngCore for HwRng {
    fn next_u32(&mut self) -> u32 {
        self.0.random()
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(self.0.random()) << 32) | u64::from(self.0.random())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.0.random().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for HwRng {}
