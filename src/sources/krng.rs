/// Kernel RNG passthrough entropy source.
///
/// Taps the operating system's own CSPRNG through ring's `SystemRandom`.
/// The kernel generator is itself fully seeded on any reasonable host,
/// which is why this source carries a full-strength default rate.
use super::EntropySource;
use crate::config::Config;
use crate::crypto::HashCb;
use crate::drng::seed_buffer::SeedSlot;
use ring::rand::{SecureRandom, SystemRandom};

/// Bytes pulled from the kernel per poll, before conditioning.
const RAW_BYTES: usize = 64;

pub struct KernelRngSource {
    rng: SystemRandom,
}

impl KernelRngSource {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for KernelRngSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for KernelRngSource {
    fn name(&self) -> &'static str {
        "KernelRNG"
    }

    fn available(&self) -> bool {
        true
    }

    fn rate_bits(&self, config: &Config) -> u32 {
        config.krng_entropy_rate()
    }

    fn poll(
        &self,
        requested_bits: u32,
        config: &Config,
        slot: &mut SeedSlot,
        hash: &dyn HashCb,
    ) -> u32 {
        if requested_bits == 0 {
            slot.fill(&[], 0);
            return 0;
        }

        let mut raw = [0u8; RAW_BYTES];
        if self.rng.fill(&mut raw).is_err() {
            tracing::warn!("kernel RNG read failed, claiming zero entropy");
            slot.fill(&[], 0);
            return 0;
        }

        let digest = hash.hash(&raw);
        let claimed = self.rate_bits(config).min(requested_bits);
        slot.fill(&digest, claimed);
        slot.bits()
    }
}
