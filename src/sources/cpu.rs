/// CPU hardware RNG entropy source (RDSEED with RDRAND fallback).
///
/// Raw instruction output is oversampled fourfold and conditioned through
/// the hash callback before it enters a seed slot; the credited rate stays
/// the operator's conservative estimate, not the raw byte count.
use super::EntropySource;
use crate::config::Config;
use crate::crypto::HashCb;
use crate::drng::seed_buffer::SeedSlot;

/// Data-to-entropy oversampling applied to the raw instruction output.
const CONDITION_OVERSAMPLE: usize = 4;
/// Retries per word before the instruction is considered drained.
const WORD_RETRIES: u32 = 10;

pub struct CpuSource {
    available: bool,
}

impl CpuSource {
    pub fn new() -> Self {
        let available = arch::probe();
        if available {
            tracing::debug!("CPU hardware RNG detected");
        } else {
            tracing::debug!("CPU hardware RNG not available");
        }
        Self { available }
    }
}

impl Default for CpuSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for CpuSource {
    fn name(&self) -> &'static str {
        "CPU"
    }

    fn available(&self) -> bool {
        self.available
    }

    fn rate_bits(&self, config: &Config) -> u32 {
        config.cpu_entropy_rate()
    }

    fn poll(
        &self,
        requested_bits: u32,
        config: &Config,
        slot: &mut SeedSlot,
        hash: &dyn HashCb,
    ) -> u32 {
        if !self.available || requested_bits == 0 {
            slot.fill(&[], 0);
            return 0;
        }

        let raw_bytes = (requested_bits as usize).div_ceil(8) * CONDITION_OVERSAMPLE;
        let mut raw = Vec::with_capacity(raw_bytes);
        if !arch::fill(&mut raw, raw_bytes) {
            slot.fill(&[], 0);
            return 0;
        }

        let digest = hash.hash(&raw);
        let claimed = self.rate_bits(config).min(requested_bits);
        slot.fill(&digest, claimed);
        slot.bits()
    }
}

#[cfg(target_arch = "x86_64")]
mod arch {
    pub fn probe() -> bool {
        is_x86_feature_detected!("rdseed") || is_x86_feature_detected!("rdrand")
    }

    #[target_feature(enable = "rdseed")]
    unsafe fn rdseed64() -> Option<u64> {
        let mut v = 0u64;
        if core::arch::x86_64::_rdseed64_step(&mut v) == 1 {
            Some(v)
        } else {
            None
        }
    }

    #[target_feature(enable = "rdrand")]
    unsafe fn rdrand64() -> Option<u64> {
        let mut v = 0u64;
        if core::arch::x86_64::_rdrand64_step(&mut v) == 1 {
            Some(v)
        } else {
            None
        }
    }

    fn read_word(use_rdseed: bool) -> Option<u64> {
        for _ in 0..super::WORD_RETRIES {
            let word = if use_rdseed {
                unsafe { rdseed64() }
            } else {
                unsafe { rdrand64() }
            };
            if word.is_some() {
                return word;
            }
            core::hint::spin_loop();
        }
        None
    }

    pub fn fill(out: &mut Vec<u8>, bytes: usize) -> bool {
        let use_rdseed = is_x86_feature_detected!("rdseed");
        if !use_rdseed && !is_x86_feature_detected!("rdrand") {
            return false;
        }
        while out.len() < bytes {
            match read_word(use_rdseed) {
                Some(word) => out.extend_from_slice(&word.to_le_bytes()),
                None => return false,
            }
        }
        out.truncate(bytes);
        true
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod arch {
    pub fn probe() -> bool {
        false
    }

    pub fn fill(_out: &mut Vec<u8>, _bytes: usize) -> bool {
        false
    }
}
