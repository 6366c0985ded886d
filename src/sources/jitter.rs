/// Jitter entropy source (CPU timing variations).
///
/// Each sample times a short data-dependent walk over a scratch table:
/// the addresses visited depend on the values read, so cache and
/// branch-predictor state feed back into the measured duration. Deltas
/// are folded into a rolling accumulator that survives across polls, and
/// the raw stream is whitened through the hash callback.
use super::EntropySource;
use crate::config::Config;
use crate::crypto::HashCb;
use crate::drng::seed_buffer::SeedSlot;
use std::sync::Mutex;
use std::time::Instant;

/// Timing samples folded into the raw stream per poll.
const SAMPLES: usize = 192;
/// Words in the scratch table the workload walks between time reads.
const TABLE_WORDS: usize = 64;
/// Lower bound of walk steps per sample; the fold value adds up to 31.
const MIN_WALK_STEPS: usize = 16;

pub struct JitterSource {
    prev_fold: Mutex<u64>,
}

impl JitterSource {
    pub fn new() -> Self {
        Self {
            prev_fold: Mutex::new(0x9e37_79b9_7f4a_7c15),
        }
    }

    fn collect(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(SAMPLES * 8);
        let mut table = [0u64; TABLE_WORDS];
        let mut fold = *self.prev_fold.lock().unwrap();
        let mut idx = 0usize;
        let epoch = Instant::now();

        for round in 0..SAMPLES {
            let t0 = epoch.elapsed().as_nanos() as u64;

            // The walk length and every address depend on prior timing,
            // so each sample perturbs the next one's cache footprint
            let steps = MIN_WALK_STEPS + (fold as usize & 0x1f);
            for step in 0..steps {
                let word = table[idx];
                table[idx] = word.rotate_left(7) ^ t0.wrapping_add(step as u64);
                idx = (word as usize ^ round ^ step) % TABLE_WORDS;
            }
            std::hint::black_box(&table);

            let delta = (epoch.elapsed().as_nanos() as u64).wrapping_sub(t0);
            fold = fold.rotate_left(19) ^ delta;
            raw.extend_from_slice(&fold.to_le_bytes());
        }

        *self.prev_fold.lock().unwrap() = fold;
        raw
    }
}

impl Default for JitterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for JitterSource {
    fn name(&self) -> &'static str {
        "JitterRNG"
    }

    fn available(&self) -> bool {
        true
    }

    fn rate_bits(&self, config: &Config) -> u32 {
        config.jitter_entropy_rate()
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

        let raw = self.collect();
        let digest = hash.hash(&raw);
        let claimed = self.rate_bits(config).min(requested_bits);
        slot.fill(&digest, claimed);
        slot.bits()
    }
}
