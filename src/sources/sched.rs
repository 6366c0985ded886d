/// Scheduler-based entropy source.
///
/// A user-space stand-in for scheduler noise: context-switch counters of
/// the daemon process mixed with the timing of voluntary yields. The
/// default rate is zero, so the material is mixed into seed buffers
/// without any entropy credit until an operator opts in.
use super::EntropySource;
use crate::config::Config;
use crate::crypto::HashCb;
use crate::drng::seed_buffer::SeedSlot;
use std::time::Instant;

/// Yield-timing samples per poll.
const YIELD_ROUNDS: usize = 128;

pub struct SchedSource {
    available: bool,
}

impl SchedSource {
    pub fn new() -> Self {
        let available = procfs::process::Process::myself().is_ok();
        Self { available }
    }

    fn collect(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(YIELD_ROUNDS * 8 + 32);

        if let Ok(proc_self) = procfs::process::Process::myself() {
            if let Ok(status) = proc_self.status() {
                if let Some(v) = status.voluntary_ctxt_switches {
                    raw.extend_from_slice(&v.to_le_bytes());
                }
                if let Some(nv) = status.nonvoluntary_ctxt_switches {
                    raw.extend_from_slice(&nv.to_le_bytes());
                }
            }
        }

        for _ in 0..YIELD_ROUNDS {
            let start = Instant::now();
            std::thread::yield_now();
            let elapsed = start.elapsed().as_nanos() as u64;
            raw.extend_from_slice(&elapsed.to_le_bytes());
        }

        raw
    }
}

impl Default for SchedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for SchedSource {
    fn name(&self) -> &'static str {
        "Scheduler"
    }

    fn available(&self) -> bool {
        self.available
    }

    fn rate_bits(&self, config: &Config) -> u32 {
        config.sched_entropy_rate()
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

        let raw = self.collect();
        let digest = hash.hash(&raw);
        let claimed = self.rate_bits(config).min(requested_bits);
        slot.fill(&digest, claimed);
        slot.bits()
    }
}
