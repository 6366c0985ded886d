/// Entropy source adapters.
///
/// Every source is stateless across polls and conservative: an
/// unavailable source deposits a zero-entropy payload instead of failing.
/// The registry fixes the polling order; the auxiliary pool is always the
/// last slot and doubles as the write-back target for user-supplied
/// entropy.
pub mod aux_pool;
pub mod cpu;
pub mod jitter;
pub mod krng;
pub mod sched;


pub use aux_pool::AuxPool;
pub use cpu::CpuSource;
pub use jitter::JitterSource;
pub use krng::KernelRngSource;
pub use sched::SchedSource;

use crate::accounting;
use crate::config::Config;
use crate::crypto::HashCb;
use crate::drng::seed_buffer::SeedSlot;
use std::sync::Arc;

pub trait EntropySource: Send + Sync {
    /// Human name for logs and the status report.
    fn name(&self) -> &'static str;

    /// Whether the backing noise source exists on this host.
    fn available(&self) -> bool;

    /// Operator-declared entropy rate (bits per 256 data bits). The
    /// auxiliary pool reports its current fill level instead.
    fn rate_bits(&self, config: &Config) -> u32;

    /// Write a conditioned payload into `slot` and return the claimed
    /// entropy bits. Never fails; an unavailable source claims 0.
    fn poll(
        &self,
        requested_bits: u32,
        config: &Config,
        slot: &mut SeedSlot,
        hash: &dyn HashCb,
    ) -> u32;

    /// Whether `bits` satisfy this source's own full-seed expectation.
    fn fully_seeded(&self, bits: u32, config: &Config) -> bool {
        bits >= accounting::cap_contribution(self.rate_bits(config))
    }

    /// True when the source already deducted the oversampling margin when
    /// the material entered it (auxiliary pool); the seeder then skips the
    /// poll-time deduction.
    fn osr_applied_on_insert(&self) -> bool {
        false
    }
}

pub struct SourceRegistry {
    sources: Vec<Arc<dyn EntropySource>>,
    aux: Arc<AuxPool>,
}

impl SourceRegistry {
    /// Default registry: CPU, Jitter, kernel RNG, scheduler, aux pool.
    pub fn with_default_sources() -> Self {
        let aux = Arc::new(AuxPool::new());
        let sources: Vec<Arc<dyn EntropySource>> = vec![
            Arc::new(CpuSource::new()),
            Arc::new(JitterSource::new()),
            Arc::new(KernelRngSource::new()),
            Arc::new(SchedSource::new()),
            Arc::clone(&aux) as Arc<dyn EntropySource>,
        ];
        Self { sources, aux }
    }

    pub fn sources(&self) -> &[Arc<dyn EntropySource>] {
        &self.sources
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Push-mode access to the auxiliary pool (write-back RPCs).
    pub fn aux(&self) -> &Arc<AuxPool> {
        &self.aux
    }

    /// Entropy currently available across all sources, in bits.
    pub fn avail_entropy(&self, config: &Config) -> u32 {
        self.sources
            .iter()
            .filter(|s| s.available())
            .map(|s| accounting::cap_contribution(s.rate_bits(config)))
            .sum()
    }

    pub fn status_report(&self, config: &Config) -> String {
        let mut out = String::new();
        for src in &self.sources {
            out.push_str(&format!(
                "Entropy source {}: available {}, rate {} bits\n",
                src.name(),
                src.available(),
                src.rate_bits(config),
            ));
        }
        out
    }
}
