/// Runtime configuration of the ESDM core.
///
/// All rates are expressed in bits of entropy per 256 data bits delivered
/// by the source, i.e. relative to the DRBG security strength. Every field
/// is runtime-tunable; setters clamp and latch an entropy-addition event
/// that the seeder thread picks up.
use crate::{DRNG_MAX_WITHOUT_RESEED, SECURITY_STRENGTH_BITS};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Runtime override of the environment's FIPS status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceFips {
    Unset,
    Enabled,
    Disabled,
}

impl ForceFips {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ForceFips::Enabled,
            2 => ForceFips::Disabled,
            _ => ForceFips::Unset,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ForceFips::Unset => 0,
            ForceFips::Enabled => 1,
            ForceFips::Disabled => 2,
        }
    }
}

/// Default entropy rates, chosen conservatively: the kernel RNG is a fully
/// seeded CSPRNG and trusted for full strength, the hardware sources carry
/// deliberately low operator estimates.
pub const DEFAULT_CPU_ENTROPY_RATE: u32 = 8;
pub const DEFAULT_JITTER_ENTROPY_RATE: u32 = 16;
pub const DEFAULT_KRNG_ENTROPY_RATE: u32 = SECURITY_STRENGTH_BITS;
pub const DEFAULT_SCHED_ENTROPY_RATE: u32 = 0;

pub struct Config {
    cpu_entropy_rate: AtomicU32,
    jitter_entropy_rate: AtomicU32,
    krng_entropy_rate: AtomicU32,
    sched_entropy_rate: AtomicU32,
    drng_max_wo_reseed: AtomicU64,
    max_nodes: AtomicU32,
    force_fips: AtomicU8,
    /// Latched by every setter; consumed by the seeder thread.
    entropy_event: AtomicBool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cpu_entropy_rate: AtomicU32::new(DEFAULT_CPU_ENTROPY_RATE),
            jitter_entropy_rate: AtomicU32::new(DEFAULT_JITTER_ENTROPY_RATE),
            krng_entropy_rate: AtomicU32::new(DEFAULT_KRNG_ENTROPY_RATE),
            sched_entropy_rate: AtomicU32::new(DEFAULT_SCHED_ENTROPY_RATE),
            drng_max_wo_reseed: AtomicU64::new(DRNG_MAX_WITHOUT_RESEED),
            max_nodes: AtomicU32::new(u32::MAX),
            force_fips: AtomicU8::new(ForceFips::Unset.as_u8()),
            entropy_event: AtomicBool::new(false),
        }
    }
}

fn clamp_rate(v: u32) -> u32 {
    v.min(SECURITY_STRENGTH_BITS)
}

impl Config {
    pub fn cpu_entropy_rate(&self) -> u32 {
        self.cpu_entropy_rate.load(Ordering::Relaxed)
    }

    pub fn set_cpu_entropy_rate(&self, bits: u32) {
        self.cpu_entropy_rate
            .store(clamp_rate(bits), Ordering::Relaxed);
        self.entropy_event.store(true, Ordering::Release);
    }

    pub fn jitter_entropy_rate(&self) -> u32 {
        self.jitter_entropy_rate.load(Ordering::Relaxed)
    }

    pub fn set_jitter_entropy_rate(&self, bits: u32) {
        self.jitter_entropy_rate
            .store(clamp_rate(bits), Ordering::Relaxed);
        self.entropy_event.store(true, Ordering::Release);
    }

    pub fn krng_entropy_rate(&self) -> u32 {
        self.krng_entropy_rate.load(Ordering::Relaxed)
    }

    pub fn set_krng_entropy_rate(&self, bits: u32) {
        self.krng_entropy_rate
            .store(clamp_rate(bits), Ordering::Relaxed);
        self.entropy_event.store(true, Ordering::Release);
    }

    pub fn sched_entropy_rate(&self) -> u32 {
        self.sched_entropy_rate.load(Ordering::Relaxed)
    }

    pub fn set_sched_entropy_rate(&self, bits: u32) {
        self.sched_entropy_rate
            .store(clamp_rate(bits), Ordering::Relaxed);
        self.entropy_event.store(true, Ordering::Release);
    }

    pub fn drng_max_wo_reseed(&self) -> u64 {
        self.drng_max_wo_reseed.load(Ordering::Relaxed)
    }

    pub fn set_drng_max_wo_reseed(&self, ops: u64) {
        self.drng_max_wo_reseed.store(ops.max(1), Ordering::Relaxed);
    }

    pub fn max_nodes(&self) -> u32 {
        self.max_nodes.load(Ordering::Relaxed).max(1)
    }

    pub fn set_max_nodes(&self, nodes: u32) {
        self.max_nodes.store(nodes.max(1), Ordering::Relaxed);
    }

    pub fn force_fips(&self) -> ForceFips {
        ForceFips::from_u8(self.force_fips.load(Ordering::Relaxed))
    }

    pub fn set_force_fips(&self, v: ForceFips) {
        self.force_fips.store(v.as_u8(), Ordering::Relaxed);
    }

    /// Consume the entropy-addition event latched by rate setters.
    pub fn take_entropy_event(&self) -> bool {
        self.entropy_event.swap(false, Ordering::AcqRel)
    }

    /// Runtime override if set, otherwise the environment's FIPS status
    /// (`ESDM_SERVER_FORCE_FIPS` or the kernel FIPS flag).
    pub fn fips_enabled(&self) -> bool {
        match self.force_fips() {
            ForceFips::Enabled => true,
            ForceFips::Disabled => false,
            ForceFips::Unset => env_fips_enabled(),
        }
    }

    /// Entropy-source oversampling is tied to FIPS operation.
    pub fn oversampling_enabled(&self) -> bool {
        self.fips_enabled()
    }

    /// FIPS requires full trust in the Jitter source: a non-zero operator
    /// rate is raised to the security strength.
    pub fn apply_fips_adjustments(&self) {
        if self.fips_enabled() && self.jitter_entropy_rate() > 0 {
            self.set_jitter_entropy_rate(SECURITY_STRENGTH_BITS);
        }
    }

    /// Number of online nodes, capped by the configured maximum.
    pub fn online_nodes(&self) -> u32 {
        (num_cpus::get() as u32).clamp(1, self.max_nodes())
    }

    /// Node the calling thread currently runs on, folded into the online
    /// node range.
    pub fn curr_node(&self) -> u32 {
        let cpu = unsafe { libc::sched_getcpu() };
        let cpu = if cpu < 0 { 0 } else { cpu as u32 };
        cpu % self.online_nodes()
    }
}

fn env_fips_enabled() -> bool {
    if std::env::var_os("ESDM_SERVER_FORCE_FIPS").is_some() {
        return true;
    }
    kernel_fips_enabled()
}

fn kernel_fips_enabled() -> bool {
    let path = Path::new("/proc/sys/crypto/fips_enabled");
    match std::fs::read_to_string(path) {
        Ok(s) => s.trim() == "1",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_clamp() {
        let config = Config::default();
        config.set_cpu_entropy_rate(1000);
        assert_eq!(config.cpu_entropy_rate(), SECURITY_STRENGTH_BITS);
        config.set_cpu_entropy_rate(0);
        assert_eq!(config.cpu_entropy_rate(), 0);
        config.set_jitter_entropy_rate(257);
        assert_eq!(config.jitter_entropy_rate(), SECURITY_STRENGTH_BITS);
    }

    #[test]
    fn test_setters_latch_entropy_event() {
        let config = Config::default();
        assert!(!config.take_entropy_event());
        config.set_krng_entropy_rate(200);
        assert!(config.take_entropy_event());
        // Consumed once
        assert!(!config.take_entropy_event());
    }

    #[test]
    fn test_force_fips_overrides_environment() {
        let config = Config::default();
        config.set_force_fips(ForceFips::Enabled);
        assert!(config.fips_enabled());
        config.set_force_fips(ForceFips::Disabled);
        assert!(!config.fips_enabled());
    }

    #[test]
    fn test_fips_raises_jitter_rate() {
        let config = Config::default();
        config.set_force_fips(ForceFips::Enabled);
        assert!(config.jitter_entropy_rate() > 0);
        config.apply_fips_adjustments();
        assert_eq!(config.jitter_entropy_rate(), SECURITY_STRENGTH_BITS);
    }

    #[test]
    fn test_fips_leaves_zero_jitter_rate() {
        let config = Config::default();
        config.set_jitter_entropy_rate(0);
        config.set_force_fips(ForceFips::Enabled);
        config.apply_fips_adjustments();
        assert_eq!(config.jitter_entropy_rate(), 0);
    }

    #[test]
    fn test_node_intersection() {
        let config = Config::default();
        config.set_max_nodes(1);
        assert_eq!(config.online_nodes(), 1);
        assert_eq!(config.curr_node(), 0);
    }
}
