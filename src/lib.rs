// Allow uppercase acronyms for industry-standard terms like DRNG, DRBG, RPC, SHM
#![allow(clippy::upper_case_acronyms)]

pub mod accounting;
pub mod config;
pub mod crypto;
pub mod drng;
pub mod rpc;
pub mod sources;
pub mod state;

// Re-export the central types for convenience
pub use config::Config;
pub use drng::manager::DrngManager;
pub use sources::SourceRegistry;
pub use state::{SeedState, SeedStateMachine};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// DRBG security strength in bits. All entropy accounting is relative to
/// this value.
pub const SECURITY_STRENGTH_BITS: u32 = 256;
/// DRBG security strength in bytes.
pub const SECURITY_STRENGTH_BYTES: usize = 32;

/// Credited entropy at which the service counts as minimally seeded.
pub const MIN_SEED_ENTROPY_BITS: u32 = 128;
/// Initial per-round entropy target right after startup or reset.
pub const INIT_ENTROPY_BITS: u32 = 32;
/// Additional entropy requested while a DRNG has never been fully seeded.
pub const SEED_INIT_ADD_BITS: u32 = 128;
/// Per-source oversampling margin applied in FIPS mode.
pub const OVERSAMPLE_ES_BITS: u32 = 64;

/// Number of generate operations a DRNG may serve between reseeds.
pub const DRNG_RESEED_THRESH: i64 = 1 << 20;
/// Default ceiling of generate operations without a full reseed before a
/// DRNG is demoted to not-fully-seeded.
pub const DRNG_MAX_WITHOUT_RESEED: u64 = 1 << 30;
/// Maximum number of bytes requested from the DRBG in one generate call.
pub const DRNG_MAX_REQSIZE: usize = 1 << 12;
/// Wall-clock seconds after which a DRNG is due for a reseed regardless of
/// its request counter.
pub const RESEED_MAX_SECS: u64 = 600;
/// Per-node stagger applied to reseed deadlines after an initial seeding
/// round, so the nodes do not all come due in the same second.
pub const NODE_STAGGER_SECS: u64 = 60;

/// Maximum RPC message payload in bytes, requests and responses alike.
pub const RPC_MAX_MSG_LEN: usize = 65500;

/// Errors surfaced by the ESDM core.
#[derive(Error, Debug)]
pub enum EsdmError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("service not available")]
    NotAvailable,

    #[error("operation would block")]
    WouldBlock,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permission denied")]
    Permission,

    #[error("random number generator fault")]
    Fault,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EsdmError {
    /// Errno-style code carried in RPC response `ret` fields (negated on
    /// the wire).
    pub fn errno(&self) -> i64 {
        match self {
            EsdmError::InvalidArgument(_) => libc::EINVAL as i64,
            EsdmError::NotAvailable => libc::EOPNOTSUPP as i64,
            EsdmError::WouldBlock => libc::EAGAIN as i64,
            EsdmError::Transient(_) => libc::EINTR as i64,
            EsdmError::Permission => libc::EPERM as i64,
            EsdmError::Fault => libc::EFAULT as i64,
            EsdmError::Fatal(_) => libc::EFAULT as i64,
            EsdmError::Io(_) => libc::EIO as i64,
        }
    }

    /// Reconstruct an error from a positive errno-style code received
    /// over the wire.
    pub fn from_errno(code: i64) -> Self {
        match code as i32 {
            libc::EINVAL => EsdmError::InvalidArgument("rejected by server".into()),
            libc::EOPNOTSUPP => EsdmError::NotAvailable,
            libc::EAGAIN => EsdmError::WouldBlock,
            libc::EINTR => EsdmError::Transient("call interrupted".into()),
            libc::EPERM => EsdmError::Permission,
            libc::EFAULT => EsdmError::Fault,
            other => EsdmError::Transient(format!("server returned errno {other}")),
        }
    }
}

pub type EsdmResult<T> = Result<T, EsdmError>;

/// Wall-clock seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Process-wide daemon context tying together configuration, the entropy
/// sources, the DRNG manager, and the seed state machine.
///
/// One context is created at startup and threaded through explicit `Arc`
/// parameters; there are no free-standing globals.
pub struct EsdmContext {
    pub config: Config,
    pub state: SeedStateMachine,
    pub manager: DrngManager,
    pub sources: SourceRegistry,
    shutdown: Arc<AtomicBool>,
    started_at: u64,
    seeder_gate: Mutex<bool>,
    seeder_cond: Condvar,
}

impl EsdmContext {
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_components(
            config,
            DrngManager::with_default_callbacks(),
            SourceRegistry::with_default_sources(),
        )
    }

    /// Assemble a context from explicit components, e.g. with non-default
    /// crypto callbacks.
    pub fn with_components(
        config: Config,
        manager: DrngManager,
        sources: SourceRegistry,
    ) -> Arc<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        Arc::new(Self {
            sources,
            manager,
            state: SeedStateMachine::new(Arc::clone(&shutdown)),
            config,
            shutdown,
            started_at: now_secs(),
            seeder_gate: Mutex::new(false),
            seeder_cond: Condvar::new(),
        })
    }

    /// Idempotent core bring-up: FIPS rate adjustments, selftests, and
    /// allocation of the initial and atomic-fallback DRNGs.
    pub fn initialise(&self) -> EsdmResult<()> {
        self.config.apply_fips_adjustments();
        self.manager.initialise()
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Request shutdown and release every suspended thread.
    pub fn trigger_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.state.broadcast_wakeup();
        self.wake_seeder();
    }

    /// Nudge the seeder thread: an entropy source gained material, a rate
    /// changed, or an operator forced a reseed.
    pub fn wake_seeder(&self) {
        let mut pending = self.seeder_gate.lock().unwrap();
        *pending = true;
        self.seeder_cond.notify_all();
    }

    /// Park the seeder thread until woken or `timeout` elapsed. Returns
    /// true if there is pending seeding work.
    pub fn wait_seeder(&self, timeout: Duration) -> bool {
        let pending = self.seeder_gate.lock().unwrap();
        let (mut pending, _) = self
            .seeder_cond
            .wait_timeout_while(pending, timeout, |p| !*p && !self.is_shutdown())
            .unwrap();
        std::mem::replace(&mut *pending, false)
    }

    /// Currently available entropy in bits, summed across all sources.
    pub fn avail_entropy(&self) -> u32 {
        self.sources.avail_entropy(&self.config)
    }

    /// Human-readable status report, published over RPC and in the status
    /// shared memory segment.
    pub fn status_report(&self) -> String {
        let uptime = Duration::from_secs(now_secs().saturating_sub(self.started_at));
        let mut out = String::with_capacity(512);
        out.push_str(&format!(
            "ESDM server {}\nStarted: {}\nUptime: {}\n",
            env!("CARGO_PKG_VERSION"),
            chrono::DateTime::from_timestamp(self.started_at as i64, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            humantime::format_duration(uptime),
        ));
        out.push_str(&format!(
            "FIPS mode: {}\nState: {:?}\nAvailable entropy: {} bits\n",
            self.config.fips_enabled(),
            self.state.current(),
            self.avail_entropy(),
        ));
        out.push_str(&self.manager.status_report());
        out.push_str(&self.sources.status_report(&self.config));
        out
    }
}
