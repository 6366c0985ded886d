/// One DRNG instance: an owned DRBG state plus the bookkeeping that
/// drives reseeds.
///
/// The instance lock (the DRBG mutex) strictly serialises seed and
/// generate on one instance; the counters and flags are atomics so that
/// the seeding scheduler can inspect them without taking the lock.
use crate::crypto::{DrngCb, DrngState, HashCb};
use crate::{
    now_secs, EsdmContext, EsdmError, EsdmResult, DRNG_MAX_REQSIZE, DRNG_RESEED_THRESH,
    SECURITY_STRENGTH_BYTES,
};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub struct DrngInstance {
    drng: Mutex<Box<dyn DrngState>>,
    hash_cb: RwLock<Arc<dyn HashCb>>,
    requests: AtomicI64,
    requests_since_fully_seeded: AtomicU64,
    last_seeded: AtomicU64,
    fully_seeded: AtomicBool,
    force_reseed: AtomicBool,
    name: String,
    node: Option<u32>,
}

impl DrngInstance {
    pub fn new(
        name: impl Into<String>,
        node: Option<u32>,
        drng_cb: &Arc<dyn DrngCb>,
        hash_cb: Arc<dyn HashCb>,
    ) -> EsdmResult<Self> {
        let drng = drng_cb.alloc(SECURITY_STRENGTH_BYTES)?;
        Ok(Self {
            drng: Mutex::new(drng),
            hash_cb: RwLock::new(hash_cb),
            requests: AtomicI64::new(DRNG_RESEED_THRESH),
            requests_since_fully_seeded: AtomicU64::new(0),
            last_seeded: AtomicU64::new(0),
            fully_seeded: AtomicBool::new(false),
            force_reseed: AtomicBool::new(true),
            name: name.into(),
            node,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> Option<u32> {
        self.node
    }

    pub fn fully_seeded(&self) -> bool {
        self.fully_seeded.load(Ordering::Acquire)
    }

    pub fn reseed_forced(&self) -> bool {
        self.force_reseed.load(Ordering::Acquire)
    }

    pub fn request_force_reseed(&self) {
        self.force_reseed.store(true, Ordering::Release);
    }

    pub fn last_seeded(&self) -> u64 {
        self.last_seeded.load(Ordering::Relaxed)
    }

    /// Anti-storm stagger: push the reseed deadline into the future. The
    /// resulting timestamp is opaque and only ever compared through
    /// elapsed-time arithmetic.
    pub fn advance_last_seeded(&self, secs: u64) {
        self.last_seeded.fetch_add(secs, Ordering::Relaxed);
    }

    /// Account one generate operation against the reseed budget. True
    /// once the budget is used up.
    pub fn consume_request(&self) -> bool {
        self.requests.fetch_sub(1, Ordering::Relaxed) <= 1
    }

    /// Whether the generate budget since the last seed is exhausted.
    pub fn requests_exhausted(&self) -> bool {
        self.requests.load(Ordering::Relaxed) <= 0
    }

    pub fn requests(&self) -> i64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn requests_since_fully_seeded(&self) -> u64 {
        self.requests_since_fully_seeded.load(Ordering::Relaxed)
    }

    /// Read-side clone of the conditioning hash; generators share it while
    /// a writer may swap the primitive underneath.
    pub fn hash_cb(&self) -> Arc<dyn HashCb> {
        Arc::clone(&self.hash_cb.read().unwrap())
    }

    /// Swap the conditioning hash (writer side).
    pub fn swap_hash_cb(&self, new: Arc<dyn HashCb>) {
        let mut cb = self.hash_cb.write().unwrap();
        tracing::info!(drng = %self.name, from = cb.name(), to = new.name(), "hash swapped");
        *cb = new;
    }

    /// Inject seed material under the instance lock.
    ///
    /// On success the reseed budget is restored, the timestamp advances,
    /// and a full seed clears the generate debt and promotes the
    /// instance. On failure the instance latches `force_reseed` so the
    /// next generate retries; an earlier full-seed promotion is not
    /// revoked by a single failed reseed.
    pub fn inject(&self, seed: &[u8], fully_seeded_flag: bool) -> EsdmResult<()> {
        let mut drng = self.drng.lock().unwrap();
        match drng.seed(seed) {
            Ok(()) => {
                self.requests.store(DRNG_RESEED_THRESH, Ordering::Relaxed);
                self.last_seeded.store(now_secs(), Ordering::Relaxed);
                self.force_reseed.store(false, Ordering::Release);
                if fully_seeded_flag {
                    self.requests_since_fully_seeded.store(0, Ordering::Relaxed);
                    if !self.fully_seeded.swap(true, Ordering::AcqRel) {
                        tracing::info!(drng = %self.name, "DRNG fully seeded");
                    }
                }
                tracing::debug!(
                    drng = %self.name,
                    bytes = seed.len(),
                    full = fully_seeded_flag,
                    "seed injected"
                );
                Ok(())
            }
            Err(e) => {
                self.force_reseed.store(true, Ordering::Release);
                tracing::warn!(drng = %self.name, error = %e, "seed injection failed");
                Err(e)
            }
        }
    }

    /// Clear all seeding state. Used by the manager's reset walk; taken
    /// under the instance lock so no generate interleaves.
    pub fn reset(&self) {
        let _guard = self.drng.lock().unwrap();
        self.requests.store(DRNG_RESEED_THRESH, Ordering::Relaxed);
        self.requests_since_fully_seeded.store(0, Ordering::Relaxed);
        self.last_seeded.store(0, Ordering::Relaxed);
        self.fully_seeded.store(false, Ordering::Release);
        self.force_reseed.store(true, Ordering::Release);
    }

    /// Produce random bytes.
    ///
    /// Output is produced in chunks of at most `DRNG_MAX_REQSIZE`; before
    /// each chunk the reseed criteria are evaluated and a reseed is
    /// attempted when the pool lock is free. A contended pool lock never
    /// blocks generation: the instance merely latches `force_reseed` and
    /// carries on.
    pub fn generate(&self, ctx: &EsdmContext, out: &mut [u8]) -> EsdmResult<usize> {
        if !ctx.manager.avail() {
            return Err(EsdmError::NotAvailable);
        }

        // Clamp to the positive half-range of ssize_t
        let len = out.len().min(isize::MAX as usize);
        if len == 0 {
            return Ok(0);
        }

        if self.requests_since_fully_seeded.load(Ordering::Relaxed)
            > ctx.config.drng_max_wo_reseed()
            && self.fully_seeded.swap(false, Ordering::AcqRel)
        {
            tracing::warn!(
                drng = %self.name,
                "generate budget exceeded without full reseed, demoted"
            );
        }

        let mut generated = 0usize;
        while generated < len {
            let todo = (len - generated).min(DRNG_MAX_REQSIZE);

            if super::seeder::must_reseed(self) {
                match ctx.manager.pool_try_lock() {
                    Some(_pool) => {
                        if let Err(e) = super::seeder::seed_drng(ctx, self) {
                            tracing::warn!(drng = %self.name, error = %e, "reseed failed, continuing");
                        }
                    }
                    None => self.request_force_reseed(),
                }
            }

            let produced = {
                let mut drng = self.drng.lock().unwrap();
                drng.generate(&mut out[generated..generated + todo])
            };
            match produced {
                Ok(n) if n == todo => {}
                _ => {
                    self.request_force_reseed();
                    return Err(EsdmError::Fault);
                }
            }

            self.requests_since_fully_seeded.fetch_add(1, Ordering::Relaxed);
            generated += todo;
        }

        Ok(generated)
    }
}
