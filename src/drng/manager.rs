/// DRNG manager: the per-node pool of instances plus the atomic-fallback
/// DRNG.
///
/// The manager owns every instance. Slot 0 of the per-node array holds
/// the initial DRNG, which always exists once `initialise` succeeded;
/// higher slots are populated lazily when the seeder first walks the
/// online nodes. Consumers borrow the array read-only through
/// `get_instances` (dropping the guard is the paired put).
use super::instance::DrngInstance;
use crate::config::Config;
use crate::crypto::{DrngCb, HashCb, HmacDrbgCb, Sha512Hash};
use crate::state::SeedStateMachine;
use crate::{EsdmError, EsdmResult, INIT_ENTROPY_BITS, RESEED_MAX_SECS};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

pub struct DrngManager {
    init: Mutex<Option<Arc<DrngInstance>>>,
    instances: RwLock<Vec<Option<Arc<DrngInstance>>>>,
    atomic: Mutex<Option<Arc<DrngInstance>>>,
    pool_lock: Mutex<()>,
    avail: AtomicBool,
    seed_threshold: AtomicU32,
    all_nodes_seeded: AtomicBool,
    drng_cb: Arc<dyn DrngCb>,
    hash_cb: Arc<dyn HashCb>,
}

impl DrngManager {
    pub fn new(drng_cb: Arc<dyn DrngCb>, hash_cb: Arc<dyn HashCb>) -> Self {
        Self {
            init: Mutex::new(None),
            instances: RwLock::new(Vec::new()),
            atomic: Mutex::new(None),
            pool_lock: Mutex::new(()),
            avail: AtomicBool::new(false),
            seed_threshold: AtomicU32::new(INIT_ENTROPY_BITS),
            all_nodes_seeded: AtomicBool::new(false),
            drng_cb,
            hash_cb,
        }
    }

    pub fn with_default_callbacks() -> Self {
        Self::new(Arc::new(HmacDrbgCb), Arc::new(Sha512Hash))
    }

    pub fn avail(&self) -> bool {
        self.avail.load(Ordering::Acquire)
    }

    /// Idempotent bring-up: allocate the initial and atomic-fallback
    /// DRNGs, mark the manager available, then run the primitive
    /// selftests. A selftest failure is fatal and leaves the manager
    /// unavailable.
    pub fn initialise(&self) -> EsdmResult<()> {
        let mut init = self.init.lock().unwrap();
        if init.is_some() && self.avail() {
            return Ok(());
        }

        if init.is_none() {
            let inst = Arc::new(DrngInstance::new(
                "init",
                Some(0),
                &self.drng_cb,
                Arc::clone(&self.hash_cb),
            )?);
            {
                let mut instances = self.instances.write().unwrap();
                if instances.is_empty() {
                    instances.push(Some(Arc::clone(&inst)));
                } else {
                    instances[0] = Some(Arc::clone(&inst));
                }
            }
            *init = Some(inst);
        }

        {
            let mut atomic = self.atomic.lock().unwrap();
            if atomic.is_none() {
                *atomic = Some(Arc::new(DrngInstance::new(
                    "atomic",
                    None,
                    &self.drng_cb,
                    Arc::clone(&self.hash_cb),
                )?));
            }
        }

        self.avail.store(true, Ordering::Release);

        if let Err(e) = self
            .hash_cb
            .selftest()
            .and_then(|()| self.drng_cb.selftest())
        {
            self.avail.store(false, Ordering::Release);
            tracing::error!(error = %e, "primitive selftest failed, manager unavailable");
            return Err(EsdmError::Fatal(format!("selftest failed: {e}")));
        }

        tracing::info!(
            drng = self.drng_cb.name(),
            hash = self.hash_cb.name(),
            "DRNG manager initialised"
        );
        Ok(())
    }

    pub fn init_instance(&self) -> EsdmResult<Arc<DrngInstance>> {
        self.init
            .lock()
            .unwrap()
            .as_ref()
            .map(Arc::clone)
            .ok_or(EsdmError::NotAvailable)
    }

    pub fn atomic_instance(&self) -> EsdmResult<Arc<DrngInstance>> {
        self.atomic
            .lock()
            .unwrap()
            .as_ref()
            .map(Arc::clone)
            .ok_or(EsdmError::NotAvailable)
    }

    /// Instance serving the calling thread's node. Falls back to the
    /// initial DRNG while the per-node instance is absent or not yet
    /// fully seeded.
    pub fn node_instance(&self, config: &Config) -> EsdmResult<Arc<DrngInstance>> {
        let node = config.curr_node() as usize;
        {
            let instances = self.instances.read().unwrap();
            if let Some(Some(inst)) = instances.get(node) {
                if inst.fully_seeded() {
                    return Ok(Arc::clone(inst));
                }
            }
        }
        self.init_instance()
    }

    /// Read-borrow of the per-node array; dropping the guard returns the
    /// borrow.
    pub fn get_instances(&self) -> RwLockReadGuard<'_, Vec<Option<Arc<DrngInstance>>>> {
        self.instances.read().unwrap()
    }

    /// Lazily populate one instance per online node. Slot 0 stays the
    /// initial DRNG.
    pub fn ensure_node_instances(&self, config: &Config) -> EsdmResult<()> {
        let nodes = config.online_nodes() as usize;
        let mut instances = self.instances.write().unwrap();
        if instances.len() < nodes {
            instances.resize_with(nodes, || None);
        }
        for (node, slot) in instances.iter_mut().enumerate().take(nodes) {
            if slot.is_none() {
                match DrngInstance::new(
                    format!("node{node}"),
                    Some(node as u32),
                    &self.drng_cb,
                    Arc::clone(&self.hash_cb),
                ) {
                    Ok(inst) => {
                        tracing::debug!(node, "per-node DRNG allocated");
                        *slot = Some(Arc::new(inst));
                    }
                    Err(e) => {
                        // Per-node DRNGs are optional; the init DRNG covers
                        tracing::warn!(node, error = %e, "per-node DRNG allocation failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Non-blocking claim of the global seeding interlock.
    pub fn pool_try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.pool_lock.try_lock().ok()
    }

    pub fn seed_threshold(&self) -> u32 {
        self.seed_threshold.load(Ordering::Relaxed)
    }

    pub fn raise_seed_threshold(&self, bits: u32) {
        self.seed_threshold.fetch_max(bits, Ordering::Relaxed);
    }

    pub fn all_nodes_seeded(&self) -> bool {
        self.all_nodes_seeded.load(Ordering::Relaxed)
    }

    pub fn mark_all_nodes_seeded(&self, state: &SeedStateMachine) {
        if !self.all_nodes_seeded.swap(true, Ordering::Relaxed) {
            tracing::info!("all per-node DRNGs fully seeded");
            state.broadcast_wakeup();
        }
    }

    fn walk_instances(&self) -> Vec<Arc<DrngInstance>> {
        let mut all = Vec::new();
        if let Ok(init) = self.init_instance() {
            all.push(init);
        }
        for inst in self.instances.read().unwrap().iter().flatten() {
            // Slot 0 aliases the init instance
            if !all.iter().any(|a| Arc::ptr_eq(a, inst)) {
                all.push(Arc::clone(inst));
            }
        }
        if let Ok(atomic) = self.atomic_instance() {
            all.push(atomic);
        }
        all
    }

    /// Reset every instance, the entropy threshold, and the state
    /// machine.
    pub fn reset(&self, state: &SeedStateMachine) {
        for inst in self.walk_instances() {
            inst.reset();
        }
        self.seed_threshold
            .store(INIT_ENTROPY_BITS, Ordering::Relaxed);
        self.all_nodes_seeded.store(false, Ordering::Relaxed);
        state.reset();
        tracing::info!("DRNG manager reset");
    }

    /// Operator-requested reseed. When the initial DRNG has already used
    /// up its generate budget it will reseed on its next use anyway, so
    /// only it is flagged; otherwise every per-node DRNG and the atomic
    /// DRNG are flagged.
    pub fn force_reseed(&self) {
        if let Ok(init) = self.init_instance() {
            if init.requests_exhausted() {
                init.request_force_reseed();
                return;
            }
        }
        for inst in self.instances.read().unwrap().iter().flatten() {
            inst.request_force_reseed();
        }
        if let Ok(atomic) = self.atomic_instance() {
            atomic.request_force_reseed();
        }
    }

    /// Seconds after which an unused DRNG is reseeded; published over
    /// RPC.
    pub fn min_reseed_secs(&self) -> u64 {
        RESEED_MAX_SECS
    }

    /// Drop all DRBG state. The manager is unusable afterwards.
    pub fn finalize(&self) {
        self.avail.store(false, Ordering::Release);
        self.instances.write().unwrap().clear();
        *self.init.lock().unwrap() = None;
        *self.atomic.lock().unwrap() = None;
        tracing::info!("DRNG manager finalised");
    }

    pub fn status_report(&self) -> String {
        let mut out = String::new();
        for inst in self.walk_instances() {
            out.push_str(&format!(
                "DRNG {}: fully seeded {}, requests left {}, since full seed {}\n",
                inst.name(),
                inst.fully_seeded(),
                inst.requests().max(0),
                inst.requests_since_fully_seeded(),
            ));
        }
        out.push_str(&format!("All nodes seeded: {}\n", self.all_nodes_seeded()));
        out
    }
}
