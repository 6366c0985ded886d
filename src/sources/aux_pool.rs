/// Auxiliary entropy pool.
///
/// The write-back target for user-supplied entropy: `write_data` mixes
/// material without credit, `rnd_add_entropy` mixes with an operator
/// credit, and the entropy-count management RPCs adjust the tracked
/// counter directly. Polls drain the counter; the pool contents are only
/// ever exposed through the conditioning hash.
use super::EntropySource;
use crate::accounting;
use crate::config::Config;
use crate::crypto::HashCb;
use crate::drng::seed_buffer::SeedSlot;
use crate::SECURITY_STRENGTH_BITS;
use std::sync::Mutex;
use zeroize::Zeroize;

/// Pool size in bytes; larger than any single digest so that repeated
/// insertions keep folding over older material.
const AUX_POOL_BYTES: usize = 512;

struct AuxInner {
    pool: [u8; AUX_POOL_BYTES],
    pos: usize,
    entropy_bits: u32,
    extract_counter: u64,
}

impl AuxInner {
    fn mix(&mut self, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            let idx = (self.pos + i) % AUX_POOL_BYTES;
            self.pool[idx] ^= byte;
        }
        self.pos = (self.pos + data.len()) % AUX_POOL_BYTES;
    }
}

impl Drop for AuxInner {
    fn drop(&mut self) {
        self.pool.zeroize();
        self.entropy_bits = 0;
    }
}

pub struct AuxPool {
    inner: Mutex<AuxInner>,
}

impl AuxPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AuxInner {
                pool: [0u8; AUX_POOL_BYTES],
                pos: 0,
                entropy_bits: 0,
                extract_counter: 0,
            }),
        }
    }

    /// Mix `data` into the pool crediting `bits` of entropy. Under FIPS
    /// oversampling the credit is reduced by the oversampling margin
    /// before it counts. Returns the bits actually credited.
    pub fn insert(&self, data: &[u8], bits: u32, config: &Config) -> u32 {
        // Never credit more than the data itself can carry
        let capped = bits.min((data.len() as u32).saturating_mul(8));
        let credited = accounting::cap_contribution(accounting::apply_osr(capped, config));

        let mut inner = self.inner.lock().unwrap();
        inner.mix(data);
        inner.entropy_bits =
            accounting::cap_contribution(inner.entropy_bits.saturating_add(credited));
        tracing::debug!(
            bytes = data.len(),
            credited,
            pool_bits = inner.entropy_bits,
            "aux pool insert"
        );
        credited
    }

    /// Raise the tracked entropy count without new material
    /// (`RNDADDTOENTCNT`).
    pub fn add_to_entropy_cnt(&self, delta_bits: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.entropy_bits =
            accounting::cap_contribution(inner.entropy_bits.saturating_add(delta_bits));
    }

    /// Zap the entropy count (`RNDCLEARPOOL` / `RNDZAPENTCNT`). The pool
    /// contents stay mixed; only the credit is dropped.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entropy_bits = 0;
        tracing::info!("aux pool entropy count cleared");
    }

    pub fn entropy_cnt(&self) -> u32 {
        self.inner.lock().unwrap().entropy_bits
    }
}

impl Default for AuxPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for AuxPool {
    fn name(&self) -> &'static str {
        "AuxPool"
    }

    fn available(&self) -> bool {
        true
    }

    /// The pool's "rate" is its current fill level.
    fn rate_bits(&self, _config: &Config) -> u32 {
        self.entropy_cnt()
    }

    fn poll(
        &self,
        requested_bits: u32,
        _config: &Config,
        slot: &mut SeedSlot,
        hash: &dyn HashCb,
    ) -> u32 {
        let mut inner = self.inner.lock().unwrap();

        // Extraction: digest over pool state and a counter, folded back in
        inner.extract_counter = inner.extract_counter.wrapping_add(1);
        let mut msg = Vec::with_capacity(AUX_POOL_BYTES + 16);
        msg.extend_from_slice(&inner.pool);
        msg.extend_from_slice(&inner.pos.to_le_bytes());
        msg.extend_from_slice(&inner.extract_counter.to_le_bytes());
        let digest = hash.hash(&msg);
        msg.zeroize();
        inner.mix(&digest);

        let claimed = inner
            .entropy_bits
            .min(requested_bits)
            .min(SECURITY_STRENGTH_BITS);
        inner.entropy_bits -= claimed;

        slot.fill(&digest, claimed);
        slot.bits()
    }

    fn fully_seeded(&self, bits: u32, _config: &Config) -> bool {
        bits >= SECURITY_STRENGTH_BITS
    }

    fn osr_applied_on_insert(&self) -> bool {
        true
    }
}
