/// Seed-buffer composition.
///
/// One `SeedBuffer` lives for the duration of a single seeding operation:
/// every entropy source deposits a conditioned payload and its credited
/// bits into its own slot, the seeder flattens the payloads into the DRBG
/// seed material, and the whole thing is wiped on drop.
use crate::accounting;
use zeroize::{Zeroize, Zeroizing};

/// Payload capacity per source, sized for the conditioning digest.
pub const SEED_SLOT_BYTES: usize = 64;

pub struct SeedSlot {
    data: [u8; SEED_SLOT_BYTES],
    len: usize,
    bits: u32,
    source: &'static str,
}

impl SeedSlot {
    fn empty(source: &'static str) -> Self {
        Self {
            data: [0u8; SEED_SLOT_BYTES],
            len: 0,
            bits: 0,
            source,
        }
    }

    /// Deposit a conditioned payload. Longer payloads are truncated to the
    /// slot capacity; the claimed bits are capped by the accountant.
    pub fn fill(&mut self, payload: &[u8], bits: u32) {
        let take = payload.len().min(SEED_SLOT_BYTES);
        self.data[..take].copy_from_slice(&payload[..take]);
        self.len = take;
        self.bits = accounting::cap_contribution(bits);
    }

    /// Adjust the credited bits after accounting (oversampling deduction).
    pub fn set_bits(&mut self, bits: u32) {
        self.bits = accounting::cap_contribution(bits);
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn wipe(&mut self) {
        self.data.zeroize();
        self.len = 0;
        self.bits = 0;
    }
}

pub struct SeedBuffer {
    slots: Vec<SeedSlot>,
}

impl SeedBuffer {
    pub fn for_sources(names: &[&'static str]) -> Self {
        Self {
            slots: names.iter().map(|n| SeedSlot::empty(n)).collect(),
        }
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut SeedSlot {
        &mut self.slots[idx]
    }

    pub fn slots(&self) -> &[SeedSlot] {
        &self.slots
    }

    /// Total credited entropy across all slots.
    pub fn credited_bits(&self) -> u32 {
        self.slots.iter().map(|s| s.bits).sum()
    }

    /// Concatenated payloads forming the DRBG seed material. The returned
    /// buffer wipes itself on drop.
    pub fn flatten(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.slots.len() * SEED_SLOT_BYTES));
        for slot in &self.slots {
            out.extend_from_slice(slot.payload());
        }
        out
    }

    pub fn wipe(&mut self) {
        for slot in &mut self.slots {
            slot.wipe();
        }
    }
}

impl Drop for SeedBuffer {
    fn drop(&mut self) {
        self.wipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SECURITY_STRENGTH_BITS;

    #[test]
    fn test_fill_truncates_and_caps() {
        let mut buf = SeedBuffer::for_sources(&["a"]);
        let payload = vec![0xAB; 100];
        buf.slot_mut(0).fill(&payload, 4096);
        assert_eq!(buf.slots()[0].payload().len(), SEED_SLOT_BYTES);
        assert_eq!(buf.slots()[0].bits(), SECURITY_STRENGTH_BITS);
    }

    #[test]
    fn test_credited_bits_sums_slots() {
        let mut buf = SeedBuffer::for_sources(&["a", "b", "c"]);
        buf.slot_mut(0).fill(&[1; 64], 64);
        buf.slot_mut(1).fill(&[2; 64], 128);
        buf.slot_mut(2).fill(&[3; 32], 8);
        assert_eq!(buf.credited_bits(), 200);
    }

    #[test]
    fn test_flatten_concatenates_payloads() {
        let mut buf = SeedBuffer::for_sources(&["a", "b"]);
        buf.slot_mut(0).fill(&[0x11; 64], 0);
        buf.slot_mut(1).fill(&[0x22; 16], 0);
        let flat = buf.flatten();
        assert_eq!(flat.len(), 80);
        assert_eq!(&flat[..64], &[0x11; 64][..]);
        assert_eq!(&flat[64..], &[0x22; 16][..]);
    }

    #[test]
    fn test_wipe_zeroises_every_slot() {
        let mut buf = SeedBuffer::for_sources(&["a", "b"]);
        buf.slot_mut(0).fill(&[0xFF; 64], 256);
        buf.slot_mut(1).fill(&[0xEE; 64], 128);
        buf.wipe();
        for slot in buf.slots() {
            assert!(slot.payload().is_empty());
            assert_eq!(slot.bits(), 0);
        }
        assert_eq!(buf.credited_bits(), 0);
    }
}
