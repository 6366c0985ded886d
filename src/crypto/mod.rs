/// Pluggable cryptographic primitives.
///
/// The core never implements DRBG or hash algorithms inline; it talks to
/// them through the two descriptor traits below so that a deployment can
/// swap primitives (e.g. for a certified implementation) without touching
/// the manager. The crate ships one default of each: SHA-512 as the
/// conditioning hash and an HMAC-SHA-512 DRBG.
pub mod hmac;
pub mod hmac_drbg;

#[cfg(test)]
mod hmac_drbg_tests;

pub use hmac_drbg::{HmacDrbg, HmacDrbgCb};

use crate::{EsdmError, EsdmResult};
use sha2::{Digest, Sha512};

/// Conditioning hash descriptor.
pub trait HashCb: Send + Sync {
    /// Primitive name for logs and the status report.
    fn name(&self) -> &'static str;

    /// Digest size in bytes.
    fn digest_size(&self) -> usize;

    /// One-shot digest of `msg`.
    fn hash(&self, msg: &[u8]) -> Vec<u8>;

    /// Power-up known-answer test.
    fn selftest(&self) -> EsdmResult<()>;
}

/// DRBG descriptor. `alloc` hands out an owned, unseeded generator state;
/// the instance lock of the owning DRNG serialises all access to it.
pub trait DrngCb: Send + Sync {
    fn name(&self) -> &'static str;

    fn alloc(&self, sec_strength_bytes: usize) -> EsdmResult<Box<dyn DrngState>>;

    /// Power-up selftest of the primitive.
    fn selftest(&self) -> EsdmResult<()>;
}

/// Owned DRBG state.
pub trait DrngState: Send {
    /// (Re)seed with `seed`. A failed seed must leave the state no worse
    /// than before the call.
    fn seed(&mut self, seed: &[u8]) -> EsdmResult<()>;

    /// Fill `out` completely. Returns the number of bytes produced; a
    /// return shorter than `out.len()` is treated as a fault by the
    /// caller.
    fn generate(&mut self, out: &mut [u8]) -> EsdmResult<usize>;
}

/// Default conditioning hash: SHA-512.
pub struct Sha512Hash;

/// SHA-512 digest of the empty message, the power-up known answer.
const SHA512_EMPTY_KAT: [u8; 64] = [
    0xcf, 0x83, 0xe1, 0x35, 0x7e, 0xef, 0xb8, 0xbd, 0xf1, 0x54, 0x28, 0x50, 0xd6, 0x6d, 0x80,
    0x07, 0xd6, 0x20, 0xe4, 0x05, 0x0b, 0x57, 0x15, 0xdc, 0x83, 0xf4, 0xa9, 0x21, 0xd3, 0x6c,
    0xe9, 0xce, 0x47, 0xd0, 0xd1, 0x3c, 0x5d, 0x85, 0xf2, 0xb0, 0xff, 0x83, 0x18, 0xd2, 0x87,
    0x7e, 0xec, 0x2f, 0x63, 0xb9, 0x31, 0xbd, 0x47, 0x41, 0x7a, 0x81, 0xa5, 0x38, 0x32, 0x7a,
    0xf9, 0x27, 0xda, 0x3e,
];

impl HashCb for Sha512Hash {
    fn name(&self) -> &'static str {
        "SHA-512"
    }

    fn digest_size(&self) -> usize {
        64
    }

    fn hash(&self, msg: &[u8]) -> Vec<u8> {
        let mut hasher = Sha512::new();
        hasher.update(msg);
        hasher.finalize().to_vec()
    }

    fn selftest(&self) -> EsdmResult<()> {
        if self.hash(b"") == SHA512_EMPTY_KAT {
            Ok(())
        } else {
            Err(EsdmError::Fatal("SHA-512 known-answer test failed".into()))
        }
    }
}
