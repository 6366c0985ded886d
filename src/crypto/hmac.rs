/// Minimal HMAC-SHA-512 helper (self-contained to avoid hmac crate version
/// conflicts).
use sha2::{Digest, Sha512};

const BLOCK_SIZE: usize = 128;

pub fn hmac_sha512(key: &[u8], data: &[&[u8]]) -> [u8; 64] {
    // K0 = (key > blocksize) ? SHA512(key) : key ; then pad to BLOCK_SIZE
    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let mut h = Sha512::new();
        h.update(key);
        key_block[..64].copy_from_slice(&h.finalize());
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    // ipad / opad
    let mut ipad = [0x36u8; BLOCK_SIZE];
    let mut opad = [0x5cu8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] ^= key_block[i];
        opad[i] ^= key_block[i];
    }

    // inner = SHA512(ipad || data...)
    let mut inner = Sha512::new();
    inner.update(ipad);
    for part in data {
        inner.update(part);
    }
    let inner_res = inner.finalize();

    // outer = SHA512(opad || inner)
    let mut outer = Sha512::new();
    outer.update(opad);
    outer.update(inner_res);
    let out = outer.finalize();

    let mut ret = [0u8; 64];
    ret.copy_from_slice(&out);
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_is_deterministic() {
        let a = hmac_sha512(b"key", &[&b"message"[..]]);
        let b = hmac_sha512(b"key", &[&b"message"[..]]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hmac_key_separates() {
        let a = hmac_sha512(b"key-one", &[&b"message"[..]]);
        let b = hmac_sha512(b"key-two", &[&b"message"[..]]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hmac_multipart_matches_concat() {
        let joined = hmac_sha512(b"key", &[&b"hello world"[..]]);
        let split = hmac_sha512(b"key", &[&b"hello"[..], &b" "[..], &b"world"[..]]);
        assert_eq!(joined, split);
    }

    #[test]
    fn test_hmac_long_key_is_hashed() {
        let long_key = [0xABu8; 200];
        let a = hmac_sha512(&long_key, &[&b"message"[..]]);
        // Equivalent short key: SHA-512 of the long key
        let hashed = {
            use sha2::{Digest, Sha512};
            let mut h = Sha512::new();
            h.update(long_key);
            h.finalize()
        };
        let b = hmac_sha512(&hashed, &[&b"message"[..]]);
        assert_eq!(a, b);
    }
}
