/// Entropy accounting.
///
/// Converts operator-declared source rates into per-poll request targets
/// and credited totals. In FIPS mode every source is oversampled: the
/// request target grows by a fixed margin and the same margin is deducted
/// from the claimed bits before they count towards any threshold.
use crate::config::Config;
use crate::{
    INIT_ENTROPY_BITS, MIN_SEED_ENTROPY_BITS, OVERSAMPLE_ES_BITS, SECURITY_STRENGTH_BITS,
    SEED_INIT_ADD_BITS,
};

/// Per-source oversampling margin currently in force.
pub fn oversample_bits(config: &Config) -> u32 {
    if config.oversampling_enabled() {
        OVERSAMPLE_ES_BITS
    } else {
        0
    }
}

/// Bits to request from each source for one seeding round. Initial
/// seeding (DRNG not yet fully seeded) targets more material.
pub fn requested_bits(fully_seeded: bool, config: &Config) -> u32 {
    let mut bits = SECURITY_STRENGTH_BITS;
    if !fully_seeded {
        bits += SEED_INIT_ADD_BITS;
    }
    bits + oversample_bits(config)
}

/// Deduct the oversampling margin from a source's claimed bits.
pub fn apply_osr(claimed: u32, config: &Config) -> u32 {
    claimed.saturating_sub(oversample_bits(config))
}

/// No single source may claim more than the security strength.
pub fn cap_contribution(bits: u32) -> u32 {
    bits.min(SECURITY_STRENGTH_BITS)
}

pub fn is_min_seed(credited_bits: u32) -> bool {
    credited_bits >= MIN_SEED_ENTROPY_BITS
}

pub fn is_full_seed(credited_bits: u32) -> bool {
    credited_bits >= SECURITY_STRENGTH_BITS
}

/// Seed-threshold ladder walked during initial seeding: 32 → 128 → 256
/// credited bits. `None` once the top is reached.
pub fn next_threshold(current: u32) -> Option<u32> {
    if current < INIT_ENTROPY_BITS {
        Some(INIT_ENTROPY_BITS)
    } else if current < MIN_SEED_ENTROPY_BITS {
        Some(MIN_SEED_ENTROPY_BITS)
    } else if current < SECURITY_STRENGTH_BITS {
        Some(SECURITY_STRENGTH_BITS)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForceFips;
    use proptest::prelude::*;

    fn fips_config(on: bool) -> Config {
        let config = Config::default();
        config.set_force_fips(if on { ForceFips::Enabled } else { ForceFips::Disabled });
        config
    }

    #[test]
    fn test_request_targets() {
        let config = fips_config(false);
        assert_eq!(requested_bits(true, &config), SECURITY_STRENGTH_BITS);
        assert_eq!(
            requested_bits(false, &config),
            SECURITY_STRENGTH_BITS + SEED_INIT_ADD_BITS
        );

        let config = fips_config(true);
        assert_eq!(
            requested_bits(true, &config),
            SECURITY_STRENGTH_BITS + OVERSAMPLE_ES_BITS
        );
    }

    #[test]
    fn test_osr_deduction() {
        let config = fips_config(true);
        assert_eq!(apply_osr(64, &config), 0);
        assert_eq!(apply_osr(256, &config), 192);
        assert_eq!(apply_osr(10, &config), 0);

        let config = fips_config(false);
        assert_eq!(apply_osr(64, &config), 64);
    }

    #[test]
    fn test_threshold_ladder() {
        assert_eq!(next_threshold(0), Some(INIT_ENTROPY_BITS));
        assert_eq!(next_threshold(INIT_ENTROPY_BITS), Some(MIN_SEED_ENTROPY_BITS));
        assert_eq!(
            next_threshold(MIN_SEED_ENTROPY_BITS),
            Some(SECURITY_STRENGTH_BITS)
        );
        assert_eq!(next_threshold(SECURITY_STRENGTH_BITS), None);
    }

    proptest! {
        /// The per-source cap never exceeds the security strength and
        /// never increases a claim.
        #[test]
        fn prop_cap_contribution(bits in 0u32..=4096) {
            let capped = cap_contribution(bits);
            prop_assert!(capped <= SECURITY_STRENGTH_BITS);
            prop_assert!(capped <= bits);
        }

        /// OSR deduction is monotone and bounded by the claim.
        #[test]
        fn prop_apply_osr(bits in 0u32..=4096) {
            let config = fips_config(true);
            let credited = apply_osr(bits, &config);
            prop_assert!(credited <= bits);
            prop_assert!(bits - credited <= OVERSAMPLE_ES_BITS);
        }
    }
}
