#[cfg(test)]
mod tests {
    use crate::config::{Config, ForceFips};
    use crate::drng::seeder;
    use crate::rpc::protocol::{PrivRequest, UnprivRequest};
    use crate::rpc::server::{dispatch_priv, dispatch_unpriv};
    use crate::EsdmContext;
    use std::sync::Arc;

    fn test_config(fips: bool) -> Config {
        let config = Config::default();
        config.set_force_fips(if fips {
            ForceFips::Enabled
        } else {
            ForceFips::Disabled
        });
        config
    }

    fn ready_context() -> Arc<EsdmContext> {
        let ctx = EsdmContext::new(test_config(false));
        ctx.initialise().unwrap();
        ctx
    }

    #[test]
    fn test_status_served_before_initialise() {
        let ctx = EsdmContext::new(test_config(false));
        let resp = dispatch_unpriv(&ctx, UnprivRequest::Status, 1);
        assert_eq!(resp.ret, 0);
        assert!(resp.text.unwrap().contains("ESDM server"));
    }

    #[test]
    fn test_everything_else_gated_before_initialise() {
        let ctx = EsdmContext::new(test_config(false));
        let resp = dispatch_unpriv(&ctx, UnprivRequest::GetRandomBytes { len: 16 }, 1);
        assert_eq!(resp.ret, -i64::from(libc::EOPNOTSUPP));
        let resp = dispatch_priv(&ctx, PrivRequest::RndClearPool, 2, true);
        assert_eq!(resp.ret, -i64::from(libc::EOPNOTSUPP));
    }

    #[test]
    fn test_get_random_bytes_immediate() {
        let ctx = ready_context();
        let resp = dispatch_unpriv(&ctx, UnprivRequest::GetRandomBytes { len: 64 }, 7);
        assert_eq!(resp.id, 7);
        assert_eq!(resp.ret, 64);
        assert_eq!(resp.data.len(), 64);
    }

    #[test]
    fn test_get_random_bytes_rejects_oversize() {
        let ctx = ready_context();
        let resp = dispatch_unpriv(
            &ctx,
            UnprivRequest::GetRandomBytes {
                len: crate::RPC_MAX_MSG_LEN + 1,
            },
            1,
        );
        assert_eq!(resp.ret, -i64::from(libc::EINVAL));
    }

    #[test]
    fn test_full_nonblock_returns_eagain_until_operational() {
        let ctx = ready_context();
        let resp = dispatch_unpriv(
            &ctx,
            UnprivRequest::GetRandomBytesFull {
                len: 32,
                nonblock: true,
            },
            1,
        );
        assert_eq!(resp.ret, -i64::from(libc::EAGAIN));

        seeder::seed_work(&ctx).unwrap();
        let resp = dispatch_unpriv(
            &ctx,
            UnprivRequest::GetRandomBytesFull {
                len: 32,
                nonblock: true,
            },
            2,
        );
        assert_eq!(resp.ret, 32);
    }

    #[test]
    fn test_counters_and_levels() {
        let ctx = ready_context();
        let lvl = dispatch_unpriv(&ctx, UnprivRequest::GetEntLvl, 1);
        assert!(lvl.ret > 0, "default sources advertise entropy");

        let secs = dispatch_unpriv(&ctx, UnprivRequest::GetMinReseedSecs, 2);
        assert_eq!(secs.ret, crate::RESEED_MAX_SECS as i64);

        let cnt = dispatch_unpriv(&ctx, UnprivRequest::RndGetEntCnt, 3);
        assert_eq!(cnt.ret, 0, "aux pool starts uncredited");
    }

    #[test]
    fn test_write_data_mixes_without_credit() {
        let ctx = ready_context();
        let resp = dispatch_unpriv(
            &ctx,
            UnprivRequest::WriteData {
                data: vec![0xAA; 128],
            },
            1,
        );
        assert_eq!(resp.ret, 0);
        assert_eq!(ctx.sources.aux().entropy_cnt(), 0);
    }

    #[test]
    fn test_priv_requires_authorization() {
        let ctx = ready_context();
        let resp = dispatch_priv(&ctx, PrivRequest::RndClearPool, 1, false);
        assert_eq!(resp.ret, -i64::from(libc::EPERM));
        // No state change happened
        assert_eq!(ctx.sources.aux().entropy_cnt(), 0);
    }

    #[test]
    fn test_add_entropy_credits_without_fips() {
        let ctx = ready_context();
        let resp = dispatch_priv(
            &ctx,
            PrivRequest::RndAddEntropy {
                data: vec![0x00; 64],
                ent_bits: 64,
            },
            1,
            true,
        );
        assert_eq!(resp.ret, 0);
        assert_eq!(ctx.sources.aux().entropy_cnt(), 64);
    }

    #[test]
    fn test_add_entropy_credits_nothing_under_fips() {
        let ctx = EsdmContext::new(test_config(true));
        ctx.initialise().unwrap();
        let resp = dispatch_priv(
            &ctx,
            PrivRequest::RndAddEntropy {
                data: vec![0x00; 64],
                ent_bits: 64,
            },
            1,
            true,
        );
        assert_eq!(resp.ret, 0);
        assert_eq!(ctx.sources.aux().entropy_cnt(), 0);
    }

    #[test]
    fn test_add_entropy_rejects_overclaim() {
        let ctx = ready_context();
        let resp = dispatch_priv(
            &ctx,
            PrivRequest::RndAddEntropy {
                data: vec![0x00; 4],
                ent_bits: 64,
            },
            1,
            true,
        );
        assert_eq!(resp.ret, -i64::from(libc::EINVAL));
        assert_eq!(ctx.sources.aux().entropy_cnt(), 0);
    }

    #[test]
    fn test_add_to_ent_cnt_and_clear_pool() {
        let ctx = ready_context();
        let resp = dispatch_priv(&ctx, PrivRequest::RndAddToEntCnt { delta_bits: 80 }, 1, true);
        assert_eq!(resp.ret, 0);
        assert_eq!(ctx.sources.aux().entropy_cnt(), 80);

        let resp = dispatch_priv(&ctx, PrivRequest::RndClearPool, 2, true);
        assert_eq!(resp.ret, 0);
        assert_eq!(ctx.sources.aux().entropy_cnt(), 0);
    }

    #[test]
    fn test_reseed_crng_flags_instances() {
        let ctx = ready_context();
        seeder::seed_work(&ctx).unwrap();
        assert!(!ctx.manager.init_instance().unwrap().reseed_forced());

        let resp = dispatch_priv(&ctx, PrivRequest::RndReseedCrng, 1, true);
        assert_eq!(resp.ret, 0);
        assert!(ctx.manager.init_instance().unwrap().reseed_forced());
    }
}
