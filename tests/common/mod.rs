/// Shared harness for the integration tests: an in-process daemon with
/// its sockets in a per-test temporary directory, torn down on drop.
use esdm::config::{Config, ForceFips};
use esdm::drng::seeder;
use esdm::rpc::{EsdmClient, EsdmPrivClient, RpcService};
use esdm::EsdmContext;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestDaemon {
    pub ctx: Arc<EsdmContext>,
    pub unpriv_path: PathBuf,
    pub priv_path: PathBuf,
    unpriv: Option<RpcService>,
    privileged: Option<RpcService>,
    _dir: TempDir,
}

#[allow(dead_code)] // not every test binary uses every helper
impl TestDaemon {
    /// Daemon with default rates (kernel RNG trusted for full strength)
    /// and FIPS pinned off for hermetic behavior.
    pub fn start() -> Self {
        Self::start_with_config(|_| {})
    }

    pub fn start_with_config(tweak: impl FnOnce(&Config)) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let unpriv_path = dir.path().join("esdm-rpc-unpriv");
        let priv_path = dir.path().join("esdm-rpc-priv");

        let config = Config::default();
        config.set_force_fips(ForceFips::Disabled);
        tweak(&config);

        let ctx = EsdmContext::new(config);
        ctx.initialise().expect("core initialisation");

        let unpriv =
            RpcService::spawn_unpriv(&ctx, &unpriv_path, 4).expect("unpriv service");
        // Test mode: the daemon's own uid counts as privileged
        let privileged =
            RpcService::spawn_priv(&ctx, &priv_path, true).expect("priv service");

        Self {
            ctx,
            unpriv_path,
            priv_path,
            unpriv: Some(unpriv),
            privileged: Some(privileged),
            _dir: dir,
        }
    }

    /// Run one synchronous seeding pass, as the seeder thread would.
    pub fn seed_once(&self) {
        seeder::seed_work(&self.ctx).expect("seeding pass");
    }

    pub fn client(&self) -> EsdmClient {
        EsdmClient::connect(&self.unpriv_path).expect("client connect")
    }

    pub fn priv_client(&self) -> EsdmPrivClient {
        EsdmPrivClient::connect(&self.priv_path).expect("priv client connect")
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.ctx.trigger_shutdown();
        if let Some(service) = self.unpriv.take() {
            service.join();
        }
        if let Some(service) = self.privileged.take() {
            service.join();
        }
    }
}
