use anyhow::{Context, Result};
use clap::Parser;
use esdm::config::{Config, ForceFips};
use esdm::drng::seeder;
use esdm::rpc::{self, RpcService, StatusPublisher};
use esdm::state::SeedState;
use esdm::{EsdmContext, EsdmError};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Conventional exit code telling test harnesses to skip: the daemon must
/// run as root outside test mode.
const EXIT_NEEDS_ROOT: i32 = 77;

#[derive(Parser)]
#[command(name = "esdm-server")]
#[command(about = "User-space entropy source and DRNG manager daemon")]
#[command(version)]
struct Cli {
    /// Use the -testmode socket, shared memory, and semaphore names
    #[arg(long)]
    test_mode: bool,

    /// Worker threads for the unprivileged RPC service
    #[arg(long, default_value_t = 4)]
    unpriv_threads: usize,

    /// Override the unprivileged socket path
    #[arg(long)]
    unpriv_socket: Option<PathBuf>,

    /// Override the privileged socket path
    #[arg(long)]
    priv_socket: Option<PathBuf>,

    /// Force FIPS mode on or off, overriding the environment
    #[arg(long, value_enum)]
    force_fips: Option<FipsArg>,

    /// Cap on per-node DRNG instances
    #[arg(long)]
    max_nodes: Option<u32>,

    /// CPU hardware RNG entropy rate in bits
    #[arg(long)]
    cpu_rate: Option<u32>,

    /// Jitter RNG entropy rate in bits
    #[arg(long)]
    jitter_rate: Option<u32>,

    /// Kernel RNG entropy rate in bits
    #[arg(long)]
    krng_rate: Option<u32>,

    /// Scheduler entropy rate in bits
    #[arg(long)]
    sched_rate: Option<u32>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FipsArg {
    Enabled,
    Disabled,
}

/// How often the seeder thread re-checks reseed deadlines when idle.
const SEEDER_NAP: Duration = Duration::from_secs(60);

fn build_config(cli: &Cli) -> Config {
    let config = Config::default();
    if let Some(fips) = cli.force_fips {
        config.set_force_fips(match fips {
            FipsArg::Enabled => ForceFips::Enabled,
            FipsArg::Disabled => ForceFips::Disabled,
        });
    }
    if let Some(nodes) = cli.max_nodes {
        config.set_max_nodes(nodes);
    }
    if let Some(rate) = cli.cpu_rate {
        config.set_cpu_entropy_rate(rate);
    }
    if let Some(rate) = cli.jitter_rate {
        config.set_jitter_entropy_rate(rate);
    }
    if let Some(rate) = cli.krng_rate {
        config.set_krng_entropy_rate(rate);
    }
    if let Some(rate) = cli.sched_rate {
        config.set_sched_entropy_rate(rate);
    }
    // Setter side effects are meaningless before the daemon runs
    config.take_entropy_event();
    config
}

fn seeder_thread(ctx: Arc<EsdmContext>) {
    while !ctx.is_shutdown() {
        if let Err(e) = seeder::seed_work(&ctx) {
            tracing::warn!(error = %e, "seeding pass failed");
        }
        seeder::reseed_overdue(&ctx);
        ctx.wait_seeder(SEEDER_NAP);
    }
    tracing::debug!("seeder thread released");
}

fn run(cli: Cli) -> Result<i32> {
    let (default_unpriv, default_priv) = rpc::socket_paths(cli.test_mode);
    let unpriv_path = cli.unpriv_socket.clone().unwrap_or(default_unpriv);
    let priv_path = cli.priv_socket.clone().unwrap_or(default_priv);

    if !cli.test_mode && !nix::unistd::geteuid().is_root() {
        eprintln!("esdm-server: must run as root (use --test-mode for unprivileged runs)");
        return Ok(EXIT_NEEDS_ROOT);
    }

    let ctx = EsdmContext::new(build_config(&cli));

    // A selftest failure keeps the daemon alive but unavailable: only the
    // status call keeps answering
    if let Err(e) = ctx.initialise() {
        tracing::error!(error = %e, "core initialisation failed, serving status only");
    }

    let publisher = Arc::new(
        StatusPublisher::create(cli.test_mode, cli.unpriv_threads as u32)
            .context("status shared memory setup failed")?,
    );
    publisher.publish(&ctx.status_report(), false, true);
    {
        let publisher = Arc::clone(&publisher);
        let weak = Arc::downgrade(&ctx);
        ctx.state.register_observer(Box::new(move |state| {
            if let Some(ctx) = weak.upgrade() {
                publisher.publish(
                    &ctx.status_report(),
                    state >= SeedState::Operational,
                    state < SeedState::FullySeeded,
                );
            }
        }));
    }

    let unpriv = RpcService::spawn_unpriv(&ctx, &unpriv_path, cli.unpriv_threads)
        .context("unprivileged RPC service failed to start")?;
    let priv_service = match RpcService::spawn_priv(&ctx, &priv_path, cli.test_mode) {
        Ok(service) => service,
        Err(EsdmError::Io(e))
            if e.kind() == ErrorKind::PermissionDenied && !cli.test_mode =>
        {
            eprintln!("esdm-server: privileged socket requires root: {e}");
            return Ok(EXIT_NEEDS_ROOT);
        }
        Err(e) => return Err(e).context("privileged RPC service failed to start"),
    };

    let seeder_handle = {
        let ctx = Arc::clone(&ctx);
        thread::Builder::new()
            .name("esdm-seeder".into())
            .spawn(move || seeder_thread(ctx))
            .context("seeder thread failed to start")?
    };

    let mut signals =
        signal_hook::iterator::Signals::new([libc::SIGTERM, libc::SIGINT])
            .context("signal handler setup failed")?;
    {
        // Weak references: the signal thread outlives the shutdown path
        // and must not keep the SHM segment alive
        let ctx = Arc::downgrade(&ctx);
        let publisher = Arc::downgrade(&publisher);
        thread::Builder::new()
            .name("esdm-signals".into())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    tracing::info!(signal = sig, "termination signal received");
                    if let Some(ctx) = ctx.upgrade() {
                        ctx.trigger_shutdown();
                        // Unblock clients parked on the change semaphore
                        if let Some(publisher) = publisher.upgrade() {
                            publisher.publish(&ctx.status_report(), false, true);
                        }
                    }
                }
            })
            .context("signal thread failed to start")?;
    }

    tracing::info!(
        unpriv = %unpriv_path.display(),
        privileged = %priv_path.display(),
        test_mode = cli.test_mode,
        "esdm-server up"
    );

    while !ctx.is_shutdown() {
        thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("shutting down");
    unpriv.join();
    priv_service.join();
    let _ = seeder_handle.join();
    ctx.manager.finalize();
    drop(publisher); // detaches and unlinks SHM + semaphore

    Ok(0)
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "esdm-server failed");
            std::process::exit(1);
        }
    }
}
