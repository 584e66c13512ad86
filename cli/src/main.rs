//! The `cerera` binary: flag parsing, the composition root, and the
//! shutdown protocol.
//!
//! Everything is constructed here and passed down — no component reaches
//! for a global.  On SIGTERM or ctrl-c the node stops the miner, tears
//! down the servers and closes the vault; a 30-second deadline bounds the
//! graceful path, after which the process exits with a failure code.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cerera_core::{Chain, Config, Gossip, Mempool, Miner, Registry, Validator, Vault};
use cerera_network::{seed_nodes_from_env, Mode, Network};
use cerera_rpc::FaucetGate;
use cerera_wallet::Keystore;

mod services;

use services::Services;

/// Bound on the graceful-shutdown path.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "cerera")]
#[command(about = "Cerera blockchain node", version)]
struct Cli {
    /// P2P listen port.
    #[arg(long, default_value_t = 30911)]
    p2p_port: u16,

    /// HTTP JSON-RPC port.
    #[arg(long, default_value_t = 8453)]
    http_port: u16,

    /// Connectivity mode: server, client or p2p.
    #[arg(long, default_value = "p2p")]
    mode: String,

    /// Explicit node key PEM; defaults to `<data-dir>/<name>.nodekey.pem`.
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Enable the miner at boot.
    #[arg(long)]
    mine: bool,

    /// Keep every store in memory; nothing touches disk.
    #[arg(long)]
    in_memory: bool,

    /// Data directory for the vault, config and node key.
    #[arg(long, default_value = ".cerera")]
    data_dir: PathBuf,

    /// Node name.
    #[arg(long, default_value = "cerera")]
    name: String,

    /// Chain id override.
    #[arg(long)]
    chain_id: Option<i64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("cerera: initialization failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr in memory-only mode, to the append-only `logfile`
/// in the data directory otherwise.
fn init_logging(cli: &Cli) {
    let mut builder = env_logger::Builder::from_default_env();
    if !cli.in_memory {
        let _ = std::fs::create_dir_all(&cli.data_dir);
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(cli.data_dir.join("logfile"))
        {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
    }
    let _ = builder.try_init();
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mode: Mode = cli.mode.parse()?;

    if !cli.in_memory {
        std::fs::create_dir_all(&cli.data_dir)?;
    }

    // config.json persists the effective configuration.
    let config_path = cli.data_dir.join("config.json");
    let mut config = if !cli.in_memory && config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    config.name = cli.name.clone();
    config.http_port = cli.http_port;
    config.p2p_port = cli.p2p_port;
    config.data_dir = if cli.in_memory {
        None
    } else {
        Some(cli.data_dir.clone())
    };
    if let Some(chain_id) = cli.chain_id {
        config.chain_id = chain_id;
    }
    if !cli.in_memory {
        config.save(&config_path)?;
    }

    // The node identity; unreadable key material is fatal.
    let keystore = match &cli.key_file {
        Some(path) => {
            let dir = path.parent().unwrap_or(&cli.data_dir);
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".nodekey.pem"))
                .ok_or("key file must be named <name>.nodekey.pem")?;
            Keystore::load_or_generate(dir, name)?
        }
        None => Keystore::load_or_generate(&cli.data_dir, &config.name)?,
    };
    log::info!("cerera: node address {}", keystore.address());

    // Composition root, leaves first.
    let vault = Arc::new(Vault::open(&config)?);
    let chain = Arc::new(Chain::new(&config));
    let mempool = Arc::new(Mempool::new(config.pool_max_size, config.min_gas.clone()));
    let validator = Arc::new(Validator::new(
        Arc::clone(&chain),
        Arc::clone(&vault),
        Arc::clone(&mempool),
        &config,
    ));
    let miner = Arc::new(Miner::new(
        Arc::clone(&chain),
        Arc::clone(&mempool),
        Arc::clone(&validator),
        keystore.address(),
        &config,
    ));
    let gossip = Arc::new(Gossip::new(
        Arc::clone(&chain),
        Arc::clone(&validator),
        Arc::clone(&mempool),
    ));
    mempool.register(miner.observer());
    mempool.register(gossip.tx_announcer());
    chain.register_observer(gossip.block_announcer());

    let registry = Arc::new(Registry::new());
    services::register_all(
        &registry,
        &Services {
            chain: Arc::clone(&chain),
            vault: Arc::clone(&vault),
            mempool: Arc::clone(&mempool),
            validator: Arc::clone(&validator),
            miner: Arc::clone(&miner),
            faucet_gate: Arc::new(FaucetGate::hourly()),
        },
    );

    let rpc_addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let rpc_handle = cerera_rpc::serve(rpc_addr, Arc::clone(&registry)).await?;

    let network = Network::start(
        mode,
        config.p2p_port,
        seed_nodes_from_env(),
        Arc::clone(&chain),
        Arc::clone(&gossip),
    )
    .await?;
    gossip.set_relay(network.relay());

    if cli.mine {
        miner.start()?;
    }

    // SIGTERM raises the flag; ctrl-c resolves the select directly.
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
    let term_watch = Arc::clone(&term);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("cerera: ctrl-c received, shutting down");
        }
        _ = async move {
            while !term_watch.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        } => {
            log::info!("cerera: SIGTERM received, shutting down");
        }
    }

    // Graceful teardown under the deadline: stop the miner, stop the
    // servers, then flush and close the vault.
    network.shutdown();
    let _ = rpc_handle.stop();
    let teardown = tokio::task::spawn_blocking(move || {
        miner.stop();
        vault.close()
    });
    match tokio::time::timeout(SHUTDOWN_DEADLINE, teardown).await {
        Ok(Ok(Ok(()))) => {
            log::info!("cerera: clean shutdown");
            Ok(ExitCode::SUCCESS)
        }
        Ok(Ok(Err(e))) => {
            log::error!("cerera: vault close failed: {e}");
            Ok(ExitCode::FAILURE)
        }
        Ok(Err(e)) => {
            log::error!("cerera: teardown task failed: {e}");
            Ok(ExitCode::FAILURE)
        }
        Err(_) => {
            log::error!("cerera: shutdown deadline exceeded");
            Ok(ExitCode::FAILURE)
        }
    }
}
