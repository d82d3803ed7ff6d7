//! Command-line interface for the wallet sync engine.

use std::error::Error;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Arg, ArgMatches, Command};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

use wallet_sync::progress::{
    calculate_days_behind, calculate_total_time_remaining, estimate_final_block_height, now_unix,
};
use wallet_sync::utils::{extract_date_or_time, format_utc_time};
use wallet_sync::{
    amount_atom, amount_coin, init_logging, normalize_address, BlockScanResponse, BlockScanner,
    Config, Network, NotificationHub, RescanController, RescanOutcome, ShutdownCoordinator,
    SpvSyncResponse, SyncError, SyncErrorCode, SyncLifecycleController, SyncResult, Transaction,
    TransactionListener,
};

type CliResult<T> = Result<T, Box<dyn Error>>;

fn network_arg() -> Arg {
    Arg::new("network")
        .short('n')
        .long("network")
        .value_name("NETWORK")
        .help("Network to use")
        .value_parser(["mainnet", "testnet", "simnet", "regtest"])
        .default_value("mainnet")
}

fn cli() -> Command {
    Command::new("wallet-sync")
        .version(wallet_sync::VERSION)
        .about("SPV wallet sync lifecycle tools")
        .subcommand_required(true)
        .subcommand(
            Command::new("estimate")
                .about("Project the chain tip and sync lag from the best known block")
                .arg(network_arg())
                .arg(
                    Arg::new("height")
                        .long("height")
                        .value_name("HEIGHT")
                        .help("Best known block height")
                        .value_parser(clap::value_parser!(i32))
                        .required(true),
                )
                .arg(
                    Arg::new("timestamp")
                        .long("timestamp")
                        .value_name("UNIX_SECONDS")
                        .help("Timestamp of the best known block")
                        .value_parser(clap::value_parser!(i64))
                        .required(true),
                )
                .arg(
                    Arg::new("seconds-remaining")
                        .long("seconds-remaining")
                        .value_name("SECONDS")
                        .help("Also render a remaining-time label")
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
        .subcommand(
            Command::new("normalize-address")
                .about("Apply the default peer port to an address")
                .arg(Arg::new("address").value_name("ADDRESS").required(true))
                .arg(network_arg())
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Default port, overriding the network's"),
                ),
        )
        .subcommand(
            Command::new("convert")
                .about("Convert between atoms and coins")
                .arg(
                    Arg::new("atoms")
                        .long("atoms")
                        .value_name("ATOMS")
                        .value_parser(clap::value_parser!(i64))
                        .conflicts_with("coins")
                        .required_unless_present("coins"),
                )
                .arg(
                    Arg::new("coins")
                        .long("coins")
                        .value_name("COINS")
                        .allow_negative_numbers(true)
                        .value_parser(clap::value_parser!(f64)),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a synthetic sync through the lifecycle controller")
                .arg(network_arg())
                .arg(
                    Arg::new("peer")
                        .short('p')
                        .long("peer")
                        .value_name("ADDRESS")
                        .help("Peer address (can be used multiple times)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    Arg::new("headers")
                        .long("headers")
                        .value_name("COUNT")
                        .help("Headers to fetch")
                        .value_parser(clap::value_parser!(i32))
                        .default_value("20000"),
                )
                .arg(
                    Arg::new("rescan-blocks")
                        .long("rescan-blocks")
                        .value_name("COUNT")
                        .help("Blocks to rescan")
                        .value_parser(clap::value_parser!(i32))
                        .default_value("50"),
                )
                .arg(
                    Arg::new("step-ms")
                        .long("step-ms")
                        .value_name("MILLIS")
                        .help("Delay between simulated worker reports")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("50"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECONDS")
                        .help("Sync deadline")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("rescan-timeout")
                        .long("rescan-timeout")
                        .value_name("SECONDS")
                        .help("Rescan deadline")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("log-level")
                        .short('l')
                        .long("log-level")
                        .value_name("LEVEL")
                        .help("Log level")
                        .value_parser(["error", "warn", "info", "debug", "trace"])
                        .default_value("info"),
                )
                .arg(
                    Arg::new("log-dir")
                        .long("log-dir")
                        .value_name("DIR")
                        .help("Also write logs to DIR/run.log"),
                ),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let result = match matches.subcommand() {
        Some(("estimate", sub)) => estimate(sub),
        Some(("normalize-address", sub)) => normalize(sub),
        Some(("convert", sub)) => convert(sub),
        Some(("simulate", sub)) => simulate(sub).await,
        _ => Err("unknown command".into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn network(matches: &ArgMatches) -> CliResult<Network> {
    let name = matches.get_one::<String>("network").map(String::as_str).unwrap_or("mainnet");
    Ok(name.parse()?)
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, name: &str) -> CliResult<T> {
    matches.get_one::<T>(name).cloned().ok_or_else(|| format!("missing --{}", name).into())
}

fn estimate(matches: &ArgMatches) -> CliResult<()> {
    let network = network(matches)?;
    let height: i32 = required(matches, "height")?;
    let timestamp: i64 = required(matches, "timestamp")?;

    println!("Network:        {}", network);
    println!(
        "Best block:     {} at {} ({})",
        height,
        format_utc_time(timestamp),
        extract_date_or_time(timestamp)
    );
    println!(
        "Projected tip:  {}",
        estimate_final_block_height(network.label(), timestamp, height)
    );
    println!("Behind:         {}", calculate_days_behind(timestamp));
    if let Some(seconds) = matches.get_one::<i64>("seconds-remaining") {
        println!("Remaining:      {}", calculate_total_time_remaining(*seconds));
    }
    Ok(())
}

fn normalize(matches: &ArgMatches) -> CliResult<()> {
    let address: String = required(matches, "address")?;
    let network = network(matches)?;
    let port = matches
        .get_one::<String>("port")
        .map(String::as_str)
        .unwrap_or_else(|| network.default_port());

    println!("{}", normalize_address(&address, port)?);
    Ok(())
}

fn convert(matches: &ArgMatches) -> CliResult<()> {
    if let Some(atoms) = matches.get_one::<i64>("atoms") {
        println!("{}", amount_coin(*atoms));
        return Ok(());
    }
    let coins: f64 = required(matches, "coins")?;
    println!("{}", amount_atom(coins)?);
    Ok(())
}

/// Logs every sync callback.
struct LogObserver;

impl SpvSyncResponse for LogObserver {
    fn on_peer_connected(&self, peer_count: i32) {
        tracing::info!("Peer connected ({} total)", peer_count);
    }

    fn on_peer_disconnected(&self, peer_count: i32) {
        tracing::info!("Peer disconnected ({} total)", peer_count);
    }

    fn on_fetch_missing_cfilters(&self, fetched_cfilters_count: i32) {
        tracing::info!("Fetched {} missing cfilters", fetched_cfilters_count);
    }

    fn on_fetched_headers(
        &self,
        peer_initial_height: i32,
        fetched_headers_count: i32,
        last_header_time: i64,
    ) {
        tracing::info!(
            "Fetched {} of {} headers, last header {}",
            fetched_headers_count,
            peer_initial_height,
            format_utc_time(last_header_time)
        );
    }

    fn on_discovered_addresses(&self, finished: bool) {
        if finished {
            tracing::info!("Address discovery finished");
        }
    }

    fn on_rescan_progress(&self, rescanned_through: i32) {
        tracing::debug!("Rescanned through {}", rescanned_through);
    }

    fn on_synced(&self, synced: bool) {
        tracing::info!("Synced: {}", synced);
    }

    fn on_sync_error(&self, code: SyncErrorCode, err: &SyncError) {
        tracing::error!("Sync failed with code {}: {}", code, err);
    }
}

/// Forwards rescan heights into the sync session.
struct RescanBridge<'a> {
    controller: &'a SyncLifecycleController,
}

impl BlockScanResponse for RescanBridge<'_> {
    fn on_scan(&self, rescanned_through: i32) -> bool {
        self.controller.rescan_progress(rescanned_through).is_ok()
    }

    fn on_end(&self, height: i32, cancelled: bool) {
        tracing::debug!("Rescan ended at {} (cancelled: {})", height, cancelled);
    }

    fn on_error(&self, code: SyncErrorCode, message: &str) {
        tracing::debug!("Rescan error {}: {}", code, message);
    }
}

struct SimulatedScanner {
    delay: Duration,
}

#[async_trait]
impl BlockScanner for SimulatedScanner {
    async fn scan_block(&mut self, _height: i32) -> SyncResult<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

struct TipLogger;

impl TransactionListener for TipLogger {
    fn on_transaction(&self, transaction: &Transaction) {
        tracing::info!("Transaction {}", transaction.hash);
    }

    fn on_transaction_confirmed(&self, hash: &str, height: i32) {
        tracing::info!("Transaction {} confirmed at {}", hash, height);
    }

    fn on_block_attached(&self, height: i32, timestamp: i64) {
        tracing::info!("Block {} attached ({})", height, extract_date_or_time(timestamp));
    }
}

struct SimulationPlan {
    network: Network,
    peers: usize,
    headers: i32,
    rescan_blocks: i32,
    step: Duration,
    rescan_timeout: Option<Duration>,
}

async fn simulate(matches: &ArgMatches) -> CliResult<()> {
    let network = network(matches)?;
    let level: String = required(matches, "log-level")?;
    let level: LevelFilter = level.parse()?;

    let mut config = Config::new(network).with_log_level(level);
    if let Some(dir) = matches.get_one::<String>("log-dir") {
        config = config.with_log_dir(dir);
    }
    if let Some(peers) = matches.get_many::<String>("peer") {
        for peer in peers {
            config.add_peer(peer.as_str());
        }
    }
    if let Some(secs) = matches.get_one::<u64>("timeout") {
        config = config.with_sync_timeout(Duration::from_secs(*secs));
    }
    if let Some(secs) = matches.get_one::<u64>("rescan-timeout") {
        config = config.with_rescan_timeout(Duration::from_secs(*secs));
    }

    let _log_guard = init_logging(config.logging())?;
    if let Err(e) = config.validate() {
        tracing::warn!("Configuration rejected: {}", e);
    }

    let coordinator = ShutdownCoordinator::global();
    coordinator.spawn_signal_listener();

    let controller = SyncLifecycleController::new(network);
    controller.add_observer(Arc::new(LogObserver));

    let start = controller.start(&config, &coordinator, &CancellationToken::new())?;
    tracing::info!("Simulating sync against {:?}", start.peers);

    let plan = SimulationPlan {
        network,
        peers: start.peers.len().max(1),
        headers: required(matches, "headers")?,
        rescan_blocks: required(matches, "rescan-blocks")?,
        step: Duration::from_millis(required(matches, "step-ms")?),
        rescan_timeout: config.rescan_timeout,
    };

    let result = controller
        .drive(&start.handle, run_simulation(&controller, &coordinator, &start.handle.token(), &plan))
        .await;

    if let Some(progress) = controller.progress() {
        println!("{}", serde_json::to_string_pretty(&progress)?);
    }

    match result {
        Ok(()) => {
            let hub = NotificationHub::new();
            hub.register(Arc::new(TipLogger));
            hub.on_block_attached(plan.headers, now_unix());
            Ok(())
        }
        Err(e) if e.is_cancellation() => {
            tracing::info!("Simulation stopped: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_simulation(
    controller: &SyncLifecycleController,
    coordinator: &ShutdownCoordinator,
    sync_token: &CancellationToken,
    plan: &SimulationPlan,
) -> SyncResult<()> {
    for peer_count in 1..=plan.peers {
        controller.peer_connected(peer_count as i32)?;
        tokio::time::sleep(plan.step).await;
    }

    for fetched in [10, 20, 32] {
        controller.fetched_missing_cfilters(fetched)?;
        tokio::time::sleep(plan.step).await;
    }

    let interval = plan.network.target_time_per_block();
    let first_header_time = now_unix() - i64::from(plan.headers) * interval;
    controller.begin_headers_fetch(0)?;

    let batch = (plan.headers / 10).max(1);
    let mut fetched = 0;
    while fetched < plan.headers {
        fetched = (fetched + batch).min(plan.headers);
        let last_header_time = first_header_time + i64::from(fetched) * interval;
        controller.fetched_headers(plan.headers, fetched, last_header_time)?;
        if let Some(estimate) = controller.progress().and_then(|p| p.estimate) {
            tracing::info!(
                "{}% done, {} remaining, {} behind",
                estimate.total_progress,
                estimate.time_remaining,
                estimate.days_behind
            );
        }
        tokio::time::sleep(plan.step).await;
    }

    for _ in 0..3 {
        controller.discovered_addresses(false)?;
        tokio::time::sleep(plan.step).await;
    }
    controller.discovered_addresses(true)?;

    let rescan_handle = coordinator.derive_with_timeout(sync_token, plan.rescan_timeout);
    let rescanner = RescanController::new();
    let mut scanner = SimulatedScanner {
        delay: plan.step / 4,
    };
    let bridge = RescanBridge {
        controller,
    };
    let start_height = plan.headers.saturating_sub(plan.rescan_blocks).max(0);

    match rescanner.rescan(start_height, plan.headers, &mut scanner, &bridge, &rescan_handle).await
    {
        RescanOutcome::Completed {
            ..
        } => Ok(()),
        RescanOutcome::Cancelled {
            height,
        } => Err(SyncError::Cancelled(format!("rescan stopped at {}", height))),
        RescanOutcome::Failed {
            code: SyncErrorCode::DeadlineExceeded,
            ..
        } => Err(SyncError::DeadlineExceeded),
        RescanOutcome::Failed {
            code: SyncErrorCode::Cancelled,
            message,
        } => Err(SyncError::Cancelled(message)),
        RescanOutcome::Failed {
            message,
            ..
        } => Err(SyncError::Internal(message)),
    }
}
