use anyhow::Context;
use clap::{Parser, Subcommand};
use fastsync_peer::{config, metrics::{self, PeerMetrics}, Config, PeerError, PeerId, PeerSet};
use prometheus::Registry;
use std::collections::HashMap;
use tokio::time::{interval, Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TICK: Duration = Duration::from_millis(100);
const CHECK_EVERY: Duration = Duration::from_secs(1);
// Requests kept outstanding per peer so answered ones never take it idle.
const IN_FLIGHT: u32 = 2;

#[derive(Parser)]
#[command(author, version, about = "fast-sync peer health simulator")]
struct Cli {
    #[arg(short, long)]
    config: Option<String>,

    /// Overrides `log.level` (RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Drive a peer set against synthetic peers and report evictions
    Simulate {
        #[arg(long, default_value_t = 2)]
        fast: usize,
        #[arg(long, default_value_t = 1)]
        slow: usize,
        #[arg(long, default_value_t = 1)]
        silent: usize,
        #[arg(long, default_value_t = 60)]
        secs: u64,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        window_ms: Option<u64>,
        /// Serve metrics on `metrics.bind` while simulating
        #[arg(long, default_value_t = false)]
        metrics: bool,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Fast,
    Slow,
    Silent,
}

impl Behaviour {
    /// Bytes delivered per tick relative to the minimum acceptable rate.
    fn bytes_per_tick(self, min_recv_rate: i64) -> Option<u64> {
        let per_tick = min_recv_rate.max(0) as u64 * TICK.as_millis() as u64 / 1000;
        match self {
            Behaviour::Fast => Some(per_tick * 4),
            Behaviour::Slow => Some(per_tick / 4),
            Behaviour::Silent => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    if let Some(level) = cli.log_level {
        cfg.log.level = level;
    }
    init_logging(&cfg.log.level)?;

    match cli.cmd {
        Cmd::DefaultConfig => {
            print!("{}", config::to_toml(&Config::default())?);
            Ok(())
        }
        Cmd::Simulate { fast, slow, silent, secs, timeout_ms, window_ms, metrics } => {
            if let Some(ms) = timeout_ms { cfg.peer.timeout_ms = ms; }
            if let Some(ms) = window_ms { cfg.peer.window_size_ms = ms; }
            cfg.metrics.enabled |= metrics;
            let mix = [(Behaviour::Fast, fast), (Behaviour::Slow, slow), (Behaviour::Silent, silent)];
            simulate(cfg, &mix, Duration::from_secs(secs)).await
        }
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{level}'"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to install log subscriber")
}

async fn simulate(cfg: Config, mix: &[(Behaviour, usize)], run_for: Duration) -> anyhow::Result<()> {
    let registry = Registry::new();
    let peer_metrics = PeerMetrics::new(&registry)?;
    if cfg.metrics.enabled {
        metrics::serve(&cfg.metrics.bind, registry.clone())?;
        info!("serving metrics on {}", cfg.metrics.bind);
    }

    let min_rate = cfg.peer.min_recv_rate;
    let mut set = PeerSet::new(cfg.peer.clone(), peer_metrics);
    let mut behaviours = HashMap::new();
    for &(behaviour, count) in mix {
        for _ in 0..count {
            let id = PeerId::random();
            set.add_peer(id.clone(), rand::random::<u16>() as i64)?;
            for _ in 0..IN_FLIGHT {
                set.request_sent(&id)?;
            }
            behaviours.insert(id, behaviour);
        }
    }
    info!(peers = set.len(), max_height = set.max_peer_height(), "simulation started");

    let deadline = Instant::now() + run_for;
    let mut tick = interval(TICK);
    let mut check = interval(CHECK_EVERY);
    let mut evicted: Vec<(PeerId, PeerError)> = Vec::new();

    while !set.is_empty() && Instant::now() < deadline {
        tokio::select! {
            _ = tick.tick() => {
                let ids: Vec<PeerId> = set.peer_ids().cloned().collect();
                for id in ids {
                    let Some(bytes) = behaviours[&id].bytes_per_tick(min_rate) else { continue };
                    // answer one request and keep the pipeline full
                    set.response_received(&id, bytes)?;
                    set.request_sent(&id)?;
                }
            }
            _ = check.tick() => {
                evicted.extend(set.remove_bad_peers());
            }
            Some((err, id)) = set.next_failure() => {
                if set.handle_failure(err, &id) {
                    evicted.push((id, err));
                }
            }
        }
    }

    for (id, err) in &evicted {
        println!("evicted {id} ({:?} peer): {err}", behaviours[id]);
    }
    for id in set.peer_ids() {
        let rate = set.peer(id).and_then(|p| p.recv_rate()).unwrap_or(0);
        println!("kept    {id} ({:?} peer): {rate} B/s", behaviours[id]);
    }
    if evicted.is_empty() {
        warn!("no peer was evicted; try a longer run or a shorter --window-ms");
    }
    Ok(())
}
