//! `ringctl` -- a local multi-node ring demo/debug CLI over the `ringrt`
//! core.
//!
//! Spawns `n` RM-TMan nodes as component-runtime processes in a single
//! operating-system process, bootstraps them off a shared random peer
//! pool, drives the periodic gossip tick for a fixed number of rounds,
//! then dumps each node's converged predecessor/successor view.
//!
//! ```text
//! ringctl run --nodes 8 --ticks 20
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use ringrt::actor::{self, ProcessHandle, ProcessId};
use ringrt::id::Key;
use ringrt::messaging::MessageBus;
use ringrt::neighborhood::NodeDescriptor;
use ringrt::peer_source::CyclonCacheStub;
use ringrt::rm::{NullZombieSink, RmHandler, RmMsg, RmState};
use ringrt::RingConfig;

#[derive(Parser)]
#[command(name = "ringctl", version, about = "Local multi-node ring overlay demo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up a local ring, run gossip to convergence, print the result.
    Run {
        /// Number of local nodes to spawn.
        #[arg(long, default_value_t = 8)]
        nodes: usize,

        /// Number of periodic gossip ticks to run before reporting.
        #[arg(long, default_value_t = 30)]
        ticks: u32,

        /// Predecessor list length.
        #[arg(long, default_value_t = 4)]
        pred_list_length: u32,

        /// Successor list length.
        #[arg(long, default_value_t = 4)]
        succ_list_length: u32,

        /// Random peer cache size.
        #[arg(long, default_value_t = 8)]
        cyclon_cache_size: u32,

        /// Base gossip interval in milliseconds.
        #[arg(long, default_value_t = 50)]
        stabilization_interval_base_ms: u64,

        /// Optional path to a TOML config file overriding the flags above.
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            nodes,
            ticks,
            pred_list_length,
            succ_list_length,
            cyclon_cache_size,
            stabilization_interval_base_ms,
            config,
        } => {
            let cfg = match config {
                Some(path) => {
                    let src = std::fs::read_to_string(&path).unwrap_or_else(|e| {
                        eprintln!("error: failed to read '{}': {}", path.display(), e);
                        std::process::exit(1);
                    });
                    RingConfig::from_toml_str(&src).unwrap_or_else(|e| {
                        eprintln!("error: invalid config: {}", e);
                        std::process::exit(1);
                    })
                }
                None => RingConfig::new(
                    pred_list_length,
                    succ_list_length,
                    cyclon_cache_size,
                    stabilization_interval_base_ms,
                )
                .unwrap_or_else(|e| {
                    eprintln!("error: invalid config: {}", e);
                    std::process::exit(1);
                }),
            };

            run(nodes, ticks, cfg);
        }
    }
}

type Addr = ProcessId;
type Handle = ProcessHandle<RmState<Addr>, RmMsg<Addr>>;

/// Bring up `nodes` RM-TMan processes sharing one message bus, gossip for
/// `ticks` rounds at the config's stabilization interval, then report.
fn run(nodes: usize, ticks: u32, cfg: RingConfig) {
    if nodes == 0 {
        eprintln!("error: --nodes must be at least 1");
        std::process::exit(1);
    }

    let mut rng = rand::rng();
    let descriptors: Vec<NodeDescriptor<Addr>> = (0..nodes)
        .map(|_| NodeDescriptor::new(ProcessId::next(), Key(rng.random::<u128>()), 0, 0))
        .collect();

    let bus: Arc<MessageBus<Addr, RmState<Addr>, RmMsg<Addr>>> = Arc::new(MessageBus::new());
    let mut handles: Vec<(Addr, Handle)> = Vec::with_capacity(nodes);

    for me in &descriptors {
        let pool: Vec<NodeDescriptor<Addr>> =
            descriptors.iter().filter(|d| d.addr != me.addr).copied().collect();
        let peers = Arc::new(CyclonCacheStub::new(pool));
        let handler = RmHandler::new(Arc::clone(&bus), peers, Arc::new(NullZombieSink));
        let state = RmState::new(
            *me,
            cfg.pred_list_length(),
            cfg.succ_list_length(),
            cfg.cyclon_cache_size(),
        );
        let handle = actor::spawn(state, Box::new(handler));
        bus.register(me.addr, Arc::clone(&handle.ordinary));
        handles.push((me.addr, handle));
    }

    let interval = Duration::from_millis(cfg.stabilization_interval_base_ms());
    for _ in 0..ticks {
        for (_, handle) in &handles {
            handle.send(RmMsg::Trigger);
        }
        std::thread::sleep(interval);
    }

    println!("ring converged after {} ticks, {} nodes:", ticks, nodes);
    for (addr, handle) in &handles {
        let rx = handle.get_state(|s: &RmState<Addr>| s.dump());
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(dump) => {
                let preds: Vec<_> = dump.preds.iter().map(|d| d.addr.as_u64()).collect();
                let succs: Vec<_> = dump.succs.iter().map(|d| d.addr.as_u64()).collect();
                println!(
                    "  node {:>3}: {:?} churn={} rand_view_size={} preds={:?} succs={:?}",
                    addr.as_u64(),
                    dump.phase,
                    dump.churn_flag,
                    dump.rand_view_size,
                    preds,
                    succs,
                );
            }
            Err(_) => eprintln!("  node {:>3}: timed out waiting for state", addr.as_u64()),
        }
    }

    for (_, handle) in handles {
        handle.kill_and_join();
    }
}
