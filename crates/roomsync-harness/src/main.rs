//! Seeded chat room simulation.
//!
//! Several clients share one in-memory store with random fault injection.
//! The first client creates a room, everyone joins it and posts messages,
//! and notifications are delivered in a seeded random interleaving.
//! Invariants are checked after every delivery burst and once more after
//! every queue has drained.
//!
//! # Usage
//!
//! ```bash
//! # Reproduce a run
//! roomsync-sim --seed 42 --clients 3 --messages 50 --failure-rate 0.05
//! ```

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use roomsync_harness::{
    FaultPlan, InvariantRegistry, MemoryStore, SimClient, settle_shuffled, system_snapshot,
};
use roomsync_proto::Identity;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Roomsync deterministic simulation
#[derive(Parser, Debug)]
#[command(name = "roomsync-sim")]
#[command(about = "Seeded multi-client simulation of the roomsync engine")]
#[command(version)]
struct Args {
    /// RNG seed for faults and delivery order
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Number of simulated clients
    #[arg(short, long, default_value = "3")]
    clients: usize,

    /// Messages posted across all clients
    #[arg(short, long, default_value = "20")]
    messages: usize,

    /// Probability that a store read or write fails
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Name of the shared room
    #[arg(long, default_value = "general")]
    room: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(seed = args.seed, clients = args.clients, "simulation starting");

    let store = MemoryStore::with_faults(FaultPlan::random(args.seed, args.failure_rate));
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let mut clients: Vec<SimClient> = (0..args.clients.max(1))
        .map(|index| {
            let name = format!("client-{index}");
            let account = Identity::new(format!("user-{index}"), format!("User {index}"));
            SimClient::new(name, &store, account)
        })
        .collect();

    let standard = InvariantRegistry::standard();

    for client in &mut clients {
        client.sign_in();
    }
    settle_all(&mut clients, &mut rng);

    clients[0].create_room(&args.room)?;
    settle_all(&mut clients, &mut rng);

    for client in &mut clients {
        if !client.select_room_named(&args.room) {
            tracing::warn!(client = client.name(), room = %args.room, "room not visible");
        }
    }
    settle_all(&mut clients, &mut rng);

    for index in 0..args.messages {
        let author = rng.gen_range(0..clients.len());
        if let Err(error) = clients[author].send_message(&format!("message {index}")) {
            tracing::warn!(client = clients[author].name(), %error, "send rejected");
        }

        for _ in 0..rng.gen_range(0..4) {
            let pick = rng.gen_range(0..clients.len());
            clients[pick].step();
        }
        check(&standard, &clients)?;
    }

    let steps = settle_all(&mut clients, &mut rng);
    tracing::debug!(steps, "final settle");
    check(&InvariantRegistry::settled(), &clients)?;

    for client in &clients {
        let snapshot = client.snapshot();
        let messages = snapshot.selected().map_or(0, |room| room.messages.len());
        tracing::info!(
            client = client.name(),
            rooms = snapshot.rooms.len(),
            messages,
            last_error = ?snapshot.last_error,
            "client settled"
        );
    }
    tracing::info!(injected_faults = store.injected_faults(), "simulation finished");

    Ok(())
}

fn settle_all(clients: &mut [SimClient], rng: &mut ChaCha8Rng) -> usize {
    let mut refs: Vec<&mut SimClient> = clients.iter_mut().collect();
    settle_shuffled(&mut refs, rng)
}

fn check(
    registry: &InvariantRegistry,
    clients: &[SimClient],
) -> Result<(), Box<dyn std::error::Error>> {
    let views: Vec<&SimClient> = clients.iter().collect();
    match registry.check_all(&system_snapshot(&views)) {
        Ok(()) => Ok(()),
        Err(violations) => {
            for violation in &violations {
                tracing::error!(%violation, "invariant violated");
            }
            Err(format!("{} invariant violation(s)", violations.len()).into())
        },
    }
}
