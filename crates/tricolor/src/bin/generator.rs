//! Attaches to a running supervisor and feeds it random colourings.

use std::process::ExitCode;

use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tricolor::config::{self, GeneratorArgs};
use tricolor::{Graph, generator, signals};
use tricolor_ring::RingPeer;

fn main() -> ExitCode {
    let args = GeneratorArgs::parse();
    config::init_tracing("warn");

    let graph = match Graph::new(args.edges) {
        Ok(graph) => graph,
        Err(error) => {
            tracing::error!(%error, "invalid graph");
            return ExitCode::FAILURE;
        }
    };
    let names = match args.ipc.names() {
        Ok(names) => names,
        Err(error) => {
            tracing::error!(%error, "bad IPC prefix");
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = signals::install() {
        tracing::error!(%error, "failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    let peer = match RingPeer::attach(&names) {
        Ok(peer) => peer,
        Err(error) => {
            tracing::error!(%error, "failed to attach to the ring");
            return ExitCode::FAILURE;
        }
    };

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    tracing::info!(
        edges = graph.edges().len(),
        max_vertex_id = graph.max_vertex_id(),
        pid = std::process::id(),
        "generator started"
    );

    match generator::run(peer.producer(), &graph, &mut rng, signals::stop_flag()) {
        Ok(stats) => {
            tracing::info!(%stats, "generator exiting");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(%error, "generator failed");
            ExitCode::FAILURE
        }
    }
}
