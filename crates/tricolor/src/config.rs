//! Command-line surfaces and logging setup for the two binaries.

use clap::{Args, Parser};
use tracing_subscriber::EnvFilter;
use tricolor_ring::{DEFAULT_PREFIX, Edge, IpcNames, SessionError};

use crate::graph::parse_edge;
use crate::supervisor::SupervisorConfig;

/// Where the named IPC objects live.
#[derive(Args, Debug, Clone)]
pub struct IpcArgs {
    /// Prefix for the shared-memory and semaphore names
    #[arg(
        long = "ipc-prefix",
        env = "TRICOLOR_IPC_PREFIX",
        value_name = "PREFIX",
        default_value = DEFAULT_PREFIX
    )]
    pub prefix: String,
}

impl IpcArgs {
    pub fn names(&self) -> Result<IpcNames, SessionError> {
        IpcNames::with_prefix(&self.prefix)
    }
}

/// Consumes candidate colourings and keeps the best one.
#[derive(Parser, Debug)]
#[command(name = "supervisor", version)]
pub struct SupervisorArgs {
    /// Stop after reading this many solutions
    #[arg(short = 'n', value_name = "LIMIT", value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,

    /// Seconds to sleep before reading the first solution
    #[arg(short = 'w', value_name = "DELAY", default_value_t = 0)]
    pub delay: u64,

    #[command(flatten)]
    pub ipc: IpcArgs,
}

impl SupervisorArgs {
    pub fn config(&self) -> SupervisorConfig {
        SupervisorConfig {
            limit: self.limit,
            delay: std::time::Duration::from_secs(self.delay),
        }
    }
}

/// Produces random 3-colourings of a graph and sends their conflict edges.
#[derive(Parser, Debug)]
#[command(name = "generator", version)]
pub struct GeneratorArgs {
    /// Graph edges as u-v (e.g. 0-1 1-2 2-0)
    #[arg(value_name = "EDGE", required = true, num_args = 1.., value_parser = parse_edge)]
    pub edges: Vec<Edge>,

    /// Seed for a reproducible run (default: seeded from the OS)
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub ipc: IpcArgs,
}

/// Log to stderr, filtered by `RUST_LOG` or `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definitions() {
        SupervisorArgs::command().debug_assert();
        GeneratorArgs::command().debug_assert();
    }

    #[test]
    fn test_supervisor_defaults() {
        let args = SupervisorArgs::try_parse_from(["supervisor", "--ipc-prefix", "/x"]).unwrap();
        assert_eq!(args.limit, None);
        assert_eq!(args.delay, 0);
        assert_eq!(args.ipc.names().unwrap().shm, "/x_shm");
    }

    #[test]
    fn test_supervisor_flags() {
        let args = SupervisorArgs::try_parse_from(["supervisor", "-n", "500", "-w", "2"]).unwrap();
        let config = args.config();
        assert_eq!(config.limit, Some(500));
        assert_eq!(config.delay, std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_supervisor_rejects_bad_numbers() {
        for argv in [
            &["supervisor", "-n", "0"][..],
            &["supervisor", "-n", "abc"],
            &["supervisor", "-w", "-1"],
            &["supervisor", "extra"],
        ] {
            assert!(SupervisorArgs::try_parse_from(argv).is_err(), "{argv:?}");
        }
    }

    #[test]
    fn test_generator_edges() {
        let args = GeneratorArgs::try_parse_from(["generator", "0-1", "1-2", "--seed", "9"]).unwrap();
        assert_eq!(args.edges, vec![Edge::new(0, 1), Edge::new(1, 2)]);
        assert_eq!(args.seed, Some(9));
    }

    #[test]
    fn test_generator_requires_valid_edges() {
        assert!(GeneratorArgs::try_parse_from(["generator"]).is_err());
        assert!(GeneratorArgs::try_parse_from(["generator", "0-x"]).is_err());
        assert!(GeneratorArgs::try_parse_from(["generator", "0-2000000"]).is_err());
    }
}
