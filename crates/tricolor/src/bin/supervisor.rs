//! Creates the ring, reads candidates and reports the best one.

use std::process::ExitCode;

use clap::Parser;
use tricolor::config::{self, SupervisorArgs};
use tricolor::{signals, supervisor};
use tricolor_ring::RingHost;

fn main() -> ExitCode {
    let args = SupervisorArgs::parse();
    config::init_tracing("info");

    let names = match args.ipc.names() {
        Ok(names) => names,
        Err(error) => {
            tracing::error!(%error, "bad IPC prefix");
            return ExitCode::FAILURE;
        }
    };

    // Before any IPC object exists, so a signal during setup still leads to
    // a clean exit.
    if let Err(error) = signals::install() {
        tracing::error!(%error, "failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    let host = match RingHost::create(names) {
        Ok(host) => host,
        Err(error) => {
            tracing::error!(%error, "failed to set up the ring");
            return ExitCode::FAILURE;
        }
    };
    println!("[supervisor] System initialized. Waiting for solutions...");

    let result = {
        let _wake = signals::arm_wakeup(&host.ring().semaphores().used_slots);
        supervisor::run(
            host.ring(),
            &args.config(),
            signals::stop_flag(),
            |notice| println!("[supervisor] {notice}"),
        )
    };

    let code = match result {
        Ok(summary) => {
            println!("[supervisor] {summary}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(%error, "supervisor failed");
            ExitCode::FAILURE
        }
    };

    let report = host.shutdown();
    if report.failures > 0 {
        tracing::warn!(failures = report.failures, "some objects could not be closed or unlinked");
    }
    code
}
