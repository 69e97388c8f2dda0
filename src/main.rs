// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `bucket-sync`: run one replication pass and exit.
//!
//! Takes no arguments; see [`bucket_sync::config`] for the environment
//! variables and optional JSON file it reads. Exits 0 when the pass
//! completed (even if some keys failed) and 1 on any fatal error.

use bucket_sync::{RedisConnector, SyncConfig, SyncCoordinator};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match SyncConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let connector = RedisConnector::new(config.settings.connect_retry());
    let coordinator = SyncCoordinator::new(config, connector);

    match coordinator.run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            // Lock and log setup failures happen before there is a log file;
            // later failures are already in the run log.
            if e.is_pre_flight() {
                eprintln!("{e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}
