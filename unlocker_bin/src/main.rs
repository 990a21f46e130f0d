// Copyright (C) 2025, 2026 Unlockerd Developers (see AUTHORS)
//
// This file is part of Unlockerd
//
// Unlockerd is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Unlockerd is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// Unlockerd. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{error, info};
use unlocker_lib::config::Config;
use unlocker_lib::logging::setup_logging;
use unlocker_lib::{Unlocker, UnlockerHandle};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            return Err(format!("Failed to load config: {}", e).into());
        }
    };

    let _guard = setup_logging(&config.logging)?;

    info!("Starting unlockerd for coin {}...", config.coin);

    let unlocker = Unlocker::connect(config).await?;
    let interval_secs = unlocker.interval_secs();
    let handle = UnlockerHandle::spawn(unlocker);

    // first cycle right away, then on the configured cadence
    handle.unlock();

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await;
    loop {
        interval.tick().await;
        handle.unlock();
    }
}
