//! Watch command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use timecube_core::{ConnectionManager, StatusMonitor};

use crate::util::{connect, open_manager, require_device, shutdown};

pub async fn cmd_watch(
    device: Option<String>,
    connect_timeout: Duration,
    quiet: bool,
) -> Result<()> {
    let identity = require_device(device)?;
    let manager = open_manager(connect_timeout).await?;
    let result = watch(&manager, &identity, quiet).await;
    shutdown(&manager).await;
    result
}

async fn watch(manager: &ConnectionManager, identity: &str, quiet: bool) -> Result<()> {
    let name = connect(manager, identity).await?;
    manager.subscribe(|event| {
        if !event.connected {
            tracing::warn!("Link closed");
        }
    });

    let monitor = StatusMonitor::new(manager.clone());
    let current = monitor
        .read_status()
        .await
        .context("Failed to read device status")?;
    let mut statuses = monitor
        .watch()
        .await
        .context("Failed to subscribe to status notifications")?;

    if !quiet {
        eprintln!("Watching {} (Ctrl-C to stop)", name);
    }
    println!("{}", current);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                if let Err(e) = monitor.unwatch().await {
                    tracing::debug!("Failed to unsubscribe: {}", e);
                }
                return Ok(());
            }
            next = statuses.next() => match next {
                Some(status) => println!("{}", status),
                None => anyhow::bail!("Lost connection to {}", name),
            },
        }
    }
}
