// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter TCP links feeding the ingest pipeline.
//!
//! One task per configured adapter connects out to the adapter's SHDR port,
//! reads `\n`-terminated lines, and applies them to the stores. Connections
//! are retried forever with jittered exponential backoff; `* PING`
//! heartbeats are answered so the adapter keeps the link open. Parse and
//! apply failures are logged and dropped, never escalated.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};
use tokio_util::sync::CancellationToken;

use mtconnect_agent_protocol::schema::SchemaIndex;
use mtconnect_agent_protocol::shdr::{self, ParsedLine};
use mtconnect_agent_store::{AssetStore, DataStore};

/// Heartbeat period advertised in `* PONG` replies, in milliseconds.
const HEARTBEAT_MS: u64 = 10_000;

/// One adapter link: where to connect and which device its lines belong to.
#[derive(Clone, Debug)]
pub struct AdapterEndpoint {
    /// Uuid of the device this adapter reports for
    pub device_uuid: String,
    /// `host:port` of the adapter's SHDR listener
    pub address: String,
}

enum LinkOutcome {
    Disconnected,
    Shutdown,
}

/// Maintains the link to one adapter until the token is cancelled.
pub async fn run_adapter(
    endpoint: AdapterEndpoint,
    index: Arc<SchemaIndex>,
    data: Arc<DataStore>,
    assets: Arc<AssetStore>,
    token: CancellationToken,
) {
    loop {
        let Some(stream) = connect(&endpoint.address, &token).await else {
            return;
        };
        info!(
            "connected to adapter {} for device {}",
            endpoint.address, endpoint.device_uuid
        );
        match read_lines(stream, &endpoint, &index, &data, &assets, &token).await {
            LinkOutcome::Shutdown => return,
            LinkOutcome::Disconnected => {
                warn!("adapter {} disconnected, reconnecting", endpoint.address);
            }
        }
    }
}

// Retries forever with backoff; returns None only on shutdown.
async fn connect(address: &str, token: &CancellationToken) -> Option<TcpStream> {
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(250)
        .max_delay(Duration::from_secs(30))
        .map(jitter);
    let attempt = Retry::spawn(strategy, || async {
        TcpStream::connect(address).await.map_err(|error| {
            debug!("connection to adapter {address} failed: {error}");
            RetryError::transient(error)
        })
    });
    tokio::select! {
        () = token.cancelled() => None,
        result = attempt => result.ok(),
    }
}

async fn read_lines(
    stream: TcpStream,
    endpoint: &AdapterEndpoint,
    index: &SchemaIndex,
    data: &DataStore,
    assets: &AssetStore,
    token: &CancellationToken,
) -> LinkOutcome {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            () = token.cancelled() => return LinkOutcome::Shutdown,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    handle_line(&line, endpoint, index, data, assets, &mut write_half).await;
                }
                Ok(None) => return LinkOutcome::Disconnected,
                Err(error) => {
                    warn!("read error on adapter {}: {error}", endpoint.address);
                    return LinkOutcome::Disconnected;
                }
            }
        }
    }
}

async fn handle_line(
    line: &str,
    endpoint: &AdapterEndpoint,
    index: &SchemaIndex,
    data: &DataStore,
    assets: &AssetStore,
    write_half: &mut OwnedWriteHalf,
) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    if let Some(command) = trimmed.strip_prefix("* ") {
        if command.eq_ignore_ascii_case("PING") {
            let pong = format!("* PONG {HEARTBEAT_MS}\n");
            if let Err(error) = write_half.write_all(pong.as_bytes()).await {
                warn!("failed to answer PING from {}: {error}", endpoint.address);
            }
        } else {
            debug!("ignoring adapter protocol command {command}");
        }
        return;
    }

    match shdr::parse_line(trimmed, &endpoint.device_uuid, index) {
        Ok(parsed) => apply_line(&parsed, &endpoint.device_uuid, index, data, assets),
        Err(error) => {
            warn!("discarding line from {}: {error}", endpoint.address);
        }
    }
}

/// Applies a parsed line to the stores. Per-entry failures are logged and
/// skipped so one bad field never takes down the rest of the line.
pub fn apply_line(
    parsed: &ParsedLine,
    uuid: &str,
    index: &SchemaIndex,
    data: &DataStore,
    assets: &AssetStore,
) {
    for entry in &parsed.entries {
        data.ingest(uuid, entry, parsed.timestamp, index);
    }
    for command in &parsed.asset_commands {
        if let Err(error) = assets.apply(uuid, command, parsed.timestamp) {
            warn!("discarding asset command from device {uuid}: {error}");
        }
    }
}
