// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The MTConnect agent binary: loads configuration and device schemas,
//! connects the adapter links, and serves the MTConnect query surface.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use env_logger::Builder;
use log::info;
use tokio_util::sync::CancellationToken;

use mtconnect_agent_protocol::schema::SchemaIndex;
use mtconnect_agent_response::AgentInfoBuilder;
use mtconnect_agent_store::{AssetStore, DataStore};

mod adapter;
mod config;
mod device_file;
mod http;

use adapter::AdapterEndpoint;
use config::AgentConfig;
use http::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MTCONNECT_AGENT_CONFIG").ok())
        .unwrap_or_else(|| "agent_config.json".to_string());
    let config = AgentConfig::load(Path::new(&config_path))?;

    let mut index = SchemaIndex::new();
    for device in device_file::load_devices(&config.devices_file)? {
        info!("registering device {} ({})", device.name, device.uuid);
        index.register(device)?;
    }
    let index = Arc::new(index);
    let data = Arc::new(DataStore::new(config.buffer_size));
    let assets = Arc::new(AssetStore::new(config.asset_buffer_size));
    let info = AgentInfoBuilder::default()
        .sender(config.sender.clone())
        .instance_id(instance_id())
        .buffer_size(config.buffer_size)
        .asset_buffer_size(config.asset_buffer_size)
        .build()?;

    let token = CancellationToken::new();
    for adapter_config in &config.adapters {
        let device_uuid = index
            .device_uuid(&adapter_config.device)
            .map(str::to_string)
            .or_else(|| {
                index
                    .device(&adapter_config.device)
                    .map(|device| device.uuid.clone())
            })
            .ok_or_else(|| {
                format!(
                    "adapter references unknown device {}",
                    adapter_config.device
                )
            })?;
        tokio::spawn(adapter::run_adapter(
            AdapterEndpoint {
                device_uuid,
                address: format!("{}:{}", adapter_config.host, adapter_config.port),
            },
            index.clone(),
            data.clone(),
            assets.clone(),
            token.child_token(),
        ));
    }

    let state = Arc::new(AppState {
        info,
        index,
        data,
        assets,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("listening on {}", listener.local_addr()?);

    let shutdown = token.clone();
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

// Restart detection for clients: a fresh value every time the process (and
// with it the sequence counter) starts over.
fn instance_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
