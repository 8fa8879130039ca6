// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assembly of MTConnect response documents.
//!
//! Every query the agent answers goes through this crate: the typed query
//! descriptors and their validation, the error taxonomy, and the builders
//! that project the schema index and the stores into
//! `MTConnectDevices` / `MTConnectStreams` / `MTConnectAssets` /
//! `MTConnectError` document trees. Serialization of the trees to bytes
//! happens at the transport.

#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use derive_builder::Builder;

use mtconnect_agent_protocol::schema::{DeviceSchema, SchemaIndex};
use mtconnect_agent_protocol::xml::Element;

pub mod assets;
pub mod error;
pub mod probe;
pub mod query;
pub mod streams;

pub use error::{AgentError, ErrorCode};

/// MTConnect schema version the agent reports.
pub const MTCONNECT_VERSION: &str = "1.3";

/// Identity and sizing facts stamped into every document header.
#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct AgentInfo {
    /// Value of the `sender` header attribute
    pub sender: String,
    /// Changes every restart, letting clients detect sequence resets
    pub instance_id: u64,
    /// Reported MTConnect schema version
    #[builder(default = "MTCONNECT_VERSION.to_string()")]
    pub version: String,
    /// Sample buffer capacity
    pub buffer_size: usize,
    /// Asset buffer capacity
    pub asset_buffer_size: usize,
}

/// Formats a header `creationTime`.
#[must_use]
pub(crate) fn creation_time(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Root element for one of the four document kinds, with its namespace
/// attributes.
pub(crate) fn document_root(kind: &str, version: &str) -> Element {
    let namespace = format!("urn:mtconnect.org:MTConnect{kind}:{version}");
    Element::new(format!("MTConnect{kind}"))
        .with_attribute("xmlns:m", namespace.clone())
        .with_attribute("xmlns", namespace.clone())
        .with_attribute("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance")
        .with_attribute(
            "xsi:schemaLocation",
            format!("{namespace} http://www.mtconnect.org/schemas/MTConnect{kind}_{version}.xsd"),
        )
}

/// Header element with the attributes common to all document kinds; callers
/// append the kind-specific ones.
pub(crate) fn base_header(info: &AgentInfo, now: DateTime<Utc>) -> Element {
    Element::new("Header")
        .with_attribute("creationTime", creation_time(now))
        .with_attribute("sender", info.sender.as_str())
        .with_attribute("instanceId", info.instance_id.to_string())
        .with_attribute("version", info.version.as_str())
        .with_attribute("bufferSize", info.buffer_size.to_string())
}

/// Resolves a device selection (uuids or names, as they appeared in the
/// request path) against the index. `None` means every registered device.
///
/// Fails with a single `NO_DEVICE` error on the first unknown entry.
pub(crate) fn resolve_devices<'a>(
    index: &'a SchemaIndex,
    selection: Option<&[String]>,
) -> Result<Vec<&'a DeviceSchema>, Vec<AgentError>> {
    match selection {
        None => Ok(index.devices().collect()),
        Some(entries) => {
            let mut devices = Vec::with_capacity(entries.len());
            for entry in entries {
                let by_uuid = index.device(entry);
                let device = by_uuid.or_else(|| {
                    index
                        .device_uuid(entry)
                        .and_then(|uuid| index.device(uuid))
                });
                match device {
                    Some(device) => devices.push(device),
                    None => return Err(vec![AgentError::no_device(entry)]),
                }
            }
            Ok(devices)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_info_builder_defaults_version() {
        let info = AgentInfoBuilder::default()
            .sender("agent")
            .instance_id(17_u64)
            .buffer_size(10_usize)
            .asset_buffer_size(1024_usize)
            .build()
            .unwrap();
        assert_eq!(info.version, MTCONNECT_VERSION);
    }

    #[test]
    fn test_document_root_namespace() {
        let root = document_root("Streams", "1.3");
        assert_eq!(root.name, "MTConnectStreams");
        assert_eq!(
            root.attribute("xmlns"),
            Some("urn:mtconnect.org:MTConnectStreams:1.3")
        );
    }
}
