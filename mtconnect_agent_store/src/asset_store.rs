// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The bounded asset buffer and current-asset map.
//!
//! Assets arrive as `@ASSET@` / `@UPDATE_ASSET@` / `@REMOVE_ASSET@` commands
//! on the SHDR link. Every change appends a record to a FIFO buffer; the
//! current map always points at the newest record per asset id. Removal is a
//! tombstone: the id stays in the current map, flagged `removed`, until the
//! buffer evicts its record.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::RwLock;
use thiserror::Error;

use mtconnect_agent_protocol::shdr::AssetCommand;
use mtconnect_agent_protocol::xml::{Element, XmlError};

/// Default capacity of the asset buffer.
pub const DEFAULT_ASSET_BUFFER_SIZE: usize = 1024;

/// Indicates an asset command could not be applied.
#[derive(Error, Debug)]
pub enum AssetStoreError {
    /// The command referenced an asset id that is not stored
    #[error("unknown asset id {0}")]
    UnknownAsset(String),
    /// An `@ASSET@` body was not well-formed XML
    #[error("asset body is not well-formed XML: {0}")]
    InvalidBody(#[from] XmlError),
}

/// One stored asset revision.
#[derive(Clone, Debug)]
pub struct Asset {
    /// Asset id, unique across devices
    pub asset_id: String,
    /// Asset type, e.g. `CuttingTool`
    pub asset_type: String,
    /// Device the asset was reported by
    pub device_uuid: String,
    /// Timestamp of the line that produced this revision
    pub timestamp: DateTime<Utc>,
    /// Structured asset body
    pub content: Element,
    /// Tombstone flag set by `@REMOVE_ASSET@`
    pub removed: bool,
}

#[derive(Debug, Default)]
struct State {
    buffer: VecDeque<Arc<Asset>>,
    current: HashMap<String, Arc<Asset>>,
}

/// Bounded store of asset revisions plus the newest revision per id.
#[derive(Debug)]
pub struct AssetStore {
    capacity: usize,
    state: RwLock<State>,
}

impl AssetStore {
    /// Creates a store retaining at most `capacity` asset records. A zero
    /// capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        AssetStore {
            capacity: capacity.max(1),
            state: RwLock::new(State::default()),
        }
    }

    /// Buffer capacity fixed at construction.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Applies one asset command from device `uuid`, stamped with the line
    /// timestamp.
    pub fn apply(
        &self,
        uuid: &str,
        command: &AssetCommand,
        timestamp: DateTime<Utc>,
    ) -> Result<(), AssetStoreError> {
        match command {
            AssetCommand::Upsert {
                asset_id,
                asset_type,
                body,
            } => {
                let content = Element::parse_str(body)?;
                self.push_revision(Asset {
                    asset_id: asset_id.clone(),
                    asset_type: asset_type.clone(),
                    device_uuid: uuid.to_string(),
                    timestamp,
                    content,
                    removed: false,
                });
                Ok(())
            }
            AssetCommand::Update { asset_id, patches } => {
                let Some(existing) = self.asset(asset_id) else {
                    return Err(AssetStoreError::UnknownAsset(asset_id.clone()));
                };
                let mut revision = (*existing).clone();
                revision.timestamp = timestamp;
                for (element_name, value) in patches {
                    match revision.content.innermost_mut(element_name) {
                        Some(element) => element.set_text(value.clone()),
                        None => {
                            warn!("asset {asset_id} has no element {element_name} to update");
                        }
                    }
                }
                self.push_revision(revision);
                Ok(())
            }
            AssetCommand::Remove { asset_id } => {
                let Some(existing) = self.asset(asset_id) else {
                    return Err(AssetStoreError::UnknownAsset(asset_id.clone()));
                };
                if existing.removed {
                    // removal is idempotent; one tombstone record is enough
                    return Ok(());
                }
                let mut revision = (*existing).clone();
                revision.timestamp = timestamp;
                revision.removed = true;
                self.push_revision(revision);
                Ok(())
            }
        }
    }

    /// Newest revision of the asset with the given id.
    #[must_use]
    pub fn asset(&self, asset_id: &str) -> Option<Arc<Asset>> {
        self.state.read().current.get(asset_id).cloned()
    }

    /// Newest revisions of all non-removed assets, newest first, optionally
    /// restricted by asset type, capped at `count`.
    #[must_use]
    pub fn list(&self, asset_type: Option<&str>, count: usize) -> Vec<Arc<Asset>> {
        let state = self.state.read();
        let mut assets: Vec<Arc<Asset>> = state
            .current
            .values()
            .filter(|asset| !asset.removed)
            .filter(|asset| asset_type.is_none_or(|wanted| asset.asset_type == wanted))
            .cloned()
            .collect();
        assets.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.asset_id.cmp(&b.asset_id)));
        assets.truncate(count);
        assets
    }

    /// Number of non-removed assets currently stored.
    #[must_use]
    pub fn count(&self) -> usize {
        self.state
            .read()
            .current
            .values()
            .filter(|asset| !asset.removed)
            .count()
    }

    /// Number of records in the buffer.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.state.read().buffer.len()
    }

    fn push_revision(&self, revision: Asset) {
        let revision = Arc::new(revision);
        let mut state = self.state.write();
        state
            .current
            .insert(revision.asset_id.clone(), revision.clone());
        state.buffer.push_back(revision);
        if state.buffer.len() > self.capacity {
            if let Some(evicted) = state.buffer.pop_front() {
                // the tombstone (or stale revision) leaves the current map
                // only when its backing record leaves the buffer
                if let Some(current) = state.current.get(&evicted.asset_id) {
                    if Arc::ptr_eq(current, &evicted) {
                        state.current.remove(&evicted.asset_id);
                    }
                }
            }
        }
    }
}

impl Default for AssetStore {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOOL_XML: &str = r#"<CuttingTool serialNumber="1" assetId="EM233"><ToolLife>100</ToolLife><Measurements><CuttingDiameterMax>32</CuttingDiameterMax></Measurements></CuttingTool>"#;

    fn timestamp(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    fn upsert(id: &str) -> AssetCommand {
        AssetCommand::Upsert {
            asset_id: id.to_string(),
            asset_type: "CuttingTool".to_string(),
            body: TOOL_XML.to_string(),
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let store = AssetStore::new(16);
        store.apply("000", &upsert("EM233"), timestamp(1)).unwrap();

        let asset = store.asset("EM233").unwrap();
        assert_eq!(asset.asset_type, "CuttingTool");
        assert_eq!(asset.device_uuid, "000");
        assert!(!asset.removed);
        assert_eq!(store.count(), 1);
        assert_eq!(store.buffer_len(), 1);
    }

    #[test]
    fn test_update_patches_innermost_and_appends() {
        let store = AssetStore::new(16);
        store.apply("000", &upsert("EM233"), timestamp(1)).unwrap();
        store
            .apply(
                "000",
                &AssetCommand::Update {
                    asset_id: "EM233".to_string(),
                    patches: vec![
                        ("ToolLife".to_string(), "120".to_string()),
                        ("CuttingDiameterMax".to_string(), "40".to_string()),
                    ],
                },
                timestamp(2),
            )
            .unwrap();

        let asset = store.asset("EM233").unwrap();
        assert_eq!(asset.timestamp, timestamp(2));
        let mut content = asset.content.clone();
        assert_eq!(content.innermost_mut("ToolLife").unwrap().text(), "120");
        assert_eq!(
            content.innermost_mut("CuttingDiameterMax").unwrap().text(),
            "40"
        );
        assert_eq!(store.buffer_len(), 2);
    }

    #[test]
    fn test_update_unknown_asset() {
        let store = AssetStore::new(16);
        let result = store.apply(
            "000",
            &AssetCommand::Update {
                asset_id: "missing".to_string(),
                patches: vec![("ToolLife".to_string(), "1".to_string())],
            },
            timestamp(1),
        );
        assert!(matches!(result, Err(AssetStoreError::UnknownAsset(_))));
        assert_eq!(store.buffer_len(), 0);
    }

    #[test]
    fn test_remove_is_tombstone_and_idempotent() {
        let store = AssetStore::new(16);
        store.apply("000", &upsert("EM233"), timestamp(1)).unwrap();
        store
            .apply(
                "000",
                &AssetCommand::Remove {
                    asset_id: "EM233".to_string(),
                },
                timestamp(2),
            )
            .unwrap();
        store
            .apply(
                "000",
                &AssetCommand::Remove {
                    asset_id: "EM233".to_string(),
                },
                timestamp(3),
            )
            .unwrap();

        let asset = store.asset("EM233").unwrap();
        assert!(asset.removed);
        assert_eq!(asset.timestamp, timestamp(2));
        assert_eq!(store.buffer_len(), 2);
        assert_eq!(store.count(), 0);
        assert!(store.list(None, 10).is_empty());
    }

    #[test]
    fn test_malformed_body_rejected() {
        let store = AssetStore::new(16);
        let result = store.apply(
            "000",
            &AssetCommand::Upsert {
                asset_id: "EM233".to_string(),
                asset_type: "CuttingTool".to_string(),
                body: "<CuttingTool><Unclosed></CuttingTool>".to_string(),
            },
            timestamp(1),
        );
        assert!(matches!(result, Err(AssetStoreError::InvalidBody(_))));
    }

    #[test]
    fn test_buffer_eviction_drops_current_entry() {
        let store = AssetStore::new(2);
        store.apply("000", &upsert("A"), timestamp(1)).unwrap();
        store.apply("000", &upsert("B"), timestamp(2)).unwrap();
        store.apply("000", &upsert("C"), timestamp(3)).unwrap();

        assert!(store.asset("A").is_none());
        assert!(store.asset("B").is_some());
        assert!(store.asset("C").is_some());
    }

    #[test]
    fn test_eviction_keeps_id_with_newer_revision() {
        let store = AssetStore::new(2);
        store.apply("000", &upsert("A"), timestamp(1)).unwrap();
        store.apply("000", &upsert("A"), timestamp(2)).unwrap();
        store.apply("000", &upsert("B"), timestamp(3)).unwrap();

        // the evicted record was a stale revision of A; the newer one stays
        assert!(store.asset("A").is_some());
    }

    #[test]
    fn test_list_filters_type_and_caps() {
        let store = AssetStore::new(16);
        store.apply("000", &upsert("A"), timestamp(1)).unwrap();
        store.apply("000", &upsert("B"), timestamp(2)).unwrap();
        store
            .apply(
                "000",
                &AssetCommand::Upsert {
                    asset_id: "F1".to_string(),
                    asset_type: "Fixture".to_string(),
                    body: "<Fixture/>".to_string(),
                },
                timestamp(3),
            )
            .unwrap();

        let tools = store.list(Some("CuttingTool"), 10);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].asset_id, "B");

        assert_eq!(store.list(None, 2).len(), 2);
    }
}
