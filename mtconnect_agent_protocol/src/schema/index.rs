// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Read-mostly lookup index over registered device schemas.

use std::collections::{HashMap, HashSet};

use super::path::PathFilter;
use super::{Component, DataItem, DeviceSchema, SchemaError};

/// One stop on the ordered component walk of a device: a component (or the
/// device root itself) together with the data items it directly owns.
#[derive(Clone, Debug)]
pub struct ComponentEntry<'a> {
    /// Element name for the component stream, e.g. `Axes` or `Device`
    pub component_type: &'a str,
    /// Component id
    pub id: &'a str,
    /// Component name, if the description gave one
    pub name: Option<&'a str>,
    /// Data items owned directly by this component
    pub data_items: Vec<&'a DataItem>,
}

/// Lookup index over every registered device, built once at startup and
/// immutable afterwards. Resolves names to uuids, SHDR keys to data item
/// descriptors, and restricted XPath filters to data item sets.
#[derive(Debug, Default)]
pub struct SchemaIndex {
    devices: Vec<DeviceSchema>,
    uuid_to_device: HashMap<String, usize>,
    name_to_uuid: HashMap<String, String>,
    // keyed by (uuid, id) and, when the item has one, (uuid, name)
    items: HashMap<(String, String), DataItem>,
}

impl SchemaIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device schema.
    ///
    /// Registration is first-wins: a second device with an already-known uuid
    /// is rejected and the existing registration is untouched. Duplicate data
    /// item ids or names within the new device are also rejected.
    pub fn register(&mut self, device: DeviceSchema) -> Result<(), SchemaError> {
        if self.uuid_to_device.contains_key(&device.uuid) {
            return Err(SchemaError::DuplicateUuid(device.uuid));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for item in flatten_items(&device) {
            if !ids.insert(item.id.clone()) {
                return Err(SchemaError::DuplicateDataItemId(
                    item.id.clone(),
                    device.uuid.clone(),
                ));
            }
            if let Some(name) = &item.name {
                if !names.insert(name.clone()) {
                    return Err(SchemaError::DuplicateDataItemName(
                        name.clone(),
                        device.uuid.clone(),
                    ));
                }
            }
        }

        for item in flatten_items(&device) {
            self.items
                .insert((device.uuid.clone(), item.id.clone()), item.clone());
            if let Some(name) = &item.name {
                self.items
                    .insert((device.uuid.clone(), name.clone()), item.clone());
            }
        }
        self.name_to_uuid
            .insert(device.name.clone(), device.uuid.clone());
        self.uuid_to_device
            .insert(device.uuid.clone(), self.devices.len());
        self.devices.push(device);
        Ok(())
    }

    /// Resolves a device name to its uuid.
    #[must_use]
    pub fn device_uuid(&self, name: &str) -> Option<&str> {
        self.name_to_uuid.get(name).map(String::as_str)
    }

    /// Returns the schema registered under `uuid`.
    #[must_use]
    pub fn device(&self, uuid: &str) -> Option<&DeviceSchema> {
        self.uuid_to_device
            .get(uuid)
            .map(|index| &self.devices[*index])
    }

    /// All registered devices, in registration order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceSchema> {
        self.devices.iter()
    }

    /// Looks up a data item by id or name within one device.
    #[must_use]
    pub fn data_item(&self, uuid: &str, key: &str) -> Option<&DataItem> {
        self.items.get(&(uuid.to_string(), key.to_string()))
    }

    /// Ordered traversal of a device: the device root first (when it owns
    /// data items), then every component depth-first. Components without
    /// data items are included so callers can decide whether to emit them.
    #[must_use]
    pub fn walk<'a>(&'a self, uuid: &str) -> Option<Vec<ComponentEntry<'a>>> {
        let device = self.device(uuid)?;
        let mut entries = Vec::new();
        entries.push(ComponentEntry {
            component_type: "Device",
            id: &device.id,
            name: Some(&device.name),
            data_items: device.data_items.iter().collect(),
        });
        for component in &device.components {
            walk_component(component, &mut entries);
        }
        Some(entries)
    }

    /// Resolves a path filter to the `(uuid, data item id)` pairs it selects
    /// within the given devices.
    #[must_use]
    pub fn filter_data_items(
        &self,
        filter: &PathFilter,
        uuids: &[&str],
    ) -> HashSet<(String, String)> {
        let mut selected = HashSet::new();
        for uuid in uuids {
            if let Some(device) = self.device(uuid) {
                for id in filter.select(device) {
                    selected.insert(((*uuid).to_string(), id));
                }
            }
        }
        selected
    }

    /// True iff the filter selects at least one data item in any of the
    /// given devices.
    #[must_use]
    pub fn path_validation(&self, filter: &PathFilter, uuids: &[&str]) -> bool {
        !self.filter_data_items(filter, uuids).is_empty()
    }
}

fn walk_component<'a>(component: &'a Component, entries: &mut Vec<ComponentEntry<'a>>) {
    entries.push(ComponentEntry {
        component_type: &component.component_type,
        id: &component.id,
        name: component.name.as_deref(),
        data_items: component.data_items.iter().collect(),
    });
    for child in &component.components {
        walk_component(child, entries);
    }
}

fn flatten_items(device: &DeviceSchema) -> Vec<&DataItem> {
    let mut items: Vec<&DataItem> = device.data_items.iter().collect();
    fn visit<'a>(component: &'a Component, items: &mut Vec<&'a DataItem>) {
        items.extend(component.data_items.iter());
        for child in &component.components {
            visit(child, items);
        }
    }
    for component in &device.components {
        visit(component, &mut items);
    }
    items
}
