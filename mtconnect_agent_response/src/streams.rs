// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `MTConnectStreams` documents for `current` and `sample` requests.
//!
//! Both document kinds share the same skeleton: a `DeviceStream` per device
//! in scope, a `ComponentStream` per component that contributed at least one
//! element, and the component's observations partitioned into `Samples`,
//! `Events`, and `Condition`. `current` emits exactly one element per data
//! item from the latest-value snapshot; `sample` emits one element per
//! buffered observation in the requested range, preserving buffer order.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use mtconnect_agent_protocol::format_timestamp;
use mtconnect_agent_protocol::schema::{
    Category, ComponentEntry, DataItem, DeviceSchema, PathFilter, SchemaIndex,
};
use mtconnect_agent_protocol::xml::Element;
use mtconnect_agent_store::{DataStore, ItemKey, Observation, ObservationValue};

use crate::error::AgentError;
use crate::query::{CurrentQuery, SampleQuery};
use crate::{AgentInfo, base_header, document_root, resolve_devices};

/// Builds the snapshot document for a `current` request.
pub fn current(
    info: &AgentInfo,
    index: &SchemaIndex,
    store: &DataStore,
    selection: Option<&[String]>,
    query: &CurrentQuery,
    now: DateTime<Utc>,
) -> Result<Element, Vec<AgentError>> {
    let devices = resolve_devices(index, selection)?;
    let filter = resolve_filter(index, &devices, query.path.as_ref())?;

    let snapshot = match query.at {
        Some(at) => store.current_at(at).map_err(|error| vec![error.into()])?,
        None => store.current(),
    };

    let mut root = document_root("Streams", &info.version);
    root.push_element(
        base_header(info, now)
            .with_attribute("nextSequence", snapshot.next_sequence.to_string())
            .with_attribute("firstSequence", snapshot.first_sequence.to_string())
            .with_attribute("lastSequence", snapshot.last_sequence.to_string()),
    );

    let mut streams = Element::new("Streams");
    for device in devices {
        let Some(entries) = index.walk(&device.uuid) else {
            continue;
        };
        let mut device_stream = Element::new("DeviceStream")
            .with_attribute("name", device.name.as_str())
            .with_attribute("uuid", device.uuid.as_str());

        for entry in entries {
            let mut partitions = Partitions::default();
            for item in &entry.data_items {
                if !filter_allows(filter.as_ref(), &device.uuid, &item.id) {
                    continue;
                }
                let key: ItemKey = (device.uuid.clone(), item.id.clone());
                match item.category {
                    Category::Event | Category::Sample => {
                        let element = match snapshot.values.get(&key) {
                            Some(observation) => observation_element(observation, item),
                            None => unavailable_value(item, now),
                        };
                        partitions.push(item.category, element);
                    }
                    Category::Condition => {
                        match snapshot.conditions.get(&key) {
                            Some(active) if !active.is_empty() => {
                                for observation in active {
                                    partitions
                                        .push(item.category, observation_element(observation, item));
                                }
                            }
                            _ => {
                                let element = match snapshot.cleared.get(&key) {
                                    Some(clearing) => observation_element(clearing, item),
                                    None => unavailable_condition(item, now),
                                };
                                partitions.push(item.category, element);
                            }
                        }
                    }
                }
            }
            if let Some(component_stream) = partitions.into_component_stream(&entry) {
                device_stream.push_element(component_stream);
            }
        }
        streams.push_element(device_stream);
    }
    root.push_element(streams);
    Ok(root)
}

/// Builds the range document for a `sample` request.
pub fn sample(
    info: &AgentInfo,
    index: &SchemaIndex,
    store: &DataStore,
    selection: Option<&[String]>,
    query: &SampleQuery,
    now: DateTime<Utc>,
) -> Result<Element, Vec<AgentError>> {
    let devices = resolve_devices(index, selection)?;
    let filter = resolve_filter(index, &devices, query.path.as_ref())?;

    let from = query.from.unwrap_or_else(|| store.bounds().0);
    let slice = store
        .sample(from, query.count)
        .map_err(|error| vec![error.into()])?;

    let mut root = document_root("Streams", &info.version);
    root.push_element(
        base_header(info, now)
            .with_attribute("nextSequence", slice.next_sequence.to_string())
            .with_attribute("firstSequence", slice.first_sequence.to_string())
            .with_attribute("lastSequence", slice.last_sequence.to_string()),
    );

    let mut streams = Element::new("Streams");
    for device in devices {
        let Some(entries) = index.walk(&device.uuid) else {
            continue;
        };
        let mut device_stream = Element::new("DeviceStream")
            .with_attribute("name", device.name.as_str())
            .with_attribute("uuid", device.uuid.as_str());

        for entry in entries {
            let ids: HashSet<&str> = entry
                .data_items
                .iter()
                .filter(|item| filter_allows(filter.as_ref(), &device.uuid, &item.id))
                .map(|item| item.id.as_str())
                .collect();
            if ids.is_empty() {
                continue;
            }

            let mut partitions = Partitions::default();
            for observation in &slice.observations {
                if observation.device_uuid != device.uuid
                    || !ids.contains(observation.data_item_id.as_str())
                {
                    continue;
                }
                if let Some(item) = entry
                    .data_items
                    .iter()
                    .find(|item| item.id == observation.data_item_id)
                {
                    partitions.push(observation.category, observation_element(observation, item));
                }
            }
            if let Some(component_stream) = partitions.into_component_stream(&entry) {
                device_stream.push_element(component_stream);
            }
        }
        streams.push_element(device_stream);
    }
    root.push_element(streams);
    Ok(root)
}

/// Observation element name for an MTConnect data item type:
/// `AVAILABILITY` → `Availability`, `PATH_FEEDRATE` → `PathFeedrate`.
#[must_use]
pub fn element_name(data_type: &str) -> String {
    data_type
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

fn resolve_filter(
    index: &SchemaIndex,
    devices: &[&DeviceSchema],
    path: Option<&PathFilter>,
) -> Result<Option<HashSet<ItemKey>>, Vec<AgentError>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let uuids: Vec<&str> = devices.iter().map(|device| device.uuid.as_str()).collect();
    let selected = index.filter_data_items(path, &uuids);
    if selected.is_empty() {
        return Err(vec![AgentError::unsupported(&path.to_string())]);
    }
    Ok(Some(selected))
}

fn filter_allows(filter: Option<&HashSet<ItemKey>>, uuid: &str, id: &str) -> bool {
    filter.is_none_or(|selected| selected.contains(&(uuid.to_string(), id.to_string())))
}

#[derive(Default)]
struct Partitions {
    samples: Vec<Element>,
    events: Vec<Element>,
    conditions: Vec<Element>,
}

impl Partitions {
    fn push(&mut self, category: Category, element: Element) {
        match category {
            Category::Sample => self.samples.push(element),
            Category::Event => self.events.push(element),
            Category::Condition => self.conditions.push(element),
        }
    }

    // components with nothing to say are omitted entirely
    fn into_component_stream(self, entry: &ComponentEntry<'_>) -> Option<Element> {
        if self.samples.is_empty() && self.events.is_empty() && self.conditions.is_empty() {
            return None;
        }
        let mut component_stream = Element::new("ComponentStream")
            .with_attribute("component", entry.component_type)
            .with_attribute("componentId", entry.id);
        if let Some(name) = entry.name {
            component_stream.push_attribute("name", name);
        }
        for (wrapper, elements) in [
            ("Samples", self.samples),
            ("Events", self.events),
            ("Condition", self.conditions),
        ] {
            if elements.is_empty() {
                continue;
            }
            let mut list = Element::new(wrapper);
            for element in elements {
                list.push_element(element);
            }
            component_stream.push_element(list);
        }
        Some(component_stream)
    }
}

fn observation_element(observation: &Observation, item: &DataItem) -> Element {
    match &observation.value {
        ObservationValue::Scalar(value) => {
            let mut element = Element::new(element_name(&item.data_type))
                .with_attribute("dataItemId", item.id.as_str())
                .with_attribute("timestamp", format_timestamp(observation.timestamp))
                .with_attribute("sequence", observation.sequence.to_string());
            if let Some(name) = &item.name {
                element.push_attribute("name", name.as_str());
            }
            if let Some(sub_type) = &item.sub_type {
                element.push_attribute("subType", sub_type.as_str());
            }
            element.set_text(value.as_str());
            element
        }
        ObservationValue::Condition(condition) => {
            let mut element = Element::new(condition.level.to_string())
                .with_attribute("dataItemId", item.id.as_str())
                .with_attribute("timestamp", format_timestamp(observation.timestamp))
                .with_attribute("sequence", observation.sequence.to_string())
                .with_attribute("type", item.data_type.as_str());
            if let Some(name) = &item.name {
                element.push_attribute("name", name.as_str());
            }
            if !condition.native_code.is_empty() {
                element.push_attribute("nativeCode", condition.native_code.as_str());
            }
            if !condition.native_severity.is_empty() {
                element.push_attribute("nativeSeverity", condition.native_severity.as_str());
            }
            if !condition.qualifier.is_empty() {
                element.push_attribute("qualifier", condition.qualifier.as_str());
            }
            if !condition.message.is_empty() {
                element.set_text(condition.message.as_str());
            }
            element
        }
    }
}

// a data item that has never produced an observation
fn unavailable_value(item: &DataItem, now: DateTime<Utc>) -> Element {
    let mut element = Element::new(element_name(&item.data_type))
        .with_attribute("dataItemId", item.id.as_str())
        .with_attribute("timestamp", format_timestamp(now));
    if let Some(name) = &item.name {
        element.push_attribute("name", name.as_str());
    }
    element.set_text("UNAVAILABLE");
    element
}

fn unavailable_condition(item: &DataItem, now: DateTime<Utc>) -> Element {
    let mut element = Element::new("Unavailable")
        .with_attribute("dataItemId", item.id.as_str())
        .with_attribute("timestamp", format_timestamp(now))
        .with_attribute("type", item.data_type.as_str());
    if let Some(name) = &item.name {
        element.push_attribute("name", name.as_str());
    }
    element
}
