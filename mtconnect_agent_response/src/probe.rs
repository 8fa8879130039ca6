// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `MTConnectDevices` documents for `probe` requests.

use chrono::{DateTime, Utc};

use mtconnect_agent_protocol::schema::{Component, DataItem, SchemaIndex};
use mtconnect_agent_protocol::xml::Element;

use crate::error::AgentError;
use crate::{AgentInfo, base_header, document_root, resolve_devices};

/// Builds the device description document for the selected devices (all
/// registered devices when `selection` is `None`).
pub fn probe(
    info: &AgentInfo,
    index: &SchemaIndex,
    selection: Option<&[String]>,
    asset_count: usize,
    now: DateTime<Utc>,
) -> Result<Element, Vec<AgentError>> {
    let devices = resolve_devices(index, selection)?;

    let mut root = document_root("Devices", &info.version);
    let header = base_header(info, now)
        .with_attribute("assetBufferSize", info.asset_buffer_size.to_string())
        .with_attribute("assetCount", asset_count.to_string());
    root.push_element(header);

    let mut list = Element::new("Devices");
    for device in devices {
        let mut element = Element::new("Device")
            .with_attribute("id", device.id.as_str())
            .with_attribute("name", device.name.as_str())
            .with_attribute("uuid", device.uuid.as_str());
        append_data_items(&mut element, &device.data_items);
        append_components(&mut element, &device.components);
        list.push_element(element);
    }
    root.push_element(list);
    Ok(root)
}

fn append_data_items(parent: &mut Element, items: &[DataItem]) {
    if items.is_empty() {
        return;
    }
    let mut list = Element::new("DataItems");
    for item in items {
        let mut element = Element::new("DataItem")
            .with_attribute("category", item.category.to_string())
            .with_attribute("id", item.id.as_str())
            .with_attribute("type", item.data_type.as_str());
        if let Some(name) = &item.name {
            element.push_attribute("name", name.as_str());
        }
        if let Some(sub_type) = &item.sub_type {
            element.push_attribute("subType", sub_type.as_str());
        }
        if let Some(units) = &item.units {
            element.push_attribute("units", units.as_str());
        }
        if let Some(native_units) = &item.native_units {
            element.push_attribute("nativeUnits", native_units.as_str());
        }
        list.push_element(element);
    }
    parent.push_element(list);
}

fn append_components(parent: &mut Element, components: &[Component]) {
    if components.is_empty() {
        return;
    }
    let mut list = Element::new("Components");
    for component in components {
        let mut element =
            Element::new(component.component_type.as_str()).with_attribute("id", component.id.as_str());
        if let Some(name) = &component.name {
            element.push_attribute("name", name.as_str());
        }
        append_data_items(&mut element, &component.data_items);
        append_components(&mut element, &component.components);
        list.push_element(element);
    }
    parent.push_element(list);
}

#[cfg(test)]
mod tests {
    use mtconnect_agent_protocol::schema::{Category, DeviceSchema};

    use crate::ErrorCode;

    use super::*;

    fn info() -> AgentInfo {
        AgentInfo {
            sender: "agent".to_string(),
            instance_id: 7,
            version: "1.3".to_string(),
            buffer_size: 10,
            asset_buffer_size: 1024,
        }
    }

    fn index() -> SchemaIndex {
        let device = DeviceSchema {
            uuid: "000".to_string(),
            id: "dev".to_string(),
            name: "VMC-3Axis".to_string(),
            data_items: vec![DataItem {
                id: "dtop_1".to_string(),
                name: Some("avail".to_string()),
                data_type: "AVAILABILITY".to_string(),
                sub_type: None,
                category: Category::Event,
                units: None,
                native_units: None,
            }],
            components: vec![Component {
                component_type: "Axes".to_string(),
                id: "ax".to_string(),
                name: Some("base".to_string()),
                data_items: vec![DataItem {
                    id: "x1".to_string(),
                    name: Some("Xact".to_string()),
                    data_type: "POSITION".to_string(),
                    sub_type: Some("ACTUAL".to_string()),
                    category: Category::Sample,
                    units: Some("MILLIMETER".to_string()),
                    native_units: None,
                }],
                components: vec![],
            }],
        };
        let mut index = SchemaIndex::new();
        index.register(device).unwrap();
        index
    }

    #[test]
    fn test_probe_reproduces_device_tree() {
        let document = probe(&info(), &index(), None, 0, Utc::now()).unwrap();
        assert_eq!(document.name, "MTConnectDevices");

        let device = document.child("Devices").unwrap().child("Device").unwrap();
        assert_eq!(device.attribute("uuid"), Some("000"));
        let items = device.child("DataItems").unwrap();
        let avail = items.child("DataItem").unwrap();
        assert_eq!(avail.attribute("category"), Some("EVENT"));
        assert_eq!(avail.attribute("type"), Some("AVAILABILITY"));

        let axes = device.child("Components").unwrap().child("Axes").unwrap();
        let position = axes.child("DataItems").unwrap().child("DataItem").unwrap();
        assert_eq!(position.attribute("subType"), Some("ACTUAL"));
        assert_eq!(position.attribute("units"), Some("MILLIMETER"));
    }

    #[test]
    fn test_probe_header_reports_asset_sizes() {
        let document = probe(&info(), &index(), None, 3, Utc::now()).unwrap();
        let header = document.child("Header").unwrap();
        assert_eq!(header.attribute("assetBufferSize"), Some("1024"));
        assert_eq!(header.attribute("assetCount"), Some("3"));
        assert_eq!(header.attribute("bufferSize"), Some("10"));
    }

    #[test]
    fn test_probe_selects_by_name_or_uuid() {
        let selection = vec!["VMC-3Axis".to_string()];
        let document = probe(&info(), &index(), Some(&selection), 0, Utc::now()).unwrap();
        assert_eq!(
            document.child("Devices").unwrap().child_elements().count(),
            1
        );

        let unknown = vec!["nope".to_string()];
        let errors = probe(&info(), &index(), Some(&unknown), 0, Utc::now()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::NoDevice);
    }
}
