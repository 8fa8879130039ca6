// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loading device schemas from an MTConnect device description file.
//!
//! Only the structure the agent acts on is extracted: devices, the
//! component tree, and data item descriptors. Everything else in the
//! description (descriptions, configurations, references) is ignored.

use std::path::Path;

use thiserror::Error;

use mtconnect_agent_protocol::schema::{Component, DataItem, DeviceSchema, SchemaError};
use mtconnect_agent_protocol::xml::{Element, XmlError};

/// Indicates the device description file could not be loaded.
#[derive(Error, Debug)]
pub enum DeviceFileError {
    /// The file could not be read
    #[error(transparent)]
    FileReadError(#[from] std::io::Error),
    /// The XML was malformed
    #[error(transparent)]
    XmlParseError(#[from] XmlError),
    /// A required attribute was missing
    #[error("missing attribute {attribute} on element {element}")]
    MissingAttribute {
        /// Element tag name
        element: String,
        /// The absent attribute
        attribute: String,
    },
    /// A data item carried an invalid category
    #[error(transparent)]
    SchemaError(#[from] SchemaError),
    /// The document contained no devices
    #[error("device description contains no Device elements")]
    NoDevices,
}

/// Reads and parses a device description file.
pub fn load_devices(path: &Path) -> Result<Vec<DeviceSchema>, DeviceFileError> {
    let text = std::fs::read_to_string(path)?;
    parse_devices(&text)
}

/// Parses an `MTConnectDevices` document into device schemas.
pub fn parse_devices(text: &str) -> Result<Vec<DeviceSchema>, DeviceFileError> {
    let root = Element::parse_str(text)?;
    let devices: Vec<DeviceSchema> = root
        .child("Devices")
        .ok_or(DeviceFileError::NoDevices)?
        .child_elements()
        .filter(|element| element.name == "Device")
        .map(parse_device)
        .collect::<Result<_, _>>()?;
    if devices.is_empty() {
        return Err(DeviceFileError::NoDevices);
    }
    Ok(devices)
}

fn parse_device(element: &Element) -> Result<DeviceSchema, DeviceFileError> {
    Ok(DeviceSchema {
        uuid: required(element, "uuid")?,
        id: required(element, "id")?,
        name: required(element, "name")?,
        data_items: parse_data_items(element)?,
        components: parse_components(element)?,
    })
}

fn parse_component(element: &Element) -> Result<Component, DeviceFileError> {
    Ok(Component {
        component_type: element.name.clone(),
        id: required(element, "id")?,
        name: element.attribute("name").map(str::to_string),
        data_items: parse_data_items(element)?,
        components: parse_components(element)?,
    })
}

fn parse_components(parent: &Element) -> Result<Vec<Component>, DeviceFileError> {
    match parent.child("Components") {
        None => Ok(Vec::new()),
        Some(list) => list.child_elements().map(parse_component).collect(),
    }
}

fn parse_data_items(parent: &Element) -> Result<Vec<DataItem>, DeviceFileError> {
    let Some(list) = parent.child("DataItems") else {
        return Ok(Vec::new());
    };
    list.child_elements()
        .filter(|element| element.name == "DataItem")
        .map(|element| {
            Ok(DataItem {
                id: required(element, "id")?,
                name: element.attribute("name").map(str::to_string),
                data_type: required(element, "type")?,
                sub_type: element.attribute("subType").map(str::to_string),
                category: required(element, "category")?.parse()?,
                units: element.attribute("units").map(str::to_string),
                native_units: element.attribute("nativeUnits").map(str::to_string),
            })
        })
        .collect()
}

fn required(element: &Element, attribute: &str) -> Result<String, DeviceFileError> {
    element
        .attribute(attribute)
        .map(str::to_string)
        .ok_or_else(|| DeviceFileError::MissingAttribute {
            element: element.name.clone(),
            attribute: attribute.to_string(),
        })
}
