// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device schema model and lookup index.
//!
//! A [`DeviceSchema`] is the already-parsed shape of one device description:
//! a tree of components carrying data item descriptors. The agent receives
//! these from a loader at startup and never mutates them; all runtime lookups
//! go through the [`SchemaIndex`].

use std::fmt::{self, Display};
use std::str::FromStr;

use thiserror::Error;

mod index;
mod path;

pub use index::{ComponentEntry, SchemaIndex};
pub use path::{PathError, PathFilter};

/// Category of a data item, controlling both SHDR value arity and which
/// partition of a component stream the observations land in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    /// Discrete state change
    Event,
    /// Continuous numeric reading
    Sample,
    /// Active alarm list
    Condition,
}

impl Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Event => write!(f, "EVENT"),
            Category::Sample => write!(f, "SAMPLE"),
            Category::Condition => write!(f, "CONDITION"),
        }
    }
}

impl FromStr for Category {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, SchemaError> {
        match s {
            "EVENT" => Ok(Category::Event),
            "SAMPLE" => Ok(Category::Sample),
            "CONDITION" => Ok(Category::Condition),
            other => Err(SchemaError::UnknownCategory(other.to_string())),
        }
    }
}

/// Descriptor for a single named signal on a device.
#[derive(Clone, Debug, PartialEq)]
pub struct DataItem {
    /// Unique within the owning device
    pub id: String,
    /// Optional; unique within the owning device when present
    pub name: Option<String>,
    /// MTConnect type, e.g. `AVAILABILITY` or `PATH_POSITION`
    pub data_type: String,
    /// MTConnect subType
    pub sub_type: Option<String>,
    /// Category, which also fixes the SHDR value arity
    pub category: Category,
    /// Engineering units reported to clients
    pub units: Option<String>,
    /// Units the adapter reports in
    pub native_units: Option<String>,
}

/// An internal node of the device tree, e.g. `Axes` or `Controller`.
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    /// Component kind, used as the XML element name
    pub component_type: String,
    /// Unique within the owning device
    pub id: String,
    /// Human-readable name
    pub name: Option<String>,
    /// Data items owned directly by this component
    pub data_items: Vec<DataItem>,
    /// Child components
    pub components: Vec<Component>,
}

/// The root of one device description.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSchema {
    /// Stable identifier, the key for everything at runtime
    pub uuid: String,
    /// Element id from the description document
    pub id: String,
    /// Human-readable name, resolvable to the uuid via the index
    pub name: String,
    /// Data items attached directly to the device element
    pub data_items: Vec<DataItem>,
    /// Top-level components
    pub components: Vec<Component>,
}

/// Indicates an error occurred while registering or interpreting a device
/// schema.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A device with the same uuid is already registered; the existing
    /// registration wins
    #[error("device uuid {0} is already registered")]
    DuplicateUuid(String),
    /// Two data items within one device share an id
    #[error("data item id {0} appears more than once in device {1}")]
    DuplicateDataItemId(String, String),
    /// Two data items within one device share a name
    #[error("data item name {0} appears more than once in device {1}")]
    DuplicateDataItemName(String, String),
    /// A category string was not EVENT, SAMPLE, or CONDITION
    #[error("unknown data item category {0}")]
    UnknownCategory(String),
}
