// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded in-memory stores for the MTConnect agent.
//!
//! The [`DataStore`] owns the circular sample buffer, the latest-value
//! snapshot, and the active-condition lists; the [`AssetStore`] owns the
//! asset buffer and the current asset map. Both are single-writer,
//! many-reader: the ingest path takes the write lock, response assembly
//! takes cheap snapshots of `Arc`-shared records.

#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use mtconnect_agent_protocol::schema::Category;
use mtconnect_agent_protocol::shdr::{ConditionValue, ShdrValue};

pub mod asset_store;
pub mod data_store;

pub use asset_store::{Asset, AssetStore, AssetStoreError};
pub use data_store::{CurrentSnapshot, DataStore, DataStoreError, SampleSlice};

/// Key identifying one data item across devices.
pub type ItemKey = (String, String);

/// Value of one observation.
#[derive(Clone, Debug, PartialEq)]
pub enum ObservationValue {
    /// EVENT/SAMPLE value as reported
    Scalar(String),
    /// CONDITION tuple
    Condition(ConditionValue),
}

impl From<ShdrValue> for ObservationValue {
    fn from(value: ShdrValue) -> Self {
        match value {
            ShdrValue::Scalar(scalar) => ObservationValue::Scalar(scalar),
            ShdrValue::Condition(condition) => ObservationValue::Condition(condition),
        }
    }
}

/// One value written by the ingest pipeline, identified for its lifetime by
/// a globally monotonic sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// Globally monotonic sequence number
    pub sequence: u64,
    /// Originating device
    pub device_uuid: String,
    /// Resolved data item id
    pub data_item_id: String,
    /// Category of the data item
    pub category: Category,
    /// Timestamp from the adapter line
    pub timestamp: DateTime<Utc>,
    /// The observed value
    pub value: ObservationValue,
}

impl Observation {
    /// Condition fields of this observation, if it is one.
    #[must_use]
    pub fn condition(&self) -> Option<&ConditionValue> {
        match &self.value {
            ObservationValue::Condition(condition) => Some(condition),
            ObservationValue::Scalar(_) => None,
        }
    }
}
