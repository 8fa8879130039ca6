// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The circular sample buffer and latest-value maps.
//!
//! All ingest goes through [`DataStore::ingest`] under a single write lock,
//! which is what keeps sequence allocation, buffer append, and snapshot
//! maintenance one atomic step: a reader that observes `last_sequence = L`
//! sees every observation with sequence ≤ L fully applied.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::RwLock;
use thiserror::Error;

use mtconnect_agent_protocol::schema::{Category, SchemaIndex};
use mtconnect_agent_protocol::shdr::{ConditionLevel, ShdrEntry, ShdrValue};

use crate::{ItemKey, Observation, ObservationValue};

/// Default capacity of the sample buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 10;

/// Indicates a query fell outside the buffer bounds.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DataStoreError {
    /// `count` below the minimum
    #[error("'count' must be greater than or equal to 1")]
    CountTooSmall,
    /// `count` above the buffer capacity
    #[error("'count' must be less than or equal to the buffer size of {0}")]
    CountTooLarge(usize),
    /// A sequence parameter outside the retained window
    #[error("sequence {sequence} is outside the buffer range of {first} to {last}")]
    SequenceOutOfRange {
        /// The offending parameter value
        sequence: u64,
        /// Oldest retained sequence
        first: u64,
        /// Newest retained sequence
        last: u64,
    },
}

/// A consistent view of the latest values, tagged with the buffer bounds at
/// the time it was taken.
#[derive(Clone, Debug)]
pub struct CurrentSnapshot {
    /// Oldest retained sequence
    pub first_sequence: u64,
    /// Newest allocated sequence
    pub last_sequence: u64,
    /// `last_sequence + 1`
    pub next_sequence: u64,
    /// Latest EVENT/SAMPLE observation per data item
    pub values: HashMap<ItemKey, Arc<Observation>>,
    /// Active condition entries per data item, in arrival order
    pub conditions: HashMap<ItemKey, Vec<Arc<Observation>>>,
    /// For condition items whose active list is empty, the observation that
    /// cleared it
    pub cleared: HashMap<ItemKey, Arc<Observation>>,
}

/// An ordered slice of the buffer returned by [`DataStore::sample`].
#[derive(Clone, Debug, PartialEq)]
pub struct SampleSlice {
    /// Oldest retained sequence at query time
    pub first_sequence: u64,
    /// Newest allocated sequence at query time
    pub last_sequence: u64,
    /// Where the next `sample` request should continue from
    pub next_sequence: u64,
    /// Observations in sequence order
    pub observations: Vec<Arc<Observation>>,
}

#[derive(Debug, Default)]
struct State {
    buffer: VecDeque<Arc<Observation>>,
    next_sequence: u64,
    values: HashMap<ItemKey, Arc<Observation>>,
    last: HashMap<ItemKey, Arc<Observation>>,
    conditions: HashMap<ItemKey, Vec<Arc<Observation>>>,
    cleared: HashMap<ItemKey, Arc<Observation>>,
}

impl State {
    fn first_sequence(&self) -> u64 {
        self.buffer
            .front()
            .map_or(self.next_sequence, |observation| observation.sequence)
    }

    fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }
}

/// Process-wide observation store: one circular buffer and one set of
/// latest-value maps shared by every device.
#[derive(Debug)]
pub struct DataStore {
    capacity: usize,
    state: RwLock<State>,
}

impl DataStore {
    /// Creates a store retaining at most `capacity` observations. A zero
    /// capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        DataStore {
            capacity: capacity.max(1),
            state: RwLock::new(State {
                next_sequence: 1,
                ..State::default()
            }),
        }
    }

    /// Buffer capacity fixed at construction.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current `(first, last, next)` sequence bounds.
    #[must_use]
    pub fn bounds(&self) -> (u64, u64, u64) {
        let state = self.state.read();
        (
            state.first_sequence(),
            state.last_sequence(),
            state.next_sequence,
        )
    }

    /// Applies one parsed SHDR entry from device `uuid`.
    ///
    /// Returns the allocated sequence number, or `None` when the entry was
    /// dropped: unknown key, value arity not matching the data item
    /// category, or a duplicate of the current value (non-CONDITION only —
    /// suppressed duplicates consume no sequence and do not advance the
    /// prior-value map).
    pub fn ingest(
        &self,
        uuid: &str,
        entry: &ShdrEntry,
        timestamp: DateTime<Utc>,
        index: &SchemaIndex,
    ) -> Option<u64> {
        let Some(item) = index.data_item(uuid, &entry.key) else {
            warn!("dropping observation for unknown data item {} on device {uuid}", entry.key);
            return None;
        };
        match (&entry.value, item.category) {
            (ShdrValue::Scalar(_), Category::Event | Category::Sample)
            | (ShdrValue::Condition(_), Category::Condition) => {}
            _ => {
                warn!(
                    "dropping observation for {}: value does not match category {}",
                    entry.key, item.category
                );
                return None;
            }
        }

        let key: ItemKey = (uuid.to_string(), item.id.clone());
        let mut state = self.state.write();
        let state = &mut *state;

        if let ShdrValue::Scalar(scalar) = &entry.value {
            if let Some(current) = state.values.get(&key) {
                if current.value == ObservationValue::Scalar(scalar.clone()) {
                    return None;
                }
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let observation = Arc::new(Observation {
            sequence,
            device_uuid: uuid.to_string(),
            data_item_id: item.id.clone(),
            category: item.category,
            timestamp,
            value: entry.value.clone().into(),
        });

        state.buffer.push_back(observation.clone());
        if state.buffer.len() > self.capacity {
            state.buffer.pop_front();
        }

        match item.category {
            Category::Event | Category::Sample => {
                if let Some(previous) = state.values.insert(key.clone(), observation) {
                    state.last.insert(key, previous);
                }
            }
            Category::Condition => {
                apply_condition(&observation, &mut state.conditions, &mut state.cleared);
            }
        }
        Some(sequence)
    }

    /// Prior distinct value of a data item, if any.
    #[must_use]
    pub fn last_value(&self, uuid: &str, data_item_id: &str) -> Option<Arc<Observation>> {
        self.state
            .read()
            .last
            .get(&(uuid.to_string(), data_item_id.to_string()))
            .cloned()
    }

    /// Snapshot of the latest values.
    #[must_use]
    pub fn current(&self) -> CurrentSnapshot {
        let state = self.state.read();
        CurrentSnapshot {
            first_sequence: state.first_sequence(),
            last_sequence: state.last_sequence(),
            next_sequence: state.next_sequence,
            values: state.values.clone(),
            conditions: state.conditions.clone(),
            cleared: state.cleared.clone(),
        }
    }

    /// Reconstruction of the latest values as they stood just after
    /// `sequence` was applied, by replaying the retained buffer prefix onto
    /// empty maps.
    ///
    /// The prior-value map is not reconstructed; the snapshot's sequence
    /// bounds reflect the store at call time. Fails when `sequence` has been
    /// evicted or not yet allocated.
    pub fn current_at(&self, sequence: u64) -> Result<CurrentSnapshot, DataStoreError> {
        let state = self.state.read();
        let first = state.first_sequence();
        let last = state.last_sequence();
        if sequence < first || sequence > last {
            return Err(DataStoreError::SequenceOutOfRange {
                sequence,
                first,
                last,
            });
        }

        let mut values = HashMap::new();
        let mut conditions = HashMap::new();
        let mut cleared = HashMap::new();
        for observation in &state.buffer {
            if observation.sequence > sequence {
                break;
            }
            match &observation.value {
                ObservationValue::Scalar(_) => {
                    let key = (
                        observation.device_uuid.clone(),
                        observation.data_item_id.clone(),
                    );
                    values.insert(key, observation.clone());
                }
                ObservationValue::Condition(_) => {
                    apply_condition(observation, &mut conditions, &mut cleared);
                }
            }
        }
        Ok(CurrentSnapshot {
            first_sequence: first,
            last_sequence: last,
            next_sequence: state.next_sequence,
            values,
            conditions,
            cleared,
        })
    }

    /// Ordered slice `[from, min(from + count - 1, last_sequence)]` of the
    /// buffer.
    ///
    /// `from` may equal `next_sequence`, returning an empty slice; that is
    /// what lets a streaming client poll for observations that have not
    /// arrived yet.
    pub fn sample(&self, from: u64, count: usize) -> Result<SampleSlice, DataStoreError> {
        if count == 0 {
            return Err(DataStoreError::CountTooSmall);
        }
        if count > self.capacity {
            return Err(DataStoreError::CountTooLarge(self.capacity));
        }

        let state = self.state.read();
        let first = state.first_sequence();
        let last = state.last_sequence();
        if from < first || from > state.next_sequence {
            return Err(DataStoreError::SequenceOutOfRange {
                sequence: from,
                first,
                last,
            });
        }

        let end = from.saturating_add(count as u64);
        let observations = state
            .buffer
            .iter()
            .skip(usize::try_from(from.saturating_sub(first)).unwrap_or(usize::MAX))
            .take_while(|observation| observation.sequence < end)
            .cloned()
            .collect();
        Ok(SampleSlice {
            first_sequence: first,
            last_sequence: last,
            next_sequence: end.min(state.next_sequence),
            observations,
        })
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

// The two-tier clear rule: NORMAL (or UNAVAILABLE) with an empty nativeCode
// clears the whole list, NORMAL with a code clears that code, anything else
// upserts by code. A clearing observation is remembered so `current` can
// report it for an empty list.
fn apply_condition(
    observation: &Arc<Observation>,
    conditions: &mut HashMap<ItemKey, Vec<Arc<Observation>>>,
    cleared: &mut HashMap<ItemKey, Arc<Observation>>,
) {
    let Some(condition) = observation.condition() else {
        return;
    };
    let key = (
        observation.device_uuid.clone(),
        observation.data_item_id.clone(),
    );
    let active = conditions.entry(key.clone()).or_default();
    match condition.level {
        ConditionLevel::Normal | ConditionLevel::Unavailable
            if condition.native_code.is_empty() =>
        {
            active.clear();
            cleared.insert(key, observation.clone());
        }
        ConditionLevel::Normal => {
            active.retain(|entry| {
                entry
                    .condition()
                    .is_none_or(|existing| existing.native_code != condition.native_code)
            });
            if active.is_empty() {
                cleared.insert(key, observation.clone());
            }
        }
        ConditionLevel::Unavailable => {
            active.clear();
            cleared.insert(key, observation.clone());
        }
        ConditionLevel::Warning | ConditionLevel::Fault => {
            match active.iter_mut().find(|entry| {
                entry
                    .condition()
                    .is_some_and(|existing| existing.native_code == condition.native_code)
            }) {
                Some(entry) => *entry = observation.clone(),
                None => active.push(observation.clone()),
            }
            cleared.remove(&key);
        }
    }
}
