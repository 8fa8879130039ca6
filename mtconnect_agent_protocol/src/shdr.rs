// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Parsing for the SHDR adapter line protocol.
//!
//! One line is a `|`-separated record: a timestamp followed by key/value
//! groups. How many tokens a key consumes depends on the data item category
//! the key resolves to (1 for EVENT/SAMPLE, 5 for CONDITION), so parsing
//! requires the [`SchemaIndex`] of the originating device. Reserved `@…@`
//! keys carry asset commands instead of observations.
//!
//! The parser never panics across the ingest boundary: unknown keys are
//! skipped with a log entry and malformed lines produce an error the caller
//! is expected to log and drop.

use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use thiserror::Error;

use crate::schema::{Category, SchemaIndex};

const ASSET_UPSERT_KEY: &str = "@ASSET@";
const ASSET_UPDATE_KEY: &str = "@UPDATE_ASSET@";
const ASSET_REMOVE_KEY: &str = "@REMOVE_ASSET@";

/// Number of tokens a CONDITION key consumes: level, nativeCode,
/// nativeSeverity, qualifier, message.
const CONDITION_TOKEN_COUNT: usize = 5;

/// Indicates a SHDR line could not be parsed and must be discarded.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShdrError {
    /// The line was empty or contained no key fields
    #[error("line has no fields")]
    EmptyLine,
    /// The leading field was not an ISO-8601 timestamp
    #[error("malformed timestamp {0}")]
    MalformedTimestamp(String),
    /// A key declared more value tokens than the line had left
    #[error("line truncated after key {0}")]
    Truncated(String),
    /// An asset command was missing its required fields
    #[error("malformed asset command {0}")]
    MalformedAssetCommand(String),
    /// A condition level was not NORMAL, WARNING, FAULT, or UNAVAILABLE
    #[error("unknown condition level {0}")]
    UnknownConditionLevel(String),
}

/// Severity level of a condition observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionLevel {
    /// No active fault; clears by native code (or entirely, with no code)
    Normal,
    /// Degraded but operating
    Warning,
    /// Failure
    Fault,
    /// The condition state cannot be determined
    Unavailable,
}

impl Display for ConditionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionLevel::Normal => write!(f, "Normal"),
            ConditionLevel::Warning => write!(f, "Warning"),
            ConditionLevel::Fault => write!(f, "Fault"),
            ConditionLevel::Unavailable => write!(f, "Unavailable"),
        }
    }
}

impl FromStr for ConditionLevel {
    type Err = ShdrError;

    fn from_str(s: &str) -> Result<Self, ShdrError> {
        match s.to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(ConditionLevel::Normal),
            "WARNING" => Ok(ConditionLevel::Warning),
            "FAULT" => Ok(ConditionLevel::Fault),
            "UNAVAILABLE" => Ok(ConditionLevel::Unavailable),
            other => Err(ShdrError::UnknownConditionLevel(other.to_string())),
        }
    }
}

/// The five condition fields, with empty trailing fields preserved as empty
/// strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionValue {
    /// Severity level
    pub level: ConditionLevel,
    /// Device-native alarm code keying the active-condition list
    pub native_code: String,
    /// Device-native severity
    pub native_severity: String,
    /// Qualifier such as `HIGH` or `LOW`
    pub qualifier: String,
    /// Human-readable description
    pub message: String,
}

/// Value carried by one SHDR key.
#[derive(Clone, Debug, PartialEq)]
pub enum ShdrValue {
    /// Single-token EVENT/SAMPLE value
    Scalar(String),
    /// Five-token CONDITION value
    Condition(ConditionValue),
}

/// One resolved key/value group from a line. `key` is the data item name or
/// id exactly as the adapter sent it.
#[derive(Clone, Debug, PartialEq)]
pub struct ShdrEntry {
    /// Data item name or id as sent
    pub key: String,
    /// Parsed value with category-appropriate arity
    pub value: ShdrValue,
}

/// An asset command embedded in a SHDR line.
#[derive(Clone, Debug, PartialEq)]
pub enum AssetCommand {
    /// `@ASSET@|id|type|xml` — create or replace an asset
    Upsert {
        /// Asset id
        asset_id: String,
        /// Asset type, e.g. `CuttingTool`
        asset_type: String,
        /// Raw XML body, the remainder of the line
        body: String,
    },
    /// `@UPDATE_ASSET@|id|key|value…` — patch nested elements of an asset
    Update {
        /// Asset id
        asset_id: String,
        /// Element-name/new-text pairs, in line order
        patches: Vec<(String, String)>,
    },
    /// `@REMOVE_ASSET@|id` — tombstone an asset
    Remove {
        /// Asset id
        asset_id: String,
    },
}

/// Everything one line produced: observations and/or asset commands, all
/// stamped with the line timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLine {
    /// Line timestamp, normalized to UTC
    pub timestamp: DateTime<Utc>,
    /// Data item entries in line order
    pub entries: Vec<ShdrEntry>,
    /// Asset commands in line order
    pub asset_commands: Vec<AssetCommand>,
}

/// Parses one SHDR line originating from the device registered under
/// `uuid`.
///
/// Keys that do not resolve to a data item of that device are skipped (one
/// value token is consumed for them). A malformed timestamp or a line too
/// short for a key's declared arity discards the whole line.
pub fn parse_line(line: &str, uuid: &str, index: &SchemaIndex) -> Result<ParsedLine, ShdrError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let tokens: Vec<&str> = trimmed.split('|').collect();
    if tokens.len() < 2 {
        return Err(ShdrError::EmptyLine);
    }

    let timestamp = parse_timestamp(tokens[0])
        .ok_or_else(|| ShdrError::MalformedTimestamp(tokens[0].to_string()))?;

    let mut entries = Vec::new();
    let mut asset_commands = Vec::new();
    let mut position = 1;
    while position < tokens.len() {
        let key = tokens[position];
        if key.is_empty() && position == tokens.len() - 1 {
            // trailing separator
            break;
        }
        match key {
            ASSET_UPSERT_KEY => {
                // the XML body is the remainder of the line and may itself
                // contain separators
                if tokens.len() < position + 4 {
                    return Err(ShdrError::MalformedAssetCommand(key.to_string()));
                }
                asset_commands.push(AssetCommand::Upsert {
                    asset_id: tokens[position + 1].to_string(),
                    asset_type: tokens[position + 2].to_string(),
                    body: tokens[position + 3..].join("|"),
                });
                position = tokens.len();
            }
            ASSET_UPDATE_KEY => {
                // id plus at least one key/value pair
                let remainder = &tokens[position + 1..];
                if remainder.len() < 3 || remainder.len() % 2 == 0 {
                    return Err(ShdrError::MalformedAssetCommand(key.to_string()));
                }
                asset_commands.push(AssetCommand::Update {
                    asset_id: remainder[0].to_string(),
                    patches: remainder[1..]
                        .chunks_exact(2)
                        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                        .collect(),
                });
                position = tokens.len();
            }
            ASSET_REMOVE_KEY => {
                if tokens.len() < position + 2 {
                    return Err(ShdrError::MalformedAssetCommand(key.to_string()));
                }
                asset_commands.push(AssetCommand::Remove {
                    asset_id: tokens[position + 1].to_string(),
                });
                position += 2;
            }
            _ => {
                let Some(item) = index.data_item(uuid, key) else {
                    warn!("skipping unknown data item key {key} from device {uuid}");
                    position += 2;
                    continue;
                };
                match item.category {
                    Category::Event | Category::Sample => {
                        let Some(value) = tokens.get(position + 1) else {
                            return Err(ShdrError::Truncated(key.to_string()));
                        };
                        entries.push(ShdrEntry {
                            key: key.to_string(),
                            value: ShdrValue::Scalar((*value).to_string()),
                        });
                        position += 2;
                    }
                    Category::Condition => {
                        if tokens.len() < position + 1 + CONDITION_TOKEN_COUNT {
                            return Err(ShdrError::Truncated(key.to_string()));
                        }
                        let fields = &tokens[position + 1..position + 1 + CONDITION_TOKEN_COUNT];
                        match fields[0].parse::<ConditionLevel>() {
                            Ok(level) => entries.push(ShdrEntry {
                                key: key.to_string(),
                                value: ShdrValue::Condition(ConditionValue {
                                    level,
                                    native_code: fields[1].to_string(),
                                    native_severity: fields[2].to_string(),
                                    qualifier: fields[3].to_string(),
                                    message: fields[4].to_string(),
                                }),
                            }),
                            Err(_) => {
                                warn!(
                                    "skipping condition {key} with unknown level {} from device {uuid}",
                                    fields[0]
                                );
                            }
                        }
                        position += 1 + CONDITION_TOKEN_COUNT;
                    }
                }
            }
        }
    }

    Ok(ParsedLine {
        timestamp,
        entries,
        asset_commands,
    })
}

/// Parses an ISO-8601 UTC timestamp. Fractional seconds to microsecond
/// precision are accepted; the trailing `Z` (or a numeric offset) is
/// optional, with a bare local-format time read as UTC.
#[must_use]
pub fn parse_timestamp(token: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(token) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
