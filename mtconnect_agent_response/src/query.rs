// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Typed query descriptors parsed from raw request parameters.
//!
//! Parameter validation is multi-error: everything wrong with a request is
//! reported in one pass rather than one failure at a time.

use std::collections::HashMap;

use crate::error::AgentError;
use mtconnect_agent_protocol::schema::PathFilter;

/// Largest accepted `interval`, in milliseconds.
pub const MAX_INTERVAL_MS: u64 = (i32::MAX as u64) - 1;

/// `count` used by `sample` when the request does not give one.
pub const DEFAULT_SAMPLE_COUNT: usize = 100;

/// Validated parameters of a `current` request.
#[derive(Clone, Debug)]
pub struct CurrentQuery {
    /// Historical sequence to reconstruct, from `at=`
    pub at: Option<u64>,
    /// Data item filter, from `path=`
    pub path: Option<PathFilter>,
    /// Streaming interval in milliseconds, from `interval=`
    pub interval: Option<u64>,
}

/// Validated parameters of a `sample` request.
#[derive(Clone, Debug)]
pub struct SampleQuery {
    /// Starting sequence, from `from=`; defaults to the oldest retained
    pub from: Option<u64>,
    /// Maximum observations per document, from `count=`
    pub count: usize,
    /// Data item filter, from `path=`
    pub path: Option<PathFilter>,
    /// Streaming interval in milliseconds, from `interval=`
    pub interval: Option<u64>,
}

/// Validated parameters of an asset request.
#[derive(Clone, Debug)]
pub struct AssetQuery {
    /// Restrict to one asset type, from `type=`
    pub asset_type: Option<String>,
    /// Maximum assets returned, from `count=`
    pub count: usize,
}

/// Parses and validates `current` parameters.
pub fn parse_current(params: &HashMap<String, String>) -> Result<CurrentQuery, Vec<AgentError>> {
    let mut errors = Vec::new();
    let at = parse_sequence(params, "at", &mut errors);
    let interval = parse_interval(params, &mut errors);
    let path = parse_path(params, &mut errors);

    if at.is_some() && interval.is_some() {
        errors.push(AgentError::invalid_request(
            "'at' cannot be used with 'interval'",
        ));
    }
    if errors.is_empty() {
        Ok(CurrentQuery { at, path, interval })
    } else {
        Err(errors)
    }
}

/// Parses and validates `sample` parameters against the buffer capacity.
pub fn parse_sample(
    params: &HashMap<String, String>,
    buffer_size: usize,
) -> Result<SampleQuery, Vec<AgentError>> {
    let mut errors = Vec::new();
    let from = parse_sequence(params, "from", &mut errors);
    let interval = parse_interval(params, &mut errors);
    let path = parse_path(params, &mut errors);
    let count = parse_count(params, DEFAULT_SAMPLE_COUNT, buffer_size, &mut errors);

    if params.contains_key("at") {
        errors.push(AgentError::invalid_request(
            "'at' cannot be used with 'sample'",
        ));
    }
    if errors.is_empty() {
        Ok(SampleQuery {
            from,
            count,
            path,
            interval,
        })
    } else {
        Err(errors)
    }
}

/// Parses and validates asset parameters against the asset buffer capacity.
pub fn parse_asset(
    params: &HashMap<String, String>,
    asset_buffer_size: usize,
) -> Result<AssetQuery, Vec<AgentError>> {
    let mut errors = Vec::new();
    let count = parse_count(params, asset_buffer_size, asset_buffer_size, &mut errors);
    let asset_type = params.get("type").cloned();
    if errors.is_empty() {
        Ok(AssetQuery { asset_type, count })
    } else {
        Err(errors)
    }
}

fn parse_sequence(
    params: &HashMap<String, String>,
    name: &str,
    errors: &mut Vec<AgentError>,
) -> Option<u64> {
    let raw = params.get(name)?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(AgentError::out_of_range(format!(
                "'{name}' must be a positive integer"
            )));
            None
        }
    }
}

fn parse_interval(params: &HashMap<String, String>, errors: &mut Vec<AgentError>) -> Option<u64> {
    let raw = params.get("interval")?;
    match raw.parse::<u64>() {
        Ok(value) if value <= MAX_INTERVAL_MS => Some(value),
        Ok(_) => {
            errors.push(AgentError::out_of_range(format!(
                "'interval' must be less than or equal to {MAX_INTERVAL_MS}"
            )));
            None
        }
        Err(_) => {
            errors.push(AgentError::out_of_range(
                "'interval' must be a positive integer",
            ));
            None
        }
    }
}

fn parse_path(params: &HashMap<String, String>, errors: &mut Vec<AgentError>) -> Option<PathFilter> {
    let raw = params.get("path")?;
    match raw.parse::<PathFilter>() {
        Ok(filter) => Some(filter),
        Err(error) => {
            errors.push(AgentError::invalid_xpath(raw, error));
            None
        }
    }
}

fn parse_count(
    params: &HashMap<String, String>,
    default: usize,
    maximum: usize,
    errors: &mut Vec<AgentError>,
) -> usize {
    let Some(raw) = params.get("count") else {
        return default.min(maximum);
    };
    match raw.parse::<usize>() {
        Ok(0) => {
            errors.push(AgentError::out_of_range(
                "'count' must be greater than or equal to 1",
            ));
            default.min(maximum)
        }
        Ok(value) if value > maximum => {
            errors.push(AgentError::out_of_range(format!(
                "'count' must be less than or equal to the buffer size of {maximum}"
            )));
            default.min(maximum)
        }
        Ok(value) => value,
        Err(_) => {
            errors.push(AgentError::out_of_range(
                "'count' must be a positive integer",
            ));
            default.min(maximum)
        }
    }
}
