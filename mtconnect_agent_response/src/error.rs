// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The agent error taxonomy and `MTConnectError` documents.
//!
//! Query failures never surface as transport errors; they are rendered into
//! an error document and returned with a normal status. Parameter validation
//! accumulates every error it finds, existence checks (`NO_DEVICE`,
//! `ASSET_NOT_FOUND`) stop at the first.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use thiserror::Error;

use mtconnect_agent_protocol::xml::Element;
use mtconnect_agent_store::DataStoreError;

use crate::{AgentInfo, base_header, document_root};

/// Machine-readable error code carried in the `errorCode` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Requested device is not registered
    NoDevice,
    /// Requested asset id is not stored
    AssetNotFound,
    /// A sequence, count, or interval parameter fell outside its bounds
    OutOfRange,
    /// A `path` parameter failed to parse
    InvalidXPath,
    /// A `path` parameter parsed but selects nothing in scope
    Unsupported,
    /// Mutually exclusive parameters were combined
    InvalidRequest,
}

impl ErrorCode {
    /// The wire spelling of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NoDevice => "NO_DEVICE",
            ErrorCode::AssetNotFound => "ASSET_NOT_FOUND",
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::InvalidXPath => "INVALID_XPATH",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One query failure, rendered as an `Error` element.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct AgentError {
    /// Taxonomy code
    pub code: ErrorCode,
    /// Human-readable description, the element body
    pub message: String,
}

impl AgentError {
    /// Creates an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        AgentError {
            code,
            message: message.into(),
        }
    }

    /// `NO_DEVICE` for a device name or uuid.
    pub fn no_device(device: &str) -> Self {
        Self::new(
            ErrorCode::NoDevice,
            format!("Could not find the device {device}"),
        )
    }

    /// `ASSET_NOT_FOUND` for an asset id.
    pub fn asset_not_found(asset_id: &str) -> Self {
        Self::new(
            ErrorCode::AssetNotFound,
            format!("Could not find asset {asset_id}"),
        )
    }

    /// `OUT_OF_RANGE` with the given description.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OutOfRange, message)
    }

    /// `INVALID_XPATH` for a path expression.
    pub fn invalid_xpath(path: &str, detail: impl Display) -> Self {
        Self::new(
            ErrorCode::InvalidXPath,
            format!("The path {path} is invalid: {detail}"),
        )
    }

    /// `UNSUPPORTED` for a path that selects nothing.
    pub fn unsupported(path: &str) -> Self {
        Self::new(
            ErrorCode::Unsupported,
            format!("The path {path} does not reference any data items"),
        )
    }

    /// `INVALID_REQUEST` with the given description.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }
}

impl From<DataStoreError> for AgentError {
    fn from(error: DataStoreError) -> Self {
        AgentError::out_of_range(error.to_string())
    }
}

/// Builds an `MTConnectError` document carrying one or more errors.
#[must_use]
pub fn error_document(info: &AgentInfo, now: DateTime<Utc>, errors: &[AgentError]) -> Element {
    let mut root = document_root("Error", &info.version);
    root.push_element(base_header(info, now));
    let mut list = Element::new("Errors");
    for error in errors {
        let mut element = Element::new("Error").with_attribute("errorCode", error.code.as_str());
        element.set_text(error.message.as_str());
        list.push_element(element);
    }
    root.push_element(list);
    root
}

#[cfg(test)]
mod tests {
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

    #[test]
    fn test_error_document_accumulates() {
        let errors = vec![
            AgentError::out_of_range("'count' must be greater than or equal to 1"),
            AgentError::invalid_request("'at' cannot be used with 'interval'"),
        ];
        let document = error_document(&info(), Utc::now(), &errors);

        assert_eq!(document.name, "MTConnectError");
        let list = document.child("Errors").unwrap();
        let codes: Vec<&str> = list
            .child_elements()
            .filter_map(|error| error.attribute("errorCode"))
            .collect();
        assert_eq!(codes, vec!["OUT_OF_RANGE", "INVALID_REQUEST"]);
    }

    #[test]
    fn test_store_error_maps_to_out_of_range() {
        let error: AgentError = DataStoreError::CountTooSmall.into();
        assert_eq!(error.code, ErrorCode::OutOfRange);
        assert_eq!(error.message, "'count' must be greater than or equal to 1");
    }
}
