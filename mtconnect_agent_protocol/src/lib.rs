// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! SHDR line protocol and MTConnect device schema primitives.
//!
//! This crate holds the pieces of the agent that are pure data-in/data-out:
//! the SHDR adapter line parser, the device schema model and its lookup
//! index, and the XML document tree that responses are assembled into.

#![warn(missing_docs)]

use chrono::{DateTime, Utc};

pub mod schema;
pub mod shdr;
pub mod xml;

/// Formats a timestamp the way MTConnect documents expect it, UTC with
/// microsecond precision and a trailing `Z`.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_format_timestamp_microseconds() {
        let timestamp = Utc
            .with_ymd_and_hms(2014, 8, 11, 8, 32, 54)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(28_533))
            .unwrap();
        assert_eq!(format_timestamp(timestamp), "2014-08-11T08:32:54.028533Z");
    }
}
