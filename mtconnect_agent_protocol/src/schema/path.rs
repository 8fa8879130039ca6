// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Restricted XPath filters for `path=` query parameters.
//!
//! The accepted grammar is a sequence of descendant steps, each an element
//! name with at most one attribute-equality predicate:
//!
//! ```text
//! //Axes//DataItem[@type="POSITION"]
//! ```
//!
//! A filter only ever selects data items. Steps before the final one
//! constrain the component ancestry; a path whose final step does not land
//! on a `DataItem` node parses fine but selects nothing.

use std::str::FromStr;

use thiserror::Error;

use super::{Component, DataItem, DeviceSchema};

/// Indicates a `path=` expression was not valid under the restricted
/// grammar.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    /// The expression was empty
    #[error("path expression is empty")]
    Empty,
    /// A step did not start with `//`
    #[error("path steps must start with //")]
    MissingStepSeparator,
    /// A step had no element name
    #[error("path step has no element name")]
    MissingName,
    /// A predicate was not of the form `[@attr="value"]`
    #[error("malformed predicate in path step {0}")]
    MalformedPredicate(String),
    /// An element or attribute name contained an invalid character
    #[error("invalid name {0} in path expression")]
    InvalidName(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PathStep {
    name: String,
    predicate: Option<(String, String)>,
}

/// A parsed restricted-XPath expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathFilter {
    steps: Vec<PathStep>,
}

impl FromStr for PathFilter {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, PathError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        if !trimmed.starts_with("//") {
            return Err(PathError::MissingStepSeparator);
        }

        let mut steps = Vec::new();
        for raw in trimmed.split("//").skip(1) {
            if raw.is_empty() {
                return Err(PathError::MissingName);
            }
            steps.push(parse_step(raw)?);
        }
        Ok(PathFilter { steps })
    }
}

impl std::fmt::Display for PathFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for step in &self.steps {
            write!(f, "//{}", step.name)?;
            if let Some((attr, value)) = &step.predicate {
                write!(f, "[@{attr}=\"{value}\"]")?;
            }
        }
        Ok(())
    }
}

impl PathFilter {
    /// Returns the ids of the data items this filter selects within one
    /// device.
    #[must_use]
    pub fn select(&self, device: &DeviceSchema) -> Vec<String> {
        let mut selected = Vec::new();
        let device_node = NodeAttrs::device(device);
        for item in &device.data_items {
            self.select_item(&[device_node.clone()], item, &mut selected);
        }
        let mut ancestry = vec![device_node];
        for component in &device.components {
            self.select_in_component(&mut ancestry, component, &mut selected);
        }
        selected
    }

    fn select_in_component<'a>(
        &self,
        ancestry: &mut Vec<NodeAttrs<'a>>,
        component: &'a Component,
        selected: &mut Vec<String>,
    ) {
        ancestry.push(NodeAttrs::component(component));
        for item in &component.data_items {
            self.select_item(ancestry, item, selected);
        }
        for child in &component.components {
            self.select_in_component(ancestry, child, selected);
        }
        ancestry.pop();
    }

    fn select_item(&self, ancestry: &[NodeAttrs<'_>], item: &DataItem, selected: &mut Vec<String>) {
        let Some((last, rest)) = self.steps.split_last() else {
            return;
        };
        let item_node = NodeAttrs::data_item(item);
        // the final step must land on the DataItem node itself; earlier
        // steps match the ancestry as an ordered subsequence
        if step_matches(last, &item_node) && subsequence_matches(rest, ancestry) {
            selected.push(item.id.clone());
        }
    }
}

fn parse_step(raw: &str) -> Result<PathStep, PathError> {
    let (name, predicate) = match raw.find('[') {
        None => (raw, None),
        Some(bracket) => {
            let name = &raw[..bracket];
            let inner = raw[bracket..]
                .strip_prefix("[@")
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| PathError::MalformedPredicate(raw.to_string()))?;
            let (attr, quoted) = inner
                .split_once('=')
                .ok_or_else(|| PathError::MalformedPredicate(raw.to_string()))?;
            let value = strip_quotes(quoted)
                .ok_or_else(|| PathError::MalformedPredicate(raw.to_string()))?;
            if !is_valid_name(attr) {
                return Err(PathError::InvalidName(attr.to_string()));
            }
            (name, Some((attr.to_string(), value.to_string())))
        }
    };
    if name.is_empty() {
        return Err(PathError::MissingName);
    }
    if name != "*" && !is_valid_name(name) {
        return Err(PathError::InvalidName(name.to_string()));
    }
    Ok(PathStep {
        name: name.to_string(),
        predicate,
    })
}

fn strip_quotes(quoted: &str) -> Option<&str> {
    quoted
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| {
            quoted
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
        })
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
}

fn subsequence_matches(steps: &[PathStep], nodes: &[NodeAttrs<'_>]) -> bool {
    let mut remaining = steps.iter();
    let mut next = remaining.next();
    for node in nodes {
        match next {
            None => return true,
            Some(step) => {
                if step_matches(step, node) {
                    next = remaining.next();
                }
            }
        }
    }
    next.is_none()
}

fn step_matches(step: &PathStep, node: &NodeAttrs<'_>) -> bool {
    if step.name != "*" && step.name != node.name {
        return false;
    }
    match &step.predicate {
        None => true,
        Some((attr, value)) => node.attr(attr) == Some(value.as_str()),
    }
}

// Flattened attribute view of a schema node, in the vocabulary the device
// description document uses.
#[derive(Clone, Debug)]
struct NodeAttrs<'a> {
    name: &'a str,
    attrs: Vec<(&'static str, &'a str)>,
}

impl<'a> NodeAttrs<'a> {
    fn device(device: &'a DeviceSchema) -> Self {
        NodeAttrs {
            name: "Device",
            attrs: vec![
                ("id", &device.id),
                ("name", &device.name),
                ("uuid", &device.uuid),
            ],
        }
    }

    fn component(component: &'a Component) -> Self {
        let mut attrs = vec![("id", component.id.as_str())];
        if let Some(name) = &component.name {
            attrs.push(("name", name));
        }
        NodeAttrs {
            name: &component.component_type,
            attrs,
        }
    }

    fn data_item(item: &'a DataItem) -> Self {
        let mut attrs = vec![
            ("id", item.id.as_str()),
            ("type", item.data_type.as_str()),
            ("category", category_str(item)),
        ];
        if let Some(name) = &item.name {
            attrs.push(("name", name));
        }
        if let Some(sub_type) = &item.sub_type {
            attrs.push(("subType", sub_type));
        }
        if let Some(units) = &item.units {
            attrs.push(("units", units));
        }
        NodeAttrs {
            name: "DataItem",
            attrs,
        }
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(attr, _)| *attr == name)
            .map(|(_, value)| *value)
    }
}

fn category_str(item: &DataItem) -> &'static str {
    match item.category {
        super::Category::Event => "EVENT",
        super::Category::Sample => "SAMPLE",
        super::Category::Condition => "CONDITION",
    }
}
