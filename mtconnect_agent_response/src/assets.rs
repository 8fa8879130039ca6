// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `MTConnectAssets` documents for asset requests.

use chrono::{DateTime, Utc};

use mtconnect_agent_protocol::format_timestamp;
use mtconnect_agent_protocol::xml::Element;
use mtconnect_agent_store::{Asset, AssetStore};

use crate::error::AgentError;
use crate::query::AssetQuery;
use crate::{AgentInfo, base_header, document_root};

/// Builds the asset document.
///
/// With `ids`, each listed asset is returned (including removed ones, so a
/// client can observe the tombstone); the first unknown id fails the request
/// with a single `ASSET_NOT_FOUND`. Without `ids`, the newest non-removed
/// assets are returned, filtered and capped by the query.
pub fn assets(
    info: &AgentInfo,
    store: &AssetStore,
    ids: Option<&[String]>,
    query: &AssetQuery,
    now: DateTime<Utc>,
) -> Result<Element, Vec<AgentError>> {
    let selected = match ids {
        Some(ids) => {
            let mut selected = Vec::with_capacity(ids.len());
            for id in ids {
                match store.asset(id) {
                    Some(asset) => selected.push(asset),
                    None => return Err(vec![AgentError::asset_not_found(id)]),
                }
            }
            selected
        }
        None => store.list(query.asset_type.as_deref(), query.count),
    };

    let mut root = document_root("Assets", &info.version);
    root.push_element(
        base_header(info, now)
            .with_attribute("assetBufferSize", info.asset_buffer_size.to_string())
            .with_attribute("assetCount", store.count().to_string()),
    );

    let mut list = Element::new("Assets");
    for asset in selected {
        list.push_element(asset_element(&asset));
    }
    root.push_element(list);
    Ok(root)
}

// The stored body is the document fragment the adapter sent; the agent
// stamps its bookkeeping attributes onto the root before returning it.
fn asset_element(asset: &Asset) -> Element {
    let mut element = asset.content.clone();
    element.set_attribute("assetId", asset.asset_id.as_str());
    element.set_attribute("timestamp", format_timestamp(asset.timestamp));
    element.set_attribute("deviceUuid", asset.device_uuid.as_str());
    if asset.removed {
        element.set_attribute("removed", "true");
    }
    element
}
