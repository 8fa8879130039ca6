// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end pipeline tests: SHDR text in, MTConnect documents out.

use std::collections::HashMap;

use chrono::Utc;

use mtconnect_agent_protocol::schema::{
    Category, Component, DataItem, DeviceSchema, PathFilter, SchemaIndex,
};
use mtconnect_agent_protocol::shdr;
use mtconnect_agent_protocol::xml::Element;
use mtconnect_agent_response::query::{parse_asset, parse_current, parse_sample};
use mtconnect_agent_response::{AgentInfo, ErrorCode, assets, streams};
use mtconnect_agent_store::{AssetStore, DataStore};

fn event(id: &str, name: &str, data_type: &str) -> DataItem {
    DataItem {
        id: id.to_string(),
        name: Some(name.to_string()),
        data_type: data_type.to_string(),
        sub_type: None,
        category: Category::Event,
        units: None,
        native_units: None,
    }
}

fn condition(id: &str, name: &str, data_type: &str) -> DataItem {
    DataItem {
        id: id.to_string(),
        name: Some(name.to_string()),
        data_type: data_type.to_string(),
        sub_type: None,
        category: Category::Condition,
        units: None,
        native_units: None,
    }
}

fn test_index() -> SchemaIndex {
    let device = DeviceSchema {
        uuid: "000".to_string(),
        id: "dev".to_string(),
        name: "VMC-3Axis".to_string(),
        data_items: vec![event("dtop_1", "avail", "AVAILABILITY")],
        components: vec![Component {
            component_type: "Controller".to_string(),
            id: "cont".to_string(),
            name: None,
            data_items: vec![
                event("cn2", "execution", "EXECUTION"),
                event("cn3", "line", "LINE"),
                event("cn4", "mode", "CONTROLLER_MODE"),
                event("cn5", "program", "PROGRAM"),
                event("cn6", "Fovr", "PATH_FEEDRATE_OVERRIDE"),
                event("cn7", "Sovr", "SPINDLE_SPEED_OVERRIDE"),
                condition("cond1", "htemp", "TEMPERATURE"),
                condition("cond2", "Cloadc", "LOAD"),
            ],
            components: vec![],
        }],
    };
    let mut index = SchemaIndex::new();
    index.register(device).unwrap();
    index
}

fn agent_info(buffer_size: usize) -> AgentInfo {
    AgentInfo {
        sender: "agent".to_string(),
        instance_id: 1,
        version: "1.3".to_string(),
        buffer_size,
        asset_buffer_size: 1024,
    }
}

fn feed(line: &str, index: &SchemaIndex, store: &DataStore, asset_store: &AssetStore) {
    let parsed = shdr::parse_line(line, "000", index).unwrap();
    for entry in &parsed.entries {
        store.ingest("000", entry, parsed.timestamp, index);
    }
    for command in &parsed.asset_commands {
        asset_store.apply("000", command, parsed.timestamp).unwrap();
    }
}

fn controller_stream(document: &Element) -> Element {
    document
        .child("Streams")
        .unwrap()
        .child("DeviceStream")
        .unwrap()
        .child_elements()
        .find(|stream| stream.attribute("component") == Some("Controller"))
        .cloned()
        .unwrap()
}

#[test]
fn availability_line_round_trips_through_current() {
    let index = test_index();
    let store = DataStore::new(10);
    let asset_store = AssetStore::new(16);
    feed(
        "2014-08-11T08:32:54.028533Z|avail|AVAILABLE",
        &index,
        &store,
        &asset_store,
    );

    let snapshot = store.current();
    let key = ("000".to_string(), "dtop_1".to_string());
    assert_eq!(
        snapshot.values[&key].value,
        mtconnect_agent_store::ObservationValue::Scalar("AVAILABLE".to_string())
    );

    let query = parse_current(&HashMap::new()).unwrap();
    let document = streams::current(
        &agent_info(10),
        &index,
        &store,
        None,
        &query,
        Utc::now(),
    )
    .unwrap();
    let availability = document
        .child("Streams")
        .unwrap()
        .child("DeviceStream")
        .unwrap()
        .child_elements()
        .find(|stream| stream.attribute("component") == Some("Device"))
        .unwrap()
        .child("Events")
        .unwrap()
        .child("Availability")
        .unwrap()
        .clone();
    assert_eq!(availability.text(), "AVAILABLE");
    assert_eq!(
        availability.attribute("timestamp"),
        Some("2014-08-11T08:32:54.028533Z")
    );
}

#[test]
fn multi_item_line_allocates_sequences_in_order() {
    let index = test_index();
    let store = DataStore::new(10);
    let asset_store = AssetStore::new(16);
    feed(
        "2014-08-13T07:38:27.663Z|execution|UNAVAILABLE|line|UNAVAILABLE|mode|UNAVAILABLE|program|UNAVAILABLE|Fovr|UNAVAILABLE|Sovr|UNAVAILABLE",
        &index,
        &store,
        &asset_store,
    );
    assert_eq!(store.bounds(), (1, 6, 7));

    let query = parse_sample(&HashMap::new(), 10).unwrap();
    let document = streams::sample(
        &agent_info(10),
        &index,
        &store,
        None,
        &query,
        Utc::now(),
    )
    .unwrap();
    let events = controller_stream(&document).child("Events").unwrap().clone();
    let names: Vec<String> = events
        .child_elements()
        .filter_map(|element| element.attribute("name").map(str::to_string))
        .collect();
    assert_eq!(
        names,
        vec!["execution", "line", "mode", "program", "Fovr", "Sovr"]
    );
}

#[test]
fn warning_condition_appears_in_current() {
    let index = test_index();
    let store = DataStore::new(10);
    let asset_store = AssetStore::new(16);
    feed(
        "2010-09-29T23:59:33.460470Z|htemp|WARNING|HTEMP|1|HIGH|Oil Temperature High",
        &index,
        &store,
        &asset_store,
    );

    let snapshot = store.current();
    let key = ("000".to_string(), "cond1".to_string());
    assert_eq!(snapshot.conditions[&key].len(), 1);

    let query = parse_current(&HashMap::new()).unwrap();
    let document = streams::current(
        &agent_info(10),
        &index,
        &store,
        None,
        &query,
        Utc::now(),
    )
    .unwrap();
    let conditions = controller_stream(&document).child("Condition").unwrap().clone();
    let warning = conditions.child("Warning").unwrap();
    assert_eq!(warning.attribute("nativeCode"), Some("HTEMP"));
    assert_eq!(warning.attribute("nativeSeverity"), Some("1"));
    assert_eq!(warning.attribute("qualifier"), Some("HIGH"));
    assert_eq!(warning.attribute("type"), Some("TEMPERATURE"));
    assert_eq!(warning.text(), "Oil Temperature High");
}

#[test]
fn global_normal_clears_condition_list() {
    let index = test_index();
    let store = DataStore::new(10);
    let asset_store = AssetStore::new(16);
    feed(
        "2016-04-12T20:27:00.0000|Cloadc|FAULT|C1|2||overload",
        &index,
        &store,
        &asset_store,
    );
    feed(
        "2016-04-12T20:27:01.0530|Cloadc|NORMAL||||",
        &index,
        &store,
        &asset_store,
    );

    let snapshot = store.current();
    let key = ("000".to_string(), "cond2".to_string());
    assert!(snapshot.conditions[&key].is_empty());

    let query = parse_current(&HashMap::new()).unwrap();
    let document = streams::current(
        &agent_info(10),
        &index,
        &store,
        None,
        &query,
        Utc::now(),
    )
    .unwrap();
    let conditions = controller_stream(&document).child("Condition").unwrap().clone();
    let loads: Vec<&Element> = conditions
        .child_elements()
        .filter(|element| element.attribute("dataItemId") == Some("cond2"))
        .collect();
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].name, "Normal");
}

#[test]
fn asset_flow_upsert_update_and_document() {
    let index = test_index();
    let store = DataStore::new(10);
    let asset_store = AssetStore::new(16);
    feed(
        "2012-02-21T23:59:33.460470Z|@ASSET@|EM233|CuttingTool|<CuttingTool serialNumber=\"EM233\"><ToolLife>100</ToolLife><Measurements><CuttingDiameterMax>32</CuttingDiameterMax></Measurements></CuttingTool>",
        &index,
        &store,
        &asset_store,
    );
    feed(
        "2012-02-21T23:59:34.460470Z|@UPDATE_ASSET@|EM233|ToolLife|120|CuttingDiameterMax|40",
        &index,
        &store,
        &asset_store,
    );

    let asset = asset_store.asset("EM233").unwrap();
    assert_eq!(asset.asset_type, "CuttingTool");
    assert_eq!(
        mtconnect_agent_protocol::format_timestamp(asset.timestamp),
        "2012-02-21T23:59:34.460470Z"
    );
    assert_eq!(asset_store.buffer_len(), 2);

    let ids = vec!["EM233".to_string()];
    let query = parse_asset(&HashMap::new(), 1024).unwrap();
    let document = assets::assets(
        &agent_info(10),
        &asset_store,
        Some(&ids),
        &query,
        Utc::now(),
    )
    .unwrap();
    let tool = document.child("Assets").unwrap().child("CuttingTool").unwrap();
    assert_eq!(tool.child("ToolLife").unwrap().text(), "120");
    let mut content = tool.clone();
    assert_eq!(
        content.innermost_mut("CuttingDiameterMax").unwrap().text(),
        "40"
    );
}

#[test]
fn remove_asset_is_idempotent() {
    let index = test_index();
    let store = DataStore::new(10);
    let asset_store = AssetStore::new(16);
    feed(
        "2012-02-21T23:59:33.460470Z|@ASSET@|EM233|CuttingTool|<CuttingTool/>",
        &index,
        &store,
        &asset_store,
    );
    feed(
        "2012-02-21T23:59:35.460470Z|@REMOVE_ASSET@|EM233",
        &index,
        &store,
        &asset_store,
    );
    feed(
        "2012-02-21T23:59:36.460470Z|@REMOVE_ASSET@|EM233",
        &index,
        &store,
        &asset_store,
    );

    let asset = asset_store.asset("EM233").unwrap();
    assert!(asset.removed);
    assert_eq!(asset_store.buffer_len(), 2);
}

#[test]
fn path_validation_against_schema() {
    let index = test_index();
    let availability: PathFilter = "//DataItem[@type=\"AVAILABILITY\"]".parse().unwrap();
    assert!(index.path_validation(&availability, &["000"]));

    let axes: PathFilter = "//Axes".parse().unwrap();
    assert!(!index.path_validation(&axes, &["000"]));
}

#[test]
fn sample_boundary_errors() {
    let index = test_index();
    let store = DataStore::new(10);
    let asset_store = AssetStore::new(16);
    for value in ["a", "b", "c"] {
        feed(
            &format!("2014-08-11T08:32:54Z|program|{value}"),
            &index,
            &store,
            &asset_store,
        );
    }

    // from before the oldest retained sequence
    let params: HashMap<String, String> = [("from".to_string(), "0".to_string())].into();
    let query = parse_sample(&params, 10).unwrap();
    let errors = streams::sample(&agent_info(10), &index, &store, None, &query, Utc::now())
        .unwrap_err();
    assert_eq!(errors[0].code, ErrorCode::OutOfRange);

    let params: HashMap<String, String> = [("count".to_string(), "0".to_string())].into();
    let errors = parse_sample(&params, 10).unwrap_err();
    assert!(errors[0].message.contains("must be greater than or equal to 1"));

    let params: HashMap<String, String> = [("count".to_string(), "11".to_string())].into();
    let errors = parse_sample(&params, 10).unwrap_err();
    assert_eq!(errors[0].code, ErrorCode::OutOfRange);

    let params: HashMap<String, String> = [
        ("at".to_string(), "1".to_string()),
        ("interval".to_string(), "100".to_string()),
    ]
    .into();
    let errors = parse_current(&params).unwrap_err();
    assert_eq!(errors[0].code, ErrorCode::InvalidRequest);
}

#[test]
fn duplicate_lines_consume_one_sequence() {
    let index = test_index();
    let store = DataStore::new(10);
    let asset_store = AssetStore::new(16);
    feed("2014-08-11T08:32:54Z|avail|AVAILABLE", &index, &store, &asset_store);
    feed("2014-08-11T08:32:55Z|avail|AVAILABLE", &index, &store, &asset_store);
    assert_eq!(store.bounds(), (1, 1, 2));
}
