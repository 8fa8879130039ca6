// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The HTTP query surface.
//!
//! Routing and parameter extraction happen here; everything of substance is
//! delegated to the response crate. Failed queries still answer `200 OK`
//! with an `MTConnectError` document, matching what MTConnect clients
//! expect. With `interval=`, `current` and `sample` switch to a
//! `multipart/x-mixed-replace` stream that runs until the client disconnects
//! or the query becomes unanswerable.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::Utc;
use http_body::Frame;
use md5::{Digest, Md5};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use mtconnect_agent_protocol::schema::SchemaIndex;
use mtconnect_agent_protocol::xml::Element;
use mtconnect_agent_response::query::{
    CurrentQuery, SampleQuery, parse_asset, parse_current, parse_sample,
};
use mtconnect_agent_response::{AgentError, AgentInfo, assets, error, probe, streams};
use mtconnect_agent_store::{AssetStore, DataStore};

const MULTIPART_BOUNDARY: &str = "MTConnectAgentStream";

/// Shared state behind every handler.
pub struct AppState {
    /// Header identity facts
    pub info: AgentInfo,
    /// Registered device schemas
    pub index: Arc<SchemaIndex>,
    /// Observation store
    pub data: Arc<DataStore>,
    /// Asset store
    pub assets: Arc<AssetStore>,
}

/// Builds the agent's router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(probe_all))
        .route("/probe", get(probe_all))
        .route("/current", get(current_all))
        .route("/sample", get(sample_all))
        .route("/asset", get(assets_all))
        .route("/assets", get(assets_all))
        .route("/asset/{ids}", get(assets_by_id))
        .route("/assets/{ids}", get(assets_by_id))
        .route("/{device}", get(probe_device))
        .route("/{device}/probe", get(probe_device))
        .route("/{device}/current", get(current_device))
        .route("/{device}/sample", get(sample_device))
        .with_state(state)
}

async fn probe_all(State(state): State<Arc<AppState>>) -> Response {
    probe_response(&state, None)
}

async fn probe_device(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
) -> Response {
    probe_response(&state, Some(split_ids(&device)))
}

async fn current_all(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    current_response(state, None, &params)
}

async fn current_device(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    current_response(state, Some(split_ids(&device)), &params)
}

async fn sample_all(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    sample_response(state, None, &params)
}

async fn sample_device(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    sample_response(state, Some(split_ids(&device)), &params)
}

async fn assets_all(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    asset_response(&state, None, &params)
}

async fn assets_by_id(
    State(state): State<Arc<AppState>>,
    Path(ids): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    asset_response(&state, Some(split_ids(&ids)), &params)
}

// `;`-separated multi-device and multi-asset path segments
fn split_ids(raw: &str) -> Vec<String> {
    raw.split(';')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn probe_response(state: &AppState, selection: Option<Vec<String>>) -> Response {
    finish(
        state,
        probe::probe(
            &state.info,
            &state.index,
            selection.as_deref(),
            state.assets.count(),
            Utc::now(),
        ),
    )
}

fn current_response(
    state: Arc<AppState>,
    selection: Option<Vec<String>>,
    params: &HashMap<String, String>,
) -> Response {
    match parse_current(params) {
        Err(errors) => error_response(&state, &errors),
        Ok(query) => match query.interval {
            Some(interval) => stream_current(state, selection, query, interval),
            None => finish(
                &state,
                streams::current(
                    &state.info,
                    &state.index,
                    &state.data,
                    selection.as_deref(),
                    &query,
                    Utc::now(),
                ),
            ),
        },
    }
}

fn sample_response(
    state: Arc<AppState>,
    selection: Option<Vec<String>>,
    params: &HashMap<String, String>,
) -> Response {
    match parse_sample(params, state.data.capacity()) {
        Err(errors) => error_response(&state, &errors),
        Ok(query) => match query.interval {
            Some(interval) => stream_sample(state, selection, query, interval),
            None => finish(
                &state,
                streams::sample(
                    &state.info,
                    &state.index,
                    &state.data,
                    selection.as_deref(),
                    &query,
                    Utc::now(),
                ),
            ),
        },
    }
}

fn asset_response(
    state: &AppState,
    ids: Option<Vec<String>>,
    params: &HashMap<String, String>,
) -> Response {
    match parse_asset(params, state.assets.capacity()) {
        Err(errors) => error_response(state, &errors),
        Ok(query) => finish(
            state,
            assets::assets(
                &state.info,
                &state.assets,
                ids.as_deref(),
                &query,
                Utc::now(),
            ),
        ),
    }
}

fn finish(state: &AppState, result: Result<Element, Vec<AgentError>>) -> Response {
    match result {
        Ok(document) => xml_response(&document),
        Err(errors) => error_response(state, &errors),
    }
}

fn error_response(state: &AppState, errors: &[AgentError]) -> Response {
    xml_response(&error::error_document(&state.info, Utc::now(), errors))
}

// The digest covers the XML body and is sent as the `Content-MD5` trailer
// after it, which keeps the body streamable while still letting clients
// verify it.
fn xml_response(document: &Element) -> Response {
    let body = document.to_document_string();
    let digest = BASE64.encode(Md5::digest(body.as_bytes()));
    let mut trailers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&digest) {
        trailers.insert(HeaderName::from_static("content-md5"), value);
    }
    (
        [
            (header::CONTENT_TYPE, "text/xml".to_string()),
            (header::TRAILER, "Content-MD5".to_string()),
        ],
        Body::new(TrailedBody {
            data: Some(Bytes::from(body)),
            trailers: Some(trailers),
        }),
    )
        .into_response()
}

// A fixed payload followed by one trailer frame. No size hint is given:
// trailers only reach an HTTP/1.1 client over chunked transfer encoding,
// and an exact hint would make the server frame with Content-Length and
// drop them.
struct TrailedBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
}

impl http_body::Body for TrailedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        let body = self.get_mut();
        if let Some(data) = body.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        match body.trailers.take() {
            Some(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.trailers.is_none()
    }
}

// One part of a multipart stream, with its own framing headers.
fn part_bytes(payload: &str) -> Bytes {
    Bytes::from(format!(
        "--{MULTIPART_BOUNDARY}\r\nContent-type: text/xml\r\nContent-length: {}\r\n\r\n{payload}\r\n",
        payload.len()
    ))
}

fn closing_boundary() -> Bytes {
    Bytes::from(format!("--{MULTIPART_BOUNDARY}--\r\n"))
}

fn multipart_response(receiver: mpsc::Receiver<Result<Bytes, Infallible>>) -> Response {
    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace;boundary={MULTIPART_BOUNDARY}"),
        )],
        Body::from_stream(ReceiverStream::new(receiver)),
    )
        .into_response()
}

fn stream_current(
    state: Arc<AppState>,
    selection: Option<Vec<String>>,
    query: CurrentQuery,
    interval_ms: u64,
) -> Response {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let query = CurrentQuery {
            interval: None,
            ..query
        };
        loop {
            let result = streams::current(
                &state.info,
                &state.index,
                &state.data,
                selection.as_deref(),
                &query,
                Utc::now(),
            );
            if emit_part(&tx, &state, result).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    });
    multipart_response(rx)
}

fn stream_sample(
    state: Arc<AppState>,
    selection: Option<Vec<String>>,
    query: SampleQuery,
    interval_ms: u64,
) -> Response {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let mut cursor = query.from;
        loop {
            let window = SampleQuery {
                from: cursor,
                count: query.count,
                path: query.path.clone(),
                interval: None,
            };
            let result = streams::sample(
                &state.info,
                &state.index,
                &state.data,
                selection.as_deref(),
                &window,
                Utc::now(),
            );
            if let Ok(document) = &result {
                cursor = document
                    .child("Header")
                    .and_then(|header| header.attribute("nextSequence"))
                    .and_then(|next| next.parse().ok());
            }
            if emit_part(&tx, &state, result).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    });
    multipart_response(rx)
}

// Sends one part; a query error is terminal and emits the closing boundary.
// Returns Err when the stream should stop (error part sent or client gone).
async fn emit_part(
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    state: &AppState,
    result: Result<Element, Vec<AgentError>>,
) -> Result<(), ()> {
    match result {
        Ok(document) => {
            let payload = document.to_document_string();
            tx.send(Ok(part_bytes(&payload))).await.map_err(|_| ())
        }
        Err(errors) => {
            let payload = error::error_document(&state.info, Utc::now(), &errors)
                .to_document_string();
            if tx.send(Ok(part_bytes(&payload))).await.is_ok() {
                let _ = tx.send(Ok(closing_boundary())).await;
            }
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ids() {
        assert_eq!(split_ids("EM233"), vec!["EM233".to_string()]);
        assert_eq!(
            split_ids("EM233;EM262"),
            vec!["EM233".to_string(), "EM262".to_string()]
        );
        assert_eq!(split_ids("a;;b"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_trailed_body_emits_data_then_trailers() {
        use http_body::Body as _;
        use std::task::Waker;

        let mut trailers = HeaderMap::new();
        trailers.insert(
            HeaderName::from_static("content-md5"),
            HeaderValue::from_static("abc"),
        );
        let mut body = TrailedBody {
            data: Some(Bytes::from_static(b"<x/>")),
            trailers: Some(trailers),
        };
        let mut context = Context::from_waker(Waker::noop());

        let Poll::Ready(Some(Ok(frame))) = Pin::new(&mut body).poll_frame(&mut context) else {
            panic!("expected a data frame");
        };
        assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b"<x/>"));
        assert!(!body.is_end_stream());

        let Poll::Ready(Some(Ok(frame))) = Pin::new(&mut body).poll_frame(&mut context) else {
            panic!("expected a trailer frame");
        };
        let sent = frame.into_trailers().unwrap();
        assert_eq!(sent.get("content-md5").unwrap(), "abc");

        assert!(body.is_end_stream());
        assert!(matches!(
            Pin::new(&mut body).poll_frame(&mut context),
            Poll::Ready(None)
        ));
    }

    #[test]
    fn test_part_framing() {
        let part = part_bytes("<x/>");
        let text = String::from_utf8(part.to_vec()).unwrap();
        assert!(text.starts_with("--MTConnectAgentStream\r\n"));
        assert!(text.contains("Content-length: 4\r\n\r\n<x/>\r\n"));
        assert_eq!(
            String::from_utf8(closing_boundary().to_vec()).unwrap(),
            "--MTConnectAgentStream--\r\n"
        );
    }
}
