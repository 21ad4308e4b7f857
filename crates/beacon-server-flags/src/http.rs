// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP surface for the sync mechanism.
//!
//! A single `GET /flags?project_id=N` route, dispatching on what the caller
//! can consume: an `Accept: text/event-stream` request gets the resumable
//! frame stream (resume cursor from `Last-Event-ID`), anything else gets a
//! one-shot JSON snapshot with no connection left behind. Client disconnect
//! drops the stream future; a frame is one event, so cancellation never
//! emits a partial frame.

use std::sync::Arc;
use std::time::Duration;

use axum::{
	extract::{Query, State},
	http::{header, HeaderMap, StatusCode},
	response::{
		sse::{KeepAlive, Sse},
		IntoResponse, Response,
	},
	routing::get,
	Json, Router,
};
use serde::Deserialize;
use tracing::{error, info, warn};

use beacon_flags_core::{Cursor, ProjectId};

use crate::notify::ChangeNotifier;
use crate::repository::FlagStore;
use crate::transport;

/// Keep-alive comment interval for streaming responses.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared state for the flags routes.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn FlagStore>,
	pub notifier: Arc<ChangeNotifier>,
}

impl AppState {
	pub fn new(store: Arc<dyn FlagStore>, notifier: Arc<ChangeNotifier>) -> Self {
		Self { store, notifier }
	}
}

/// Builds the flags router.
pub fn router(state: AppState) -> Router {
	Router::new().route("/flags", get(get_flags)).with_state(state)
}

#[derive(Debug, Deserialize)]
struct FlagsQuery {
	project_id: ProjectId,
}

/// Extracts the resume cursor from `Last-Event-ID`.
///
/// An unparsable cursor downgrades to a full resync rather than an error:
/// the catch-up diff from the origin is correct, just larger.
fn resume_cursor(headers: &HeaderMap) -> Option<Cursor> {
	let raw = headers.get("last-event-id")?.to_str().ok()?;
	match Cursor::parse(raw) {
		Ok(cursor) => Some(cursor),
		Err(e) => {
			warn!(error = %e, "ignoring unparsable resume cursor, full resync");
			None
		}
	}
}

async fn get_flags(
	State(state): State<AppState>,
	Query(query): Query<FlagsQuery>,
	headers: HeaderMap,
) -> Response {
	let wants_stream = headers
		.get(header::ACCEPT)
		.and_then(|v| v.to_str().ok())
		.is_some_and(|v| v.contains("text/event-stream"));

	if wants_stream {
		let resume = resume_cursor(&headers);
		info!(
			project_id = %query.project_id,
			resume = resume.map(|c| c.to_rfc3339()),
			"client connected to flag stream"
		);

		let stream = transport::sse_frames(
			Arc::clone(&state.store),
			&state.notifier,
			query.project_id,
			resume,
		)
		.await;

		Sse::new(stream)
			.keep_alive(
				KeepAlive::new()
					.interval(KEEP_ALIVE_INTERVAL)
					.text("keep-alive"),
			)
			.into_response()
	} else {
		match transport::snapshot(state.store.as_ref(), query.project_id).await {
			Ok(flags) => (StatusCode::OK, Json(flags)).into_response(),
			Err(e) => {
				error!(project_id = %query.project_id, error = %e, "failed to load snapshot");
				(StatusCode::INTERNAL_SERVER_ERROR, "failed to load flags").into_response()
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repository::{NewFlag, SqliteFlagStore};
	use crate::service::FlagService;
	use axum::body::Body;
	use axum::http::Request;
	use http_body_util::BodyExt;
	use sqlx::SqlitePool;
	use tower::ServiceExt;

	use beacon_flags_core::Flag;

	async fn test_app() -> (FlagService, Router) {
		let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
		let store = SqliteFlagStore::new(pool);
		store.migrate().await.unwrap();
		let service = FlagService::new(Arc::new(store), Arc::new(ChangeNotifier::with_defaults()));
		let app = router(AppState::new(service.store(), service.notifier()));
		(service, app)
	}

	#[tokio::test]
	async fn test_one_shot_returns_json_snapshot() {
		let (service, app) = test_app().await;
		service
			.create_flag(NewFlag {
				project_id: ProjectId(1),
				name: "test.flag".to_string(),
				rule: "1".to_string(),
			})
			.await
			.unwrap();

		let response = app
			.oneshot(
				Request::builder()
					.uri("/flags?project_id=1")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let body = response.into_body().collect().await.unwrap().to_bytes();
		let flags: Vec<Flag> = serde_json::from_slice(&body).unwrap();
		assert_eq!(flags.len(), 1);
		assert_eq!(flags[0].name, "test.flag");
	}

	#[tokio::test]
	async fn test_one_shot_excludes_archived() {
		let (service, app) = test_app().await;
		let flag = service
			.create_flag(NewFlag {
				project_id: ProjectId(1),
				name: "test.flag".to_string(),
				rule: "1".to_string(),
			})
			.await
			.unwrap();
		service.archive_flag(flag.id).await.unwrap().unwrap();

		let response = app
			.oneshot(
				Request::builder()
					.uri("/flags?project_id=1")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();

		let body = response.into_body().collect().await.unwrap().to_bytes();
		let flags: Vec<Flag> = serde_json::from_slice(&body).unwrap();
		assert!(flags.is_empty());
	}

	#[tokio::test]
	async fn test_stream_accepting_request_gets_event_stream() {
		let (_service, app) = test_app().await;

		let response = app
			.oneshot(
				Request::builder()
					.uri("/flags?project_id=1")
					.header(header::ACCEPT, "text/event-stream")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let content_type = response
			.headers()
			.get(header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or_default();
		assert!(content_type.starts_with("text/event-stream"));
	}

	#[tokio::test]
	async fn test_missing_project_id_is_rejected() {
		let (_service, app) = test_app().await;

		let response = app
			.oneshot(Request::builder().uri("/flags").body(Body::empty()).unwrap())
			.await
			.unwrap();

		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[test]
	fn test_resume_cursor_parsing() {
		let mut headers = HeaderMap::new();
		assert!(resume_cursor(&headers).is_none());

		headers.insert("last-event-id", "2024-01-01T00:00:00.000000Z".parse().unwrap());
		assert!(resume_cursor(&headers).is_some());

		headers.insert("last-event-id", "garbage".parse().unwrap());
		assert!(resume_cursor(&headers).is_none());
	}
}
