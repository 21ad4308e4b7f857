// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Frame delivery: the resumable delta stream and the one-shot snapshot.
//!
//! Streaming mode serializes one frame per stream event (a `data:` segment
//! with the JSON-encoded changed list and an `id:` segment with the new
//! cursor), flushed immediately and never buffered beyond one frame. A
//! reconnecting consumer's cursor is handed straight to the encoder, so the
//! first frame on the new connection is exactly the catch-up diff.
//!
//! One-shot mode returns the full current snapshot (non-archived flags) and
//! leaves no connection behind.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::Event;
use futures::stream::Stream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use beacon_flags_core::{Cursor, Flag, Frame, ProjectId};

use crate::delta::DeltaEncoder;
use crate::error::Result;
use crate::notify::{ChangeNotice, ChangeNotifier};
use crate::repository::FlagStore;

struct FrameStreamState {
	encoder: DeltaEncoder,
	notices: broadcast::Receiver<ChangeNotice>,
	primed: bool,
}

/// The resumable frame stream for one connection.
///
/// Yields the eager catch-up frame first, then one frame per change notice
/// with a non-empty diff. Lagged notices are fine; the next recomputation
/// diffs against live state. Encoder failures end the stream; the consumer
/// treats the close as a disconnect and resumes with its cursor.
pub async fn frames(
	store: Arc<dyn FlagStore>,
	notifier: &ChangeNotifier,
	project_id: ProjectId,
	resume: Option<Cursor>,
) -> impl Stream<Item = Frame> + Send {
	// Subscribe before the first recomputation so no mutation can fall
	// between the catch-up frame and the notice loop.
	let notices = notifier.subscribe(project_id).await;
	let encoder = DeltaEncoder::new(store, project_id, resume);

	futures::stream::unfold(
		FrameStreamState {
			encoder,
			notices,
			primed: false,
		},
		move |mut state| async move {
			loop {
				if state.primed {
					match state.notices.recv().await {
						Ok(_) => {}
						Err(broadcast::error::RecvError::Lagged(skipped)) => {
							debug!(skipped, "change notices coalesced");
						}
						Err(broadcast::error::RecvError::Closed) => return None,
					}
				}
				state.primed = true;

				match state.encoder.next_frame().await {
					Ok(Some(frame)) => return Some((frame, state)),
					Ok(None) => continue,
					Err(e) => {
						warn!(project_id = %project_id, error = %e, "delta recomputation failed, closing stream");
						return None;
					}
				}
			}
		},
	)
}

/// Serializes one frame as one stream event.
fn frame_event(frame: &Frame) -> Option<Event> {
	match serde_json::to_string(&frame.changed) {
		Ok(json) => Some(Event::default().data(json).id(frame.cursor.to_rfc3339())),
		Err(e) => {
			warn!(error = %e, "failed to serialize frame, closing stream");
			None
		}
	}
}

/// The frame stream in wire form, ready to hand to an SSE response.
pub async fn sse_frames(
	store: Arc<dyn FlagStore>,
	notifier: &ChangeNotifier,
	project_id: ProjectId,
	resume: Option<Cursor>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> + Send {
	use futures::StreamExt;

	frames(store, notifier, project_id, resume)
		.await
		.map(|frame| frame_event(&frame))
		.take_while(|event| futures::future::ready(event.is_some()))
		.filter_map(|event| futures::future::ready(event.map(Ok)))
}

/// One-shot mode: the full current snapshot, archived flags excluded.
pub async fn snapshot(store: &dyn FlagStore, project_id: ProjectId) -> Result<Vec<Flag>> {
	store.list_flags(project_id, false).await
}
