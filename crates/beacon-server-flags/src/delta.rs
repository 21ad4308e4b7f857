// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delta computation against the live row set.
//!
//! The encoder never buffers deltas. On every recomputation it reloads the
//! project's full current row set and diffs it against its low-water
//! cursor. Coalesced or reordered change notifications therefore collapse
//! into one correct frame, and a slow consumer costs one frame of memory,
//! not an unbounded queue.

use std::sync::Arc;

use tracing::debug;

use beacon_flags_core::{Cursor, Frame, ProjectId};

use crate::error::Result;
use crate::repository::FlagStore;

/// Computes resumable delta frames for one project.
///
/// Logically scoped to one streaming connection: the cursor advances as
/// frames are emitted, starting from the consumer's resume point (or the
/// origin on first contact).
pub struct DeltaEncoder {
	store: Arc<dyn FlagStore>,
	project_id: ProjectId,
	cursor: Option<Cursor>,
	emitted_initial: bool,
}

impl DeltaEncoder {
	pub fn new(store: Arc<dyn FlagStore>, project_id: ProjectId, resume: Option<Cursor>) -> Self {
		Self {
			store,
			project_id,
			cursor: resume,
			emitted_initial: false,
		}
	}

	/// The encoder's current low-water mark.
	pub fn cursor(&self) -> Option<Cursor> {
		self.cursor
	}

	/// Recomputes the delta against the live row set.
	///
	/// Emits a frame when the diff is non-empty, and always on the very
	/// first computation (so a fresh consumer gets its catch-up frame even
	/// when it is empty). Archived rows stay in the diff as removal
	/// tombstones, but the new cursor covers every current row, so an
	/// unchanged consumer is not re-sent a clean state.
	pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
		let rows = self.store.list_flags(self.project_id, true).await?;
		let low = self.cursor.unwrap_or(Cursor::ORIGIN);

		let row_max = rows.iter().map(|f| f.updated_at).max().map(Cursor::new);
		// Over all current rows, not just the filtered subset; never regresses.
		let new_cursor = row_max.map_or(low, |max| max.max(low));

		let changed: Vec<_> = rows
			.into_iter()
			.filter(|f| Cursor::new(f.updated_at) > low)
			.collect();

		let first = !self.emitted_initial;
		self.emitted_initial = true;

		if changed.is_empty() && !first {
			return Ok(None);
		}

		debug!(
			project_id = %self.project_id,
			changed = changed.len(),
			cursor = %new_cursor,
			"encoded delta frame"
		);

		self.cursor = Some(new_cursor);
		Ok(Some(Frame::new(changed, new_cursor)))
	}
}
