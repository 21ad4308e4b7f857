// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delta-stream wire units: the resume cursor and the frame.
//!
//! A frame is one unit of delta delivery: the ordered list of flags mutated
//! since the previous cursor, plus the new cursor. On the wire a frame is
//! one stream event: a `data:` segment with the JSON-encoded flag list and
//! an `id:` segment with the new cursor.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlagsError, Result};
use crate::Flag;

/// Inclusive low-water mark over a project's flag history.
///
/// A consumer holding cursor `c` has incorporated every mutation with
/// `updated_at <= c`; a resumed stream must deliver exactly the flags with
/// `updated_at > c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub DateTime<Utc>);

impl Cursor {
	/// The cursor of a consumer that has incorporated nothing.
	pub const ORIGIN: Cursor = Cursor(DateTime::<Utc>::UNIX_EPOCH);

	pub fn new(at: DateTime<Utc>) -> Self {
		Self(at)
	}

	/// Parses the wire form (RFC 3339).
	pub fn parse(s: &str) -> Result<Self> {
		let at = DateTime::parse_from_rfc3339(s)
			.map_err(|e| FlagsError::InvalidCursor(format!("{s}: {e}")))?;
		Ok(Self(at.with_timezone(&Utc)))
	}

	/// Wire form: RFC 3339 with fixed microsecond precision, so equal
	/// cursors always serialize identically.
	pub fn to_rfc3339(&self) -> String {
		self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
	}
}

impl std::fmt::Display for Cursor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.to_rfc3339())
	}
}

impl std::str::FromStr for Cursor {
	type Err = FlagsError;

	fn from_str(s: &str) -> Result<Self> {
		Cursor::parse(s)
	}
}

impl From<DateTime<Utc>> for Cursor {
	fn from(at: DateTime<Utc>) -> Self {
		Self(at)
	}
}

/// One unit of delta delivery.
///
/// A well-formed frame carries exactly the flags with `updated_at` in
/// `(previous cursor, cursor]`, sorted by `(updated_at, id)` ascending.
/// Archived flags are included; they are the removal tombstones consumers
/// use to drop entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
	pub changed: Vec<Flag>,
	pub cursor: Cursor,
}

impl Frame {
	/// Builds a frame, imposing the delta-stream order on the changed set.
	pub fn new(mut changed: Vec<Flag>, cursor: Cursor) -> Self {
		changed.sort_by_key(Flag::stream_order);
		Self { changed, cursor }
	}

	/// A frame carrying no changes, used for first contact with an empty
	/// project.
	pub fn empty(cursor: Cursor) -> Self {
		Self {
			changed: Vec::new(),
			cursor,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.changed.is_empty()
	}

	pub fn len(&self) -> usize {
		self.changed.len()
	}
}
