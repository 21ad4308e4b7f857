// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Thread-safe local cache of evaluated flag values.
//!
//! The cache stores the evaluated boolean per flag name, not the rule.
//! Rules are evaluated once at merge time against the client's evaluation
//! context; reads are then lock-cheap map lookups. Frames apply under a
//! single write-lock critical section, so concurrent readers observe
//! either the full pre-frame state or the full post-frame state, never a
//! partially applied frame.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_flags_core::{Cursor, EvaluationContext, Flag, Frame, RuleEvaluator};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

/// Thread-safe cache of evaluated flag values.
///
/// Cloning is cheap and shares the underlying state.
#[derive(Debug, Clone)]
pub struct FlagCache {
	inner: Arc<RwLock<CacheInner>>,
}

#[derive(Debug, Default)]
struct CacheInner {
	/// Flag name to evaluated value.
	entries: HashMap<String, bool>,
	/// Cursor of the last applied frame, echoed on reconnect.
	cursor: Option<Cursor>,
	/// When the cache last changed.
	last_updated: Option<DateTime<Utc>>,
	/// Whether any frame or snapshot has been applied.
	initialized: bool,
}

impl FlagCache {
	/// Creates a new, empty cache.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(RwLock::new(CacheInner::default())),
		}
	}

	/// Applies a delta frame atomically.
	///
	/// Archived flags are removed from the cache; all other flags in the
	/// frame are evaluated against `context` and upserted. The frame's
	/// cursor replaces the stored cursor.
	pub async fn merge(
		&self,
		frame: &Frame,
		evaluator: &dyn RuleEvaluator,
		context: &EvaluationContext,
	) {
		let mut inner = self.inner.write().await;
		for flag in &frame.changed {
			if flag.is_archived() {
				inner.entries.remove(&flag.name);
			} else {
				let value = evaluator.evaluate(&flag.parsed_rule(), context);
				inner.entries.insert(flag.name.clone(), value);
			}
		}
		inner.cursor = Some(frame.cursor);
		inner.last_updated = Some(Utc::now());
		inner.initialized = true;
		debug!(
			changed = frame.changed.len(),
			cursor = %frame.cursor,
			total = inner.entries.len(),
			"Merged flag frame into cache"
		);
	}

	/// Replaces the entire cache contents from a one-shot snapshot.
	///
	/// Archived flags are skipped. The cursor advances to the newest
	/// `updated_at` among the given flags, so a later switch to live
	/// updates resumes from the snapshot point.
	pub async fn replace_all(
		&self,
		flags: &[Flag],
		evaluator: &dyn RuleEvaluator,
		context: &EvaluationContext,
	) {
		let mut entries = HashMap::with_capacity(flags.len());
		let mut cursor: Option<Cursor> = None;
		for flag in flags {
			if flag.is_archived() {
				continue;
			}
			let value = evaluator.evaluate(&flag.parsed_rule(), context);
			entries.insert(flag.name.clone(), value);
			let candidate = Cursor::new(flag.updated_at);
			if cursor.map_or(true, |c| candidate > c) {
				cursor = Some(candidate);
			}
		}

		let mut inner = self.inner.write().await;
		inner.entries = entries;
		if cursor.is_some() {
			inner.cursor = cursor;
		}
		inner.last_updated = Some(Utc::now());
		inner.initialized = true;
		debug!(total = inner.entries.len(), "Replaced flag cache from snapshot");
	}

	/// Returns whether the named flag is enabled, defaulting to `false`
	/// for unknown flags.
	pub async fn is_enabled(&self, name: &str) -> bool {
		self.is_enabled_or(name, false).await
	}

	/// Returns whether the named flag is enabled, with a caller-supplied
	/// default for unknown flags.
	pub async fn is_enabled_or(&self, name: &str, default: bool) -> bool {
		let inner = self.inner.read().await;
		inner.entries.get(name).copied().unwrap_or(default)
	}

	/// Returns a point-in-time copy of all known flag values.
	pub async fn all(&self) -> HashMap<String, bool> {
		let inner = self.inner.read().await;
		inner.entries.clone()
	}

	/// Returns the cursor of the last applied frame, if any.
	pub async fn cursor(&self) -> Option<Cursor> {
		let inner = self.inner.read().await;
		inner.cursor
	}

	/// Returns whether the cache has received at least one frame or
	/// snapshot.
	pub async fn is_initialized(&self) -> bool {
		let inner = self.inner.read().await;
		inner.initialized
	}

	/// Returns when the cache last changed.
	pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
		let inner = self.inner.read().await;
		inner.last_updated
	}

	/// Returns the number of cached flags.
	pub async fn flag_count(&self) -> usize {
		let inner = self.inner.read().await;
		inner.entries.len()
	}

	/// Clears all cached values and the cursor.
	pub async fn clear(&self) {
		let mut inner = self.inner.write().await;
		inner.entries.clear();
		inner.cursor = None;
		inner.last_updated = None;
		inner.initialized = false;
	}
}

impl Default for FlagCache {
	fn default() -> Self {
		Self::new()
	}
}


#[cfg(test)]
mod proptests {
	use super::*;
	use beacon_flags_core::{FlagId, LiteralEvaluator, ProjectId};
	use chrono::TimeZone;
	use proptest::prelude::*;

	fn flag_with_rule(name: &str, rule: &str, archived: bool) -> Flag {
		let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
		Flag {
			id: FlagId::new(1),
			project_id: ProjectId::new(1),
			name: name.to_string(),
			rule: rule.to_string(),
			archived_at: archived.then_some(at),
			created_at: at,
			updated_at: at,
		}
	}

	proptest! {
		#[test]
		fn merged_value_matches_literal_rule(rule in "[01a-z]{0,4}") {
			tokio_test::block_on(async {
				let cache = FlagCache::new();
				let frame = Frame::new(
					vec![flag_with_rule("prop.flag", &rule, false)],
					Cursor::ORIGIN,
				);
				cache
					.merge(&frame, &LiteralEvaluator, &EvaluationContext::new())
					.await;

				// Only the literal "1" enables; "0", "", and anything
				// unrecognized all read as disabled.
				prop_assert_eq!(cache.is_enabled("prop.flag").await, rule == "1");
				Ok(())
			})?;
		}

		#[test]
		fn archived_flags_never_survive_merge(
			names in proptest::collection::hash_set("[a-z]{3,8}", 1..8),
		) {
			tokio_test::block_on(async {
				let cache = FlagCache::new();
				let evaluator = LiteralEvaluator;
				let ctx = EvaluationContext::new();

				let live: Vec<Flag> = names
					.iter()
					.map(|n| flag_with_rule(n, "1", false))
					.collect();
				cache
					.merge(&Frame::new(live, Cursor::ORIGIN), &evaluator, &ctx)
					.await;
				prop_assert_eq!(cache.flag_count().await, names.len());

				let tombstones: Vec<Flag> = names
					.iter()
					.map(|n| flag_with_rule(n, "1", true))
					.collect();
				cache
					.merge(&Frame::new(tombstones, Cursor::ORIGIN), &evaluator, &ctx)
					.await;
				prop_assert_eq!(cache.flag_count().await, 0);
				Ok(())
			})?;
		}
	}
}
