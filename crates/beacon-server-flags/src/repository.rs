// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable flag storage.
//!
//! The delta encoder only ever reads the live row set through [`FlagStore`];
//! it never buffers deltas of its own. That makes the store's single
//! invariant load-bearing: `updated_at` strictly increases on every mutation
//! of a row, archival included, at the microsecond precision the wire
//! format carries.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use beacon_flags_core::{Flag, FlagId, ProjectId};

use crate::error::{FlagsServerError, Result};

/// Fields for creating a flag.
#[derive(Debug, Clone)]
pub struct NewFlag {
	pub project_id: ProjectId,
	pub name: String,
	pub rule: String,
}

/// Partial update: unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct FlagUpdate {
	pub name: Option<String>,
	pub rule: Option<String>,
}

/// Repository trait for flag storage.
///
/// Mutations must bump `updated_at` to a value strictly greater than the
/// row's previous one. Lookups of nonexistent flags return `Ok(None)`.
#[async_trait]
pub trait FlagStore: Send + Sync {
	async fn create_flag(&self, new_flag: NewFlag) -> Result<Flag>;
	async fn get_flag(&self, id: FlagId) -> Result<Option<Flag>>;
	async fn get_flag_by_name(&self, project_id: ProjectId, name: &str) -> Result<Option<Flag>>;
	async fn list_flags(&self, project_id: ProjectId, include_archived: bool) -> Result<Vec<Flag>>;
	async fn update_flag(&self, id: FlagId, update: FlagUpdate) -> Result<Option<Flag>>;
	async fn archive_flag(&self, id: FlagId) -> Result<Option<Flag>>;
}

/// SQLite implementation of the flag store.
#[derive(Clone)]
pub struct SqliteFlagStore {
	pool: SqlitePool,
}

/// Drops sub-microsecond precision so in-memory values compare the same as
/// their stored wire form.
fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
	DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

/// Next `updated_at` for a mutated row: wall clock, nudged forward when the
/// clock has not advanced past the previous value.
fn next_updated_at(prev: DateTime<Utc>) -> DateTime<Utc> {
	let now = truncate_to_micros(Utc::now());
	if now > prev {
		now
	} else {
		prev + Duration::microseconds(1)
	}
}

impl SqliteFlagStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Creates the flags schema if it does not yet exist.
	pub async fn migrate(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS flags (
				id INTEGER PRIMARY KEY AUTOINCREMENT,
				project_id INTEGER NOT NULL,
				name TEXT NOT NULL,
				rule TEXT NOT NULL,
				archived_at TEXT,
				created_at TEXT NOT NULL,
				updated_at TEXT NOT NULL,
				UNIQUE (project_id, name)
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r#"
			CREATE INDEX IF NOT EXISTS idx_flags_project_updated
			ON flags (project_id, updated_at)
			"#,
		)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Highest `updated_at` across the project's rows, archived included.
	///
	/// The stored wire form is fixed-width RFC 3339, so the SQL `MAX` over
	/// text is chronological.
	async fn max_updated_at(&self, project_id: ProjectId) -> Result<Option<DateTime<Utc>>> {
		let raw = sqlx::query_scalar::<_, Option<String>>(
			"SELECT MAX(updated_at) FROM flags WHERE project_id = ?",
		)
		.bind(project_id.0)
		.fetch_one(&self.pool)
		.await?;
		raw.as_deref().map(from_stored).transpose()
	}
}

#[async_trait]
impl FlagStore for SqliteFlagStore {
	#[instrument(skip(self, new_flag), fields(project_id = %new_flag.project_id, name = %new_flag.name))]
	async fn create_flag(&self, new_flag: NewFlag) -> Result<Flag> {
		if !Flag::validate_name(&new_flag.name) {
			return Err(FlagsServerError::InvalidFlagName(new_flag.name));
		}

		if self
			.get_flag_by_name(new_flag.project_id, &new_flag.name)
			.await?
			.is_some()
		{
			return Err(FlagsServerError::DuplicateFlagName(new_flag.name));
		}

		// A mutation in the same microsecond as the project's newest row
		// would sit at-or-below an already-emitted cursor and never be
		// streamed, so every new timestamp is nudged past the project max.
		let now = match self.max_updated_at(new_flag.project_id).await? {
			Some(prev) => next_updated_at(prev),
			None => truncate_to_micros(Utc::now()),
		};

		let result = sqlx::query(
			r#"
			INSERT INTO flags (project_id, name, rule, archived_at, created_at, updated_at)
			VALUES (?, ?, ?, NULL, ?, ?)
			"#,
		)
		.bind(new_flag.project_id.0)
		.bind(&new_flag.name)
		.bind(&new_flag.rule)
		.bind(to_stored(now))
		.bind(to_stored(now))
		.execute(&self.pool)
		.await?;

		Ok(Flag {
			id: FlagId(result.last_insert_rowid()),
			project_id: new_flag.project_id,
			name: new_flag.name,
			rule: new_flag.rule,
			archived_at: None,
			created_at: now,
			updated_at: now,
		})
	}

	#[instrument(skip(self), fields(flag_id = %id))]
	async fn get_flag(&self, id: FlagId) -> Result<Option<Flag>> {
		let row = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, project_id, name, rule, archived_at, created_at, updated_at
			FROM flags
			WHERE id = ?
			"#,
		)
		.bind(id.0)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self), fields(project_id = %project_id, name = %name))]
	async fn get_flag_by_name(&self, project_id: ProjectId, name: &str) -> Result<Option<Flag>> {
		let row = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, project_id, name, rule, archived_at, created_at, updated_at
			FROM flags
			WHERE project_id = ? AND name = ?
			"#,
		)
		.bind(project_id.0)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self), fields(project_id = %project_id))]
	async fn list_flags(&self, project_id: ProjectId, include_archived: bool) -> Result<Vec<Flag>> {
		let query = if include_archived {
			r#"
			SELECT id, project_id, name, rule, archived_at, created_at, updated_at
			FROM flags
			WHERE project_id = ?
			ORDER BY id ASC
			"#
		} else {
			r#"
			SELECT id, project_id, name, rule, archived_at, created_at, updated_at
			FROM flags
			WHERE project_id = ? AND archived_at IS NULL
			ORDER BY id ASC
			"#
		};

		let rows = sqlx::query_as::<_, FlagRow>(query)
			.bind(project_id.0)
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self, update), fields(flag_id = %id))]
	async fn update_flag(&self, id: FlagId, update: FlagUpdate) -> Result<Option<Flag>> {
		let Some(mut flag) = self.get_flag(id).await? else {
			return Ok(None);
		};

		if let Some(name) = update.name {
			if !Flag::validate_name(&name) {
				return Err(FlagsServerError::InvalidFlagName(name));
			}
			flag.name = name;
		}
		if let Some(rule) = update.rule {
			flag.rule = rule;
		}

		// Past the project max, not just this row's previous value, so a
		// sibling row cannot already hold the same cursor position.
		let floor = self
			.max_updated_at(flag.project_id)
			.await?
			.map_or(flag.updated_at, |max| max.max(flag.updated_at));
		flag.updated_at = next_updated_at(floor);

		sqlx::query(
			r#"
			UPDATE flags
			SET name = ?, rule = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(&flag.name)
		.bind(&flag.rule)
		.bind(to_stored(flag.updated_at))
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		Ok(Some(flag))
	}

	#[instrument(skip(self), fields(flag_id = %id))]
	async fn archive_flag(&self, id: FlagId) -> Result<Option<Flag>> {
		let Some(mut flag) = self.get_flag(id).await? else {
			return Ok(None);
		};

		let floor = self
			.max_updated_at(flag.project_id)
			.await?
			.map_or(flag.updated_at, |max| max.max(flag.updated_at));
		flag.updated_at = next_updated_at(floor);
		flag.archived_at = Some(flag.updated_at);

		sqlx::query(
			r#"
			UPDATE flags
			SET archived_at = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(to_stored(flag.updated_at))
		.bind(to_stored(flag.updated_at))
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		Ok(Some(flag))
	}
}

fn to_stored(at: DateTime<Utc>) -> String {
	at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn from_stored(raw: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(raw)
		.map(|at| at.with_timezone(&Utc))
		.map_err(|e| FlagsServerError::Database(format!("invalid stored timestamp {raw}: {e}")))
}

#[derive(sqlx::FromRow)]
struct FlagRow {
	id: i64,
	project_id: i64,
	name: String,
	rule: String,
	archived_at: Option<String>,
	created_at: String,
	updated_at: String,
}

impl TryFrom<FlagRow> for Flag {
	type Error = FlagsServerError;

	fn try_from(row: FlagRow) -> Result<Flag> {
		Ok(Flag {
			id: FlagId(row.id),
			project_id: ProjectId(row.project_id),
			name: row.name,
			rule: row.rule,
			archived_at: row.archived_at.as_deref().map(from_stored).transpose()?,
			created_at: from_stored(&row.created_at)?,
			updated_at: from_stored(&row.updated_at)?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	async fn test_store() -> SqliteFlagStore {
		let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
		let store = SqliteFlagStore::new(pool);
		store.migrate().await.unwrap();
		store
	}

	fn new_flag(project: i64, name: &str, rule: &str) -> NewFlag {
		NewFlag {
			project_id: ProjectId(project),
			name: name.to_string(),
			rule: rule.to_string(),
		}
	}

	#[tokio::test]
	async fn test_create_and_get_flag() {
		let store = test_store().await;

		let created = store.create_flag(new_flag(1, "test.flag", "1")).await.unwrap();
		assert_eq!(created.name, "test.flag");
		assert!(!created.is_archived());

		let fetched = store.get_flag(created.id).await.unwrap().unwrap();
		assert_eq!(fetched, created);

		let by_name = store
			.get_flag_by_name(ProjectId(1), "test.flag")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(by_name.id, created.id);
	}

	#[tokio::test]
	async fn test_get_missing_flag_is_none() {
		let store = test_store().await;
		assert!(store.get_flag(FlagId(999)).await.unwrap().is_none());
		assert!(store
			.get_flag_by_name(ProjectId(1), "missing")
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_duplicate_name_rejected() {
		let store = test_store().await;
		store.create_flag(new_flag(1, "test.flag", "1")).await.unwrap();

		let err = store.create_flag(new_flag(1, "test.flag", "0")).await;
		assert!(matches!(err, Err(FlagsServerError::DuplicateFlagName(_))));

		// Same name in another project is fine.
		store.create_flag(new_flag(2, "test.flag", "0")).await.unwrap();
	}

	#[tokio::test]
	async fn test_invalid_name_rejected() {
		let store = test_store().await;
		let err = store.create_flag(new_flag(1, "Bad Name", "1")).await;
		assert!(matches!(err, Err(FlagsServerError::InvalidFlagName(_))));
	}

	#[tokio::test]
	async fn test_partial_update() {
		let store = test_store().await;
		let created = store.create_flag(new_flag(1, "test.flag", "0")).await.unwrap();

		let updated = store
			.update_flag(
				created.id,
				FlagUpdate {
					rule: Some("1".to_string()),
					..Default::default()
				},
			)
			.await
			.unwrap()
			.unwrap();

		assert_eq!(updated.name, "test.flag");
		assert_eq!(updated.rule, "1");
		assert!(updated.updated_at > created.updated_at);

		let missing = store.update_flag(FlagId(999), FlagUpdate::default()).await.unwrap();
		assert!(missing.is_none());
	}

	#[tokio::test]
	async fn test_updated_at_strictly_increases_under_rapid_mutation() {
		let store = test_store().await;
		let created = store.create_flag(new_flag(1, "test.flag", "0")).await.unwrap();

		let mut prev = created.updated_at;
		for i in 0..20 {
			let rule = if i % 2 == 0 { "1" } else { "0" };
			let updated = store
				.update_flag(
					created.id,
					FlagUpdate {
						rule: Some(rule.to_string()),
						..Default::default()
					},
				)
				.await
				.unwrap()
				.unwrap();
			assert!(updated.updated_at > prev, "updated_at must strictly increase");
			prev = updated.updated_at;
		}
	}

	#[tokio::test]
	async fn test_mutations_never_reuse_a_project_timestamp() {
		let store = test_store().await;
		let a = store.create_flag(new_flag(1, "flag.a", "0")).await.unwrap();
		let b = store.create_flag(new_flag(1, "flag.b", "0")).await.unwrap();

		// Interleave mutations across sibling rows: every timestamp must
		// clear the project-wide max, or a row updated in the same
		// microsecond as its sibling sits below an already-emitted cursor.
		let mut high = a.updated_at.max(b.updated_at);
		for i in 0..10 {
			let id = if i % 2 == 0 { a.id } else { b.id };
			let updated = store
				.update_flag(
					id,
					FlagUpdate {
						rule: Some("1".to_string()),
						..Default::default()
					},
				)
				.await
				.unwrap()
				.unwrap();
			assert!(
				updated.updated_at > high,
				"updated_at must exceed every prior timestamp in the project"
			);
			high = updated.updated_at;
		}

		let archived = store.archive_flag(a.id).await.unwrap().unwrap();
		assert!(archived.updated_at > high);
	}

	#[tokio::test]
	async fn test_rapid_creates_get_distinct_timestamps() {
		let store = test_store().await;

		let mut prev = None;
		for i in 0..10 {
			let created = store
				.create_flag(new_flag(1, &format!("flag.n{i}"), "1"))
				.await
				.unwrap();
			if let Some(prev) = prev {
				assert!(created.updated_at > prev, "created rows must not share a cursor position");
			}
			prev = Some(created.updated_at);
		}
	}

	#[tokio::test]
	async fn test_archive_bumps_updated_at_and_filters_from_list() {
		let store = test_store().await;
		let a = store.create_flag(new_flag(1, "flag.a", "1")).await.unwrap();
		let b = store.create_flag(new_flag(1, "flag.b", "1")).await.unwrap();

		let archived = store.archive_flag(a.id).await.unwrap().unwrap();
		assert!(archived.is_archived());
		assert!(archived.updated_at > a.updated_at);

		let live = store.list_flags(ProjectId(1), false).await.unwrap();
		assert_eq!(live.len(), 1);
		assert_eq!(live[0].id, b.id);

		let all = store.list_flags(ProjectId(1), true).await.unwrap();
		assert_eq!(all.len(), 2);
	}

	#[tokio::test]
	async fn test_stored_timestamps_roundtrip() {
		let store = test_store().await;
		let created = store.create_flag(new_flag(1, "test.flag", "1")).await.unwrap();

		// The value read back from storage must compare equal to the value
		// returned at write time (microsecond truncation on both sides).
		let fetched = store.get_flag(created.id).await.unwrap().unwrap();
		assert_eq!(fetched.updated_at, created.updated_at);
		assert_eq!(fetched.created_at, created.created_at);
	}
}
