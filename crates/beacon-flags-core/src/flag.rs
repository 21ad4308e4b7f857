// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Rule;

/// Unique identifier for a feature flag.
///
/// Integer rather than opaque: cursor ties are broken by ascending id, so
/// the id must carry a total order.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct FlagId(pub i64);

impl FlagId {
	pub const fn new(id: i64) -> Self {
		Self(id)
	}
}

impl From<i64> for FlagId {
	fn from(id: i64) -> Self {
		Self(id)
	}
}

impl std::fmt::Display for FlagId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for FlagId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(s.parse()?))
	}
}

/// Unique identifier for a project (the owning scope of a flag).
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ProjectId(pub i64);

impl ProjectId {
	pub const fn new(id: i64) -> Self {
		Self(id)
	}
}

impl From<i64> for ProjectId {
	fn from(id: i64) -> Self {
		Self(id)
	}
}

impl std::fmt::Display for ProjectId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for ProjectId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(s.parse()?))
	}
}

/// A boolean feature flag scoped to a project.
///
/// `updated_at` strictly increases on every mutation of the row, archival
/// included, so `(updated_at, id)` totally orders the rows of a project and
/// `updated_at` is usable as a sync cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
	pub id: FlagId,
	pub project_id: ProjectId,
	/// Unique within a project.
	pub name: String,
	/// Opaque rule expression, parsed via [`Rule::parse`].
	pub rule: String,
	/// Soft-delete marker. Archived flags still appear in delta frames as
	/// removal tombstones; they are excluded only from snapshots.
	#[serde(default)]
	pub archived_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Flag {
	/// Validates the flag name format.
	///
	/// Valid names:
	/// - Lowercase alphanumeric with dots and underscores
	/// - 3-100 characters
	/// - Cannot start or end with dot, no consecutive dots
	/// - Pattern: `^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)*$`
	pub fn validate_name(name: &str) -> bool {
		if name.len() < 3 || name.len() > 100 {
			return false;
		}

		if name.starts_with('.') || name.ends_with('.') {
			return false;
		}

		let mut chars = name.chars();

		// First character must be lowercase letter
		match chars.next() {
			Some(c) if c.is_ascii_lowercase() => {}
			_ => return false,
		}

		let mut prev_was_dot = false;
		for c in chars {
			if c == '.' {
				if prev_was_dot {
					return false;
				}
				prev_was_dot = true;
			} else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
				prev_was_dot = false;
			} else {
				return false;
			}
		}

		!prev_was_dot
	}

	/// Checks if this flag is archived.
	pub fn is_archived(&self) -> bool {
		self.archived_at.is_some()
	}

	/// Parses the rule expression into its structured form.
	pub fn parsed_rule(&self) -> Rule {
		Rule::parse(&self.rule)
	}

	/// Sort key imposing the delta-stream order: `(updated_at, id)` ascending.
	pub fn stream_order(&self) -> (DateTime<Utc>, FlagId) {
		(self.updated_at, self.id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	fn flag(id: i64, name: &str, rule: &str) -> Flag {
		let now = Utc::now();
		Flag {
			id: FlagId(id),
			project_id: ProjectId(1),
			name: name.to_string(),
			rule: rule.to_string(),
			archived_at: None,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn test_validate_name() {
		assert!(Flag::validate_name("checkout.new_flow"));
		assert!(Flag::validate_name("test_flag"));
		assert!(!Flag::validate_name("ab"));
		assert!(!Flag::validate_name("Checkout"));
		assert!(!Flag::validate_name(".leading"));
		assert!(!Flag::validate_name("trailing."));
		assert!(!Flag::validate_name("double..dot"));
	}

	#[test]
	fn test_is_archived() {
		let mut f = flag(1, "test.flag", "1");
		assert!(!f.is_archived());
		f.archived_at = Some(Utc::now());
		assert!(f.is_archived());
	}

	#[test]
	fn test_serialization_includes_archived_at_null() {
		let f = flag(1, "test.flag", "1");
		let json = serde_json::to_string(&f).unwrap();
		assert!(json.contains(r#""archived_at":null"#));
		assert!(json.contains(r#""name":"test.flag""#));
		assert!(json.contains(r#""rule":"1""#));
	}

	#[test]
	fn test_id_roundtrip() {
		let id: FlagId = "42".parse().unwrap();
		assert_eq!(id, FlagId(42));
		assert_eq!(id.to_string(), "42");

		let project: ProjectId = "7".parse().unwrap();
		assert_eq!(project, ProjectId(7));
	}
}
