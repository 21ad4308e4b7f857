// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

use beacon_flags_core::FlagId;

/// Errors that can occur in the server-side flags implementation.
#[derive(Debug, Error)]
pub enum FlagsServerError {
	#[error("flag not found: {0}")]
	FlagNotFound(FlagId),

	#[error("invalid flag name: {0}")]
	InvalidFlagName(String),

	#[error("duplicate flag name: {0}")]
	DuplicateFlagName(String),

	#[error("database error: {0}")]
	Database(String),

	#[error("serialization error: {0}")]
	Serialization(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl From<sqlx::Error> for FlagsServerError {
	fn from(err: sqlx::Error) -> Self {
		FlagsServerError::Database(err.to_string())
	}
}

impl From<serde_json::Error> for FlagsServerError {
	fn from(err: serde_json::Error) -> Self {
		FlagsServerError::Serialization(err.to_string())
	}
}

impl From<beacon_flags_core::FlagsError> for FlagsServerError {
	fn from(err: beacon_flags_core::FlagsError) -> Self {
		FlagsServerError::Internal(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, FlagsServerError>;
