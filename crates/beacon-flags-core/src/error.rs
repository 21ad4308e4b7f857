// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors that can occur in the shared feature flags types.
#[derive(Debug, Error)]
pub enum FlagsError {
	#[error("invalid cursor: {0}")]
	InvalidCursor(String),

	#[error("invalid flag name: {0}")]
	InvalidFlagName(String),

	#[error("serialization error: {0}")]
	Serialization(String),
}

impl From<serde_json::Error> for FlagsError {
	fn from(err: serde_json::Error) -> Self {
		FlagsError::Serialization(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, FlagsError>;
