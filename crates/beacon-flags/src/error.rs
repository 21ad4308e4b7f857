// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the feature flags SDK.
//!
//! Sync errors are recovered internally by the background task; reads
//! against the cache never surface them. The worst user-visible effect of
//! any error here is a stale or default-valued flag.

use thiserror::Error;

/// Result type alias for the flags SDK.
pub type Result<T> = std::result::Result<T, FlagsError>;

/// Errors that can occur in the feature flags SDK.
#[derive(Error, Debug)]
pub enum FlagsError {
	/// Base URL is missing or invalid.
	#[error("Invalid or missing base URL")]
	InvalidBaseUrl,

	/// Project id is missing.
	#[error("Missing project id")]
	MissingProjectId,

	/// Failed to connect to the server.
	#[error("Failed to connect to server: {0}")]
	ConnectionFailed(#[source] reqwest::Error),

	/// HTTP request failed.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[source] reqwest::Error),

	/// Failed to parse a frame or snapshot from the server.
	#[error("Failed to parse server response: {0}")]
	ParseFailed(String),

	/// Server returned an error response.
	#[error("Server returned an error: {status} - {message}")]
	ServerError {
		/// HTTP status code.
		status: u16,
		/// Error message from server.
		message: String,
	},

	/// Frame stream error (premature close, transport failure).
	#[error("Stream error: {0}")]
	StreamError(String),

	/// A bounded connect or fetch exceeded its timeout.
	#[error("Request timed out")]
	Timeout,

	/// Client already closed.
	#[error("Client has been closed")]
	ClientClosed,
}

impl FlagsError {
	/// Returns true if this error follows the reconnect/backoff path.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			FlagsError::ConnectionFailed(_)
				| FlagsError::RequestFailed(_)
				| FlagsError::ParseFailed(_)
				| FlagsError::StreamError(_)
				| FlagsError::Timeout
				| FlagsError::ServerError {
					status: 500..=599,
					..
				}
		)
	}
}
