// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background synchronization of the flag cache over the delta stream.
//!
//! This module manages the long-lived streaming connection to the server.
//! Each frame on the stream carries the changed flags as JSON in the
//! `data` field and the frame cursor in the `id` field; the cursor of the
//! last applied frame is echoed back in `Last-Event-ID` on reconnect so
//! the server can resume the delta sequence instead of resending the
//! world.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_flags_core::{Cursor, EvaluationContext, Flag, Frame, SharedRuleEvaluator};
use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::FlagCache;
use crate::error::{FlagsError, Result};

/// Lifecycle state of the synchronization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncState {
	/// No frame or snapshot has been applied yet.
	Uninitialized = 0,
	/// Connected and applying frames; cached values are live.
	Syncing = 1,
	/// Connection lost; cached values are served stale while the loop
	/// reconnects.
	Disconnected = 2,
	/// Explicitly stopped; terminal.
	Closed = 3,
}

impl SyncState {
	fn from_u8(value: u8) -> Self {
		match value {
			1 => SyncState::Syncing,
			2 => SyncState::Disconnected,
			3 => SyncState::Closed,
			_ => SyncState::Uninitialized,
		}
	}
}

/// Configuration for sync connection behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Base delay for reconnection attempts.
	pub reconnect_base_delay: Duration,
	/// Maximum delay for reconnection attempts.
	pub reconnect_max_delay: Duration,
	/// Maximum number of consecutive reconnection attempts (0 = unlimited).
	pub max_reconnect_attempts: u32,
	/// Timeout for establishing a streaming connection.
	pub connect_timeout: Duration,
	/// Timeout for one-shot snapshot fetches.
	pub request_timeout: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			reconnect_base_delay: Duration::from_secs(1),
			reconnect_max_delay: Duration::from_secs(30),
			max_reconnect_attempts: 0, // Unlimited
			connect_timeout: Duration::from_secs(10),
			request_timeout: Duration::from_secs(10),
		}
	}
}

/// Manages the background delta-stream connection.
#[derive(Debug)]
pub struct SyncClient {
	/// Current lifecycle state, shared with the background task.
	state: Arc<AtomicU8>,
	/// Number of reconnection attempts.
	reconnect_attempts: Arc<AtomicU64>,
	/// Number of frames applied to the cache.
	frames_applied: Arc<AtomicU64>,
	/// Handle to the background task.
	task_handle: Option<JoinHandle<()>>,
	/// Channel to signal shutdown.
	shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SyncClient {
	/// Creates a new sync client in the [`SyncState::Uninitialized`] state.
	pub fn new() -> Self {
		Self {
			state: Arc::new(AtomicU8::new(SyncState::Uninitialized as u8)),
			reconnect_attempts: Arc::new(AtomicU64::new(0)),
			frames_applied: Arc::new(AtomicU64::new(0)),
			task_handle: None,
			shutdown_tx: None,
		}
	}

	/// Starts the sync loop in a background task.
	///
	/// The loop automatically reconnects on failure with exponential
	/// backoff, resuming from the cache cursor on each attempt.
	pub async fn start(
		&mut self,
		http: reqwest::Client,
		stream_url: String,
		cache: FlagCache,
		evaluator: SharedRuleEvaluator,
		context: EvaluationContext,
		config: SyncConfig,
	) -> Result<()> {
		// If already running, stop first
		self.stop().await;
		self.state
			.store(SyncState::Uninitialized as u8, Ordering::SeqCst);

		let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
		self.shutdown_tx = Some(shutdown_tx);

		let state = Arc::clone(&self.state);
		let reconnect_attempts = Arc::clone(&self.reconnect_attempts);
		let frames_applied = Arc::clone(&self.frames_applied);

		let handle = tokio::spawn(async move {
			run_sync_loop(
				http,
				stream_url,
				cache,
				evaluator,
				context,
				config,
				state,
				reconnect_attempts,
				frames_applied,
				shutdown_rx,
			)
			.await;
		});

		self.task_handle = Some(handle);
		Ok(())
	}

	/// Stops the sync loop and transitions to [`SyncState::Closed`].
	///
	/// Idempotent; no further cache mutations happen after this returns.
	pub async fn stop(&mut self) {
		if let Some(tx) = self.shutdown_tx.take() {
			let _ = tx.send(()).await;
		}
		if let Some(handle) = self.task_handle.take() {
			handle.abort();
			let _ = handle.await;
		}
		self.state.store(SyncState::Closed as u8, Ordering::SeqCst);
	}

	/// Returns the current lifecycle state.
	pub fn state(&self) -> SyncState {
		SyncState::from_u8(self.state.load(Ordering::SeqCst))
	}

	/// Returns true if the background task is running.
	pub fn is_running(&self) -> bool {
		self.task_handle.is_some()
	}

	/// Returns the number of reconnection attempts since the loop started.
	pub fn reconnect_attempts(&self) -> u64 {
		self.reconnect_attempts.load(Ordering::SeqCst)
	}

	/// Returns the number of frames applied since the loop started.
	pub fn frames_applied(&self) -> u64 {
		self.frames_applied.load(Ordering::SeqCst)
	}
}

impl Default for SyncClient {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for SyncClient {
	fn drop(&mut self) {
		if let Some(handle) = self.task_handle.take() {
			handle.abort();
		}
	}
}

/// Runs the sync loop with reconnection logic.
#[allow(clippy::too_many_arguments)]
async fn run_sync_loop(
	http: reqwest::Client,
	stream_url: String,
	cache: FlagCache,
	evaluator: SharedRuleEvaluator,
	context: EvaluationContext,
	config: SyncConfig,
	state: Arc<AtomicU8>,
	reconnect_attempts: Arc<AtomicU64>,
	frames_applied: Arc<AtomicU64>,
	mut shutdown_rx: mpsc::Receiver<()>,
) {
	let mut consecutive_failures: u32 = 0;

	loop {
		// Check for shutdown signal
		if shutdown_rx.try_recv().is_ok() {
			info!("Sync loop received shutdown signal");
			state.store(SyncState::Closed as u8, Ordering::SeqCst);
			break;
		}

		info!(url = %stream_url, "Connecting to flag stream");

		match connect_and_stream(
			&http,
			&stream_url,
			&cache,
			&evaluator,
			&context,
			config.connect_timeout,
			&state,
			&frames_applied,
		)
		.await
		{
			Ok(()) => {
				// Server closed the stream; resume from the cursor.
				debug!("Flag stream ended normally");
				consecutive_failures = 0;
			}
			Err(e) => {
				error!(error = %e, "Flag stream connection error");
				consecutive_failures += 1;
			}
		}

		// Cached values are stale-but-served until the stream is back.
		state.store(SyncState::Disconnected as u8, Ordering::SeqCst);

		// Check max reconnect attempts
		if config.max_reconnect_attempts > 0 && consecutive_failures >= config.max_reconnect_attempts {
			error!(
				attempts = consecutive_failures,
				"Max reconnection attempts reached, stopping sync"
			);
			state.store(SyncState::Disconnected as u8, Ordering::SeqCst);
			break;
		}

		// Calculate backoff delay, capped at the configured maximum
		let factor = 2u64.saturating_pow(consecutive_failures.min(10));
		let delay_ms = config.reconnect_base_delay.as_millis() as u64 * factor;
		let delay = Duration::from_millis(delay_ms.min(config.reconnect_max_delay.as_millis() as u64));

		reconnect_attempts.fetch_add(1, Ordering::SeqCst);
		warn!(
			delay_ms = delay.as_millis(),
			attempts = consecutive_failures,
			"Reconnecting to flag stream"
		);

		// Wait with shutdown check
		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown_rx.recv() => {
				info!("Sync loop received shutdown signal during reconnect wait");
				state.store(SyncState::Closed as u8, Ordering::SeqCst);
				break;
			}
		}
	}
}

/// Connects to the flag stream and applies frames until disconnection.
#[allow(clippy::too_many_arguments)]
async fn connect_and_stream(
	http: &reqwest::Client,
	stream_url: &str,
	cache: &FlagCache,
	evaluator: &SharedRuleEvaluator,
	context: &EvaluationContext,
	connect_timeout: Duration,
	state: &Arc<AtomicU8>,
	frames_applied: &Arc<AtomicU64>,
) -> Result<()> {
	let mut request = http
		.get(stream_url)
		.header("Accept", "text/event-stream")
		.header("Cache-Control", "no-cache");

	// Echo the last applied cursor so the server resumes the delta
	// sequence instead of resending everything.
	if let Some(cursor) = cache.cursor().await {
		request = request.header("Last-Event-ID", cursor.to_rfc3339());
	}

	let response = tokio::time::timeout(connect_timeout, request.send())
		.await
		.map_err(|_| FlagsError::Timeout)?
		.map_err(FlagsError::ConnectionFailed)?;

	if !response.status().is_success() {
		return Err(FlagsError::ServerError {
			status: response.status().as_u16(),
			message: response.text().await.unwrap_or_default(),
		});
	}

	info!("Flag stream connection established");

	let stream = response.bytes_stream();
	let mut event_stream = stream.eventsource();

	while let Some(event_result) = event_stream.next().await {
		match event_result {
			Ok(event) => {
				// Skip keep-alive events with no payload
				if event.data.is_empty() {
					continue;
				}
				// A malformed frame is discarded in full and treated as
				// a connection error, never partially applied.
				let frame = parse_frame(&event)?;
				cache.merge(&frame, evaluator.as_ref(), context).await;
				frames_applied.fetch_add(1, Ordering::SeqCst);
				state.store(SyncState::Syncing as u8, Ordering::SeqCst);
				debug!(
					changed = frame.changed.len(),
					cursor = %frame.cursor,
					"Applied flag frame"
				);
			}
			Err(e) => {
				return Err(FlagsError::StreamError(e.to_string()));
			}
		}
	}

	Ok(())
}

/// Parses a wire event into a frame: changed flags from `data`, cursor
/// from `id`.
fn parse_frame(event: &Event) -> Result<Frame> {
	let changed: Vec<Flag> = serde_json::from_str(&event.data).map_err(|e| {
		warn!(data = %event.data, error = %e, "Failed to parse frame payload");
		FlagsError::ParseFailed(e.to_string())
	})?;
	let cursor = Cursor::parse(&event.id).map_err(|e| {
		warn!(id = %event.id, error = %e, "Failed to parse frame cursor");
		FlagsError::ParseFailed(e.to_string())
	})?;
	Ok(Frame::new(changed, cursor))
}

/// Fetches a one-shot snapshot and replaces the cache contents.
///
/// Used when live updates are disabled; no streaming connection is held
/// and the sync state is left untouched.
pub(crate) async fn fetch_snapshot(
	http: &reqwest::Client,
	snapshot_url: &str,
	cache: &FlagCache,
	evaluator: &SharedRuleEvaluator,
	context: &EvaluationContext,
	request_timeout: Duration,
) -> Result<usize> {
	let request = http.get(snapshot_url).header("Accept", "application/json");

	let response = tokio::time::timeout(request_timeout, request.send())
		.await
		.map_err(|_| FlagsError::Timeout)?
		.map_err(FlagsError::RequestFailed)?;

	if !response.status().is_success() {
		return Err(FlagsError::ServerError {
			status: response.status().as_u16(),
			message: response.text().await.unwrap_or_default(),
		});
	}

	let flags: Vec<Flag> = response
		.json()
		.await
		.map_err(|e| FlagsError::ParseFailed(e.to_string()))?;

	cache.replace_all(&flags, evaluator.as_ref(), context).await;
	info!(flags = flags.len(), "Flag cache loaded from snapshot");
	Ok(flags.len())
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_flags_core::{FlagId, ProjectId};
	use chrono::{TimeZone, Utc};

	#[test]
	fn test_sync_config_defaults() {
		let config = SyncConfig::default();
		assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
		assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
		assert_eq!(config.max_reconnect_attempts, 0);
		assert_eq!(config.connect_timeout, Duration::from_secs(10));
		assert_eq!(config.request_timeout, Duration::from_secs(10));
	}

	#[test]
	fn test_sync_client_initial_state() {
		let client = SyncClient::new();
		assert_eq!(client.state(), SyncState::Uninitialized);
		assert!(!client.is_running());
		assert_eq!(client.reconnect_attempts(), 0);
		assert_eq!(client.frames_applied(), 0);
	}

	#[test]
	fn test_parse_frame_from_wire_event() {
		let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
		let flag = Flag {
			id: FlagId::new(7),
			project_id: ProjectId::new(1),
			name: "billing.enabled".to_string(),
			rule: "1".to_string(),
			archived_at: None,
			created_at: at,
			updated_at: at,
		};
		let event = Event {
			event: "message".to_string(),
			data: serde_json::to_string(&vec![flag]).unwrap(),
			id: Cursor::new(at).to_rfc3339(),
			retry: None,
		};

		let frame = parse_frame(&event).unwrap();
		assert_eq!(frame.changed.len(), 1);
		assert_eq!(frame.changed[0].name, "billing.enabled");
		assert_eq!(frame.cursor, Cursor::new(at));
	}

	#[test]
	fn test_parse_frame_rejects_malformed_payload() {
		let event = Event {
			event: "message".to_string(),
			data: "not json".to_string(),
			id: "2024-06-01T12:00:00.000000Z".to_string(),
			retry: None,
		};
		assert!(matches!(
			parse_frame(&event),
			Err(FlagsError::ParseFailed(_))
		));
	}

	#[test]
	fn test_parse_frame_rejects_malformed_cursor() {
		let event = Event {
			event: "message".to_string(),
			data: "[]".to_string(),
			id: "not-a-timestamp".to_string(),
			retry: None,
		};
		assert!(matches!(
			parse_frame(&event),
			Err(FlagsError::ParseFailed(_))
		));
	}

	#[tokio::test]
	async fn test_stop_is_terminal_and_idempotent() {
		let mut client = SyncClient::new();
		assert_eq!(client.state(), SyncState::Uninitialized);

		// Stopping a never-started client still closes it.
		client.stop().await;
		assert_eq!(client.state(), SyncState::Closed);
		assert!(!client.is_running());

		client.stop().await;
		assert_eq!(client.state(), SyncState::Closed);
	}
}
