// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flags client backed by the delta-sync stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_flags_core::{
	Cursor, EvaluationContext, LiteralEvaluator, ProjectId, RuleEvaluator, SharedRuleEvaluator,
};
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::info;

use crate::cache::FlagCache;
use crate::error::{FlagsError, Result};
use crate::sync::{fetch_snapshot, SyncClient, SyncConfig, SyncState};

/// Configuration for the flags client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Whether to hold a streaming connection for live updates.
	///
	/// When disabled, the client performs a single snapshot fetch and the
	/// cached values stay static until [`FlagsClient::refresh`] is called.
	pub live_updates: bool,
	/// Sync connection configuration.
	pub sync: SyncConfig,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			live_updates: true,
			sync: SyncConfig::default(),
		}
	}
}

/// Builder for constructing a FlagsClient.
pub struct FlagsClientBuilder {
	base_url: Option<String>,
	project_id: Option<ProjectId>,
	config: ClientConfig,
	evaluator: Option<SharedRuleEvaluator>,
	context: EvaluationContext,
}

impl FlagsClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			base_url: None,
			project_id: None,
			config: ClientConfig::default(),
			evaluator: None,
			context: EvaluationContext::new(),
		}
	}

	/// Sets the base URL for the flags server.
	///
	/// Example: `https://flags.example.com`
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	/// Sets the project whose flags this client follows.
	pub fn project_id(mut self, project_id: impl Into<ProjectId>) -> Self {
		self.project_id = Some(project_id.into());
		self
	}

	/// Enables or disables live updates over the streaming connection.
	pub fn live_updates(mut self, enable: bool) -> Self {
		self.config.live_updates = enable;
		self
	}

	/// Sets the sync connection configuration.
	pub fn sync_config(mut self, config: SyncConfig) -> Self {
		self.config.sync = config;
		self
	}

	/// Sets the timeout for one-shot snapshot fetches.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.sync.request_timeout = timeout;
		self
	}

	/// Replaces the rule evaluator.
	///
	/// Defaults to [`LiteralEvaluator`], which recognizes only the literal
	/// `"1"`/`"0"` rules and fails closed on anything else.
	pub fn evaluator<E: RuleEvaluator + 'static>(mut self, evaluator: E) -> Self {
		self.evaluator = Some(Arc::new(evaluator));
		self
	}

	/// Sets the evaluation context rules are evaluated against.
	pub fn context(mut self, context: EvaluationContext) -> Self {
		self.context = context;
		self
	}

	/// Builds the FlagsClient and starts synchronization.
	///
	/// With live updates enabled this spawns the background sync loop;
	/// otherwise it performs a single snapshot fetch.
	pub async fn build(self) -> Result<FlagsClient> {
		let base_url = self.base_url.ok_or(FlagsError::InvalidBaseUrl)?;
		let project_id = self.project_id.ok_or(FlagsError::MissingProjectId)?;

		// Normalize base URL (remove trailing slash)
		let base_url = base_url.trim_end_matches('/').to_string();
		if base_url.is_empty() {
			return Err(FlagsError::InvalidBaseUrl);
		}

		let http = Client::builder()
			.connect_timeout(self.config.sync.connect_timeout)
			.build()
			.map_err(FlagsError::ConnectionFailed)?;

		let evaluator: SharedRuleEvaluator = self
			.evaluator
			.unwrap_or_else(|| Arc::new(LiteralEvaluator));

		let client = FlagsClient {
			base_url,
			project_id,
			http,
			cache: FlagCache::new(),
			sync: Arc::new(RwLock::new(SyncClient::new())),
			config: self.config,
			evaluator,
			context: self.context,
			closed: Arc::new(AtomicBool::new(false)),
		};

		client.start().await?;

		Ok(client)
	}
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Client for reading feature flags kept in sync with the server.
///
/// All reads are served from the local cache; the network is only touched
/// by the background sync loop or explicit refresh calls. Cached values
/// are served even while disconnected.
pub struct FlagsClient {
	base_url: String,
	project_id: ProjectId,
	http: Client,
	cache: FlagCache,
	sync: Arc<RwLock<SyncClient>>,
	config: ClientConfig,
	evaluator: SharedRuleEvaluator,
	context: EvaluationContext,
	closed: Arc<AtomicBool>,
}

impl FlagsClient {
	/// Creates a new builder for constructing a FlagsClient.
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	/// URL of the flags endpoint for this project.
	///
	/// The same endpoint serves both the stream and the one-shot snapshot;
	/// the `Accept` header selects between them.
	fn flags_url(&self) -> String {
		format!("{}/flags?project_id={}", self.base_url, self.project_id)
	}

	/// Starts synchronization according to the configured mode.
	pub async fn start(&self) -> Result<()> {
		self.check_closed()?;

		if self.config.live_updates {
			let mut sync = self.sync.write().await;
			sync.start(
				self.http.clone(),
				self.flags_url(),
				self.cache.clone(),
				Arc::clone(&self.evaluator),
				self.context.clone(),
				self.config.sync.clone(),
			)
			.await
		} else {
			self.refresh().await.map(|_| ())
		}
	}

	/// Fetches a fresh snapshot and replaces the cache, returning the
	/// number of flags received.
	pub async fn refresh(&self) -> Result<usize> {
		self.check_closed()?;
		fetch_snapshot(
			&self.http,
			&self.flags_url(),
			&self.cache,
			&self.evaluator,
			&self.context,
			self.config.sync.request_timeout,
		)
		.await
	}

	/// Returns whether the named flag is enabled.
	///
	/// Unknown flags and flags with unrecognized rules are disabled.
	pub async fn is_enabled(&self, name: &str) -> bool {
		self.cache.is_enabled(name).await
	}

	/// Returns whether the named flag is enabled, with a caller-supplied
	/// default for unknown flags.
	pub async fn is_enabled_or(&self, name: &str, default: bool) -> bool {
		self.cache.is_enabled_or(name, default).await
	}

	/// Returns a point-in-time copy of all known flag values.
	pub async fn all(&self) -> std::collections::HashMap<String, bool> {
		self.cache.all().await
	}

	/// Returns the current sync lifecycle state.
	pub async fn state(&self) -> SyncState {
		if self.closed.load(Ordering::SeqCst) {
			return SyncState::Closed;
		}
		self.sync.read().await.state()
	}

	/// Returns the cursor of the last applied frame, if any.
	pub async fn cursor(&self) -> Option<Cursor> {
		self.cache.cursor().await
	}

	/// Returns true if the cache has received at least one frame or
	/// snapshot.
	pub async fn is_initialized(&self) -> bool {
		self.cache.is_initialized().await
	}

	/// Returns the number of cached flags.
	pub async fn flag_count(&self) -> usize {
		self.cache.flag_count().await
	}

	/// Returns true if the background sync task is running.
	pub async fn is_syncing(&self) -> bool {
		self.sync.read().await.is_running()
	}

	/// Checks if the client has been closed.
	fn check_closed(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(FlagsError::ClientClosed);
		}
		Ok(())
	}

	/// Closes the client and stops the background sync task.
	///
	/// Idempotent and terminal; cached values remain readable but no
	/// further updates are applied.
	pub async fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.sync.write().await.stop().await;
		info!("Flags client closed");
	}
}
