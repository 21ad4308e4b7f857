// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change notification fan-out for flag mutations.
//!
//! One broadcast channel per project, created on first subscribe. The
//! contract is deliberately weak: at least one notification reaches each
//! subscriber after any committed mutation, and coalescing is permitted.
//! Receivers that lag simply drop intermediate notices; the delta encoder
//! diffs against live state, so a coalesced burst still yields one correct
//! frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use beacon_flags_core::ProjectId;

/// Default channel capacity per project.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A change notice. Carries no delta; consumers recompute from the store.
#[derive(Debug, Clone, Copy)]
pub struct ChangeNotice {
	pub at: DateTime<Utc>,
}

impl ChangeNotice {
	fn now() -> Self {
		Self { at: Utc::now() }
	}
}

/// Configuration for the change notifier.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
	/// Capacity of each per-project broadcast channel. Overflow is safe:
	/// a lagged receiver still learns that something changed.
	pub channel_capacity: usize,
}

impl Default for NotifierConfig {
	fn default() -> Self {
		Self {
			channel_capacity: DEFAULT_CHANNEL_CAPACITY,
		}
	}
}

/// Fans out flag-change notices to the streaming connections of a project.
pub struct ChangeNotifier {
	config: NotifierConfig,
	channels: RwLock<HashMap<ProjectId, broadcast::Sender<ChangeNotice>>>,
	total_notices: AtomicU64,
}

impl ChangeNotifier {
	pub fn new(config: NotifierConfig) -> Self {
		Self {
			config,
			channels: RwLock::new(HashMap::new()),
			total_notices: AtomicU64::new(0),
		}
	}

	pub fn with_defaults() -> Self {
		Self::new(NotifierConfig::default())
	}

	/// Subscribe to change notices for a project.
	pub async fn subscribe(&self, project_id: ProjectId) -> broadcast::Receiver<ChangeNotice> {
		{
			let channels = self.channels.read().await;
			if let Some(sender) = channels.get(&project_id) {
				debug!(
					project_id = %project_id,
					receiver_count = sender.receiver_count(),
					"subscribed to existing change channel"
				);
				return sender.subscribe();
			}
		}

		let mut channels = self.channels.write().await;

		// Another task may have created it while we waited for the lock.
		if let Some(sender) = channels.get(&project_id) {
			return sender.subscribe();
		}

		let (sender, receiver) = broadcast::channel(self.config.channel_capacity);
		channels.insert(project_id, sender);
		info!(project_id = %project_id, "created change channel for project");
		receiver
	}

	/// Notify subscribers that some flag of the project mutated.
	///
	/// Returns the number of receivers reached; zero when nobody listens.
	pub async fn notify(&self, project_id: ProjectId) -> usize {
		let channels = self.channels.read().await;
		let Some(sender) = channels.get(&project_id) else {
			debug!(project_id = %project_id, "no change channel for project");
			return 0;
		};

		match sender.send(ChangeNotice::now()) {
			Ok(count) => {
				self.total_notices.fetch_add(1, Ordering::Relaxed);
				debug!(project_id = %project_id, receiver_count = count, "notified project subscribers");
				count
			}
			Err(_) => {
				debug!(project_id = %project_id, "no receivers for change notice");
				0
			}
		}
	}

	/// Drop channels with no live receivers. Returns the number removed.
	pub async fn cleanup_idle_channels(&self) -> usize {
		let mut channels = self.channels.write().await;
		let before = channels.len();
		channels.retain(|_, sender| sender.receiver_count() > 0);
		let removed = before - channels.len();
		if removed > 0 {
			info!(removed_channels = removed, "cleaned up idle change channels");
		}
		removed
	}

	pub async fn channel_count(&self) -> usize {
		self.channels.read().await.len()
	}

	pub fn total_notices(&self) -> u64 {
		self.total_notices.load(Ordering::Relaxed)
	}
}

impl Default for ChangeNotifier {
	fn default() -> Self {
		Self::with_defaults()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tokio::time::timeout;

	#[tokio::test]
	async fn test_notify_reaches_subscriber() {
		let notifier = ChangeNotifier::with_defaults();
		let mut rx = notifier.subscribe(ProjectId(1)).await;

		let count = notifier.notify(ProjectId(1)).await;
		assert_eq!(count, 1);

		let notice = timeout(Duration::from_millis(100), rx.recv()).await;
		assert!(notice.is_ok());
	}

	#[tokio::test]
	async fn test_notify_without_subscribers() {
		let notifier = ChangeNotifier::with_defaults();
		assert_eq!(notifier.notify(ProjectId(1)).await, 0);
	}

	#[tokio::test]
	async fn test_projects_are_isolated() {
		let notifier = ChangeNotifier::with_defaults();
		let mut rx_one = notifier.subscribe(ProjectId(1)).await;
		let mut rx_two = notifier.subscribe(ProjectId(2)).await;

		notifier.notify(ProjectId(1)).await;

		assert!(timeout(Duration::from_millis(100), rx_one.recv())
			.await
			.is_ok());
		assert!(timeout(Duration::from_millis(50), rx_two.recv())
			.await
			.is_err());
	}

	#[tokio::test]
	async fn test_lagged_receiver_still_learns_of_changes() {
		let notifier = ChangeNotifier::new(NotifierConfig { channel_capacity: 2 });
		let mut rx = notifier.subscribe(ProjectId(1)).await;

		// Overflow the channel; intermediate notices coalesce away.
		for _ in 0..10 {
			notifier.notify(ProjectId(1)).await;
		}

		// First recv reports the lag; it still counts as a notification.
		match rx.recv().await {
			Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
			Err(e) => panic!("unexpected recv error: {e}"),
		}
	}

	#[tokio::test]
	async fn test_cleanup_idle_channels() {
		let notifier = ChangeNotifier::with_defaults();
		{
			let _rx = notifier.subscribe(ProjectId(1)).await;
			assert_eq!(notifier.channel_count().await, 1);
		}
		// Receiver dropped here.

		assert_eq!(notifier.cleanup_idle_channels().await, 1);
		assert_eq!(notifier.channel_count().await, 0);
	}
}
