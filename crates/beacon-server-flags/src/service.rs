// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mutation facade tying the store to the change notifier.
//!
//! Every committed mutation must be followed by at least one change notice
//! for the owning project; the delta stream depends on that trigger, not on
//! what the notice carries. Routing mutations through [`FlagService`] keeps
//! the pairing in one place.

use std::sync::Arc;

use tracing::info;

use beacon_flags_core::{Flag, FlagId, ProjectId};

use crate::error::Result;
use crate::notify::ChangeNotifier;
use crate::repository::{FlagStore, FlagUpdate, NewFlag};

/// Flag CRUD with change notification on every committed mutation.
#[derive(Clone)]
pub struct FlagService {
	store: Arc<dyn FlagStore>,
	notifier: Arc<ChangeNotifier>,
}

impl FlagService {
	pub fn new(store: Arc<dyn FlagStore>, notifier: Arc<ChangeNotifier>) -> Self {
		Self { store, notifier }
	}

	pub fn store(&self) -> Arc<dyn FlagStore> {
		Arc::clone(&self.store)
	}

	pub fn notifier(&self) -> Arc<ChangeNotifier> {
		Arc::clone(&self.notifier)
	}

	pub async fn create_flag(&self, new_flag: NewFlag) -> Result<Flag> {
		let flag = self.store.create_flag(new_flag).await?;
		info!(flag_id = %flag.id, project_id = %flag.project_id, name = %flag.name, "flag created");
		self.notifier.notify(flag.project_id).await;
		Ok(flag)
	}

	/// Direct lookup; absence is `Ok(None)`, never an error.
	pub async fn get_flag(&self, id: FlagId) -> Result<Option<Flag>> {
		self.store.get_flag(id).await
	}

	pub async fn get_flag_by_name(&self, project_id: ProjectId, name: &str) -> Result<Option<Flag>> {
		self.store.get_flag_by_name(project_id, name).await
	}

	/// Partial update; unset fields stay unchanged. Returns `None` when the
	/// flag does not exist (no notification fires).
	pub async fn update_flag(&self, id: FlagId, update: FlagUpdate) -> Result<Option<Flag>> {
		let Some(flag) = self.store.update_flag(id, update).await? else {
			return Ok(None);
		};
		info!(flag_id = %flag.id, project_id = %flag.project_id, "flag updated");
		self.notifier.notify(flag.project_id).await;
		Ok(Some(flag))
	}

	/// Soft delete. The archived row keeps flowing through the delta stream
	/// as a removal tombstone.
	pub async fn archive_flag(&self, id: FlagId) -> Result<Option<Flag>> {
		let Some(flag) = self.store.archive_flag(id).await? else {
			return Ok(None);
		};
		info!(flag_id = %flag.id, project_id = %flag.project_id, "flag archived");
		self.notifier.notify(flag.project_id).await;
		Ok(Some(flag))
	}
}
