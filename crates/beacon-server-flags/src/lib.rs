// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flags delta-sync server for Beacon.
//!
//! This crate turns flag mutations into an ordered, resumable delta stream.
//! Mutations land in the [`FlagStore`], the [`ChangeNotifier`] wakes the
//! streaming connections of the affected project, and each connection's
//! [`DeltaEncoder`] recomputes its diff against the live row set, so
//! coalesced notifications and slow consumers cost one frame, never an
//! unbounded queue.
//!
//! # Architecture
//!
//! - `repository` - Durable flag storage with the monotonic `updated_at` invariant
//! - `notify` - Per-project change notification fan-out
//! - `delta` - Cursor-based diff computation against live state
//! - `transport` - Frame stream / one-shot snapshot serialization
//! - `service` - Mutation facade pairing commits with notifications
//! - `http` - The `GET /flags` route dispatching on `Accept`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beacon_server_flags::{
//!     AppState, ChangeNotifier, FlagService, NewFlag, SqliteFlagStore,
//! };
//!
//! let store = SqliteFlagStore::new(pool);
//! store.migrate().await?;
//!
//! let store = Arc::new(store);
//! let notifier = Arc::new(ChangeNotifier::with_defaults());
//! let service = FlagService::new(store.clone(), notifier.clone());
//!
//! let app = beacon_server_flags::http::router(AppState::new(store, notifier));
//!
//! // Each committed mutation produces a delta frame on open streams.
//! service.create_flag(NewFlag {
//!     project_id,
//!     name: "checkout.new_flow".into(),
//!     rule: "1".into(),
//! }).await?;
//! ```

pub mod delta;
pub mod error;
pub mod http;
pub mod notify;
pub mod repository;
pub mod service;
pub mod transport;

pub use delta::DeltaEncoder;
pub use error::{FlagsServerError, Result};
pub use http::{router, AppState};
pub use notify::{ChangeNotice, ChangeNotifier, NotifierConfig};
pub use repository::{FlagStore, FlagUpdate, NewFlag, SqliteFlagStore};
pub use service::FlagService;
pub use transport::{frames, snapshot, sse_frames};

// Re-export core types for convenience
pub use beacon_flags_core::{Cursor, Flag, FlagId, Frame, ProjectId};
