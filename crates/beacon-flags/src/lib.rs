// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature Flags Rust SDK for Beacon.
//!
//! This crate provides a client library that keeps a local flag cache in
//! sync with the Beacon server over a cursor-resumable delta stream.
//! Reads never touch the network; cached values keep serving while
//! disconnected.
//!
//! # Features
//!
//! - **Delta Sync**: Streamed frames carry only the flags that changed
//! - **Cursor Resume**: Reconnects pick up where the stream left off
//! - **Local Caching**: Flag reads are in-memory map lookups
//! - **One-shot Mode**: A single snapshot fetch when live updates are off
//! - **Pluggable Rules**: Bring your own [`RuleEvaluator`]
//!
//! # Example
//!
//! ```ignore
//! use beacon_flags::{FlagsClient, ProjectId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlagsClient::builder()
//!         .base_url("https://flags.example.com")
//!         .project_id(ProjectId::new(42))
//!         .build()
//!         .await?;
//!
//!     if client.is_enabled("checkout.redesign").await {
//!         // New checkout flow
//!     }
//!
//!     let all_flags = client.all().await;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod error;
mod sync;

pub use cache::FlagCache;
pub use client::{ClientConfig, FlagsClient, FlagsClientBuilder};
pub use error::{FlagsError, Result};
pub use sync::{SyncClient, SyncConfig, SyncState};

// Re-export core types for convenience
pub use beacon_flags_core::{
	Cursor, EvaluationContext, Flag, FlagId, Frame, LiteralEvaluator, ProjectId, Rule,
	RuleEvaluator, SharedRuleEvaluator,
};
