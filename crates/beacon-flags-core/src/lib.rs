// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Beacon feature flags system.
//!
//! This crate provides the shared types for flags, delta frames, cursors,
//! and rule evaluation. It is used by both the server-side delta stream
//! (`beacon-server-flags`) and the client SDK (`beacon-flags`).
//!
//! # Overview
//!
//! The sync mechanism distributes boolean flag state as an ordered,
//! resumable delta stream:
//!
//! - A [`Flag`] row's `updated_at` strictly increases on every mutation, so
//!   `(updated_at, id)` totally orders a project's history.
//! - A [`Cursor`] is the inclusive low-water mark a consumer has
//!   incorporated; resuming with cursor `c` yields exactly the flags with
//!   `updated_at > c`.
//! - A [`Frame`] is one unit of delivery: the ordered changed set plus the
//!   new cursor.
//! - A [`RuleEvaluator`] maps a flag's [`Rule`] to a boolean, failing
//!   closed on anything unrecognized.
//!
//! # Example
//!
//! ```
//! use beacon_flags_core::{EvaluationContext, LiteralEvaluator, Rule, RuleEvaluator};
//!
//! let evaluator = LiteralEvaluator;
//! let ctx = EvaluationContext::new().with_user_id("user123");
//!
//! assert!(evaluator.evaluate(&Rule::parse("1"), &ctx));
//! assert!(!evaluator.evaluate(&Rule::parse("0"), &ctx));
//! // Unknown rule forms never enable a flag.
//! assert!(!evaluator.evaluate(&Rule::parse("percentage:50"), &ctx));
//! ```

pub mod error;
pub mod flag;
pub mod frame;
pub mod rule;

pub use error::{FlagsError, Result};
pub use flag::{Flag, FlagId, ProjectId};
pub use frame::{Cursor, Frame};
pub use rule::{
	EvaluationContext, LiteralEvaluator, Rule, RuleEvaluator, SharedRuleEvaluator,
};
