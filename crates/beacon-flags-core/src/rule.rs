// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rule expressions and their evaluation.
//!
//! A rule is an opaque expression mapped against an evaluation context to a
//! boolean. Only the literal form is built in; richer forms (targeting,
//! percentage rollout) plug in through [`RuleEvaluator`]. Anything the
//! evaluator does not recognize fails closed to `false`: a corrupted rule
//! must never enable a flag, and must never abort evaluation of its
//! siblings.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Structured form of a rule expression, parsed once per flag update rather
/// than re-parsed on every evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
	/// The literal boolean form: `"1"` is true, `"0"` and empty are false.
	Literal(bool),
	/// Any expression this version does not understand. Carried verbatim so
	/// a richer evaluator can take a second look; evaluates to false under
	/// the built-in evaluator.
	Unrecognized(String),
}

impl Rule {
	/// Parses a raw rule expression.
	pub fn parse(raw: &str) -> Self {
		match raw {
			"1" => Rule::Literal(true),
			"0" | "" => Rule::Literal(false),
			other => Rule::Unrecognized(other.to_string()),
		}
	}
}

/// Context a rule is evaluated against.
///
/// The literal form ignores it; it exists so pluggable evaluators can
/// target on caller attributes without an API change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationContext {
	pub user_id: Option<String>,
	pub attributes: HashMap<String, serde_json::Value>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}
}

/// Maps a parsed rule and a context to a boolean. Implementations must be
/// total: no panics, no errors, unrecognized input evaluates to false.
pub trait RuleEvaluator: Send + Sync {
	fn evaluate(&self, rule: &Rule, context: &EvaluationContext) -> bool;
}

/// Shared handle to a rule evaluator.
pub type SharedRuleEvaluator = Arc<dyn RuleEvaluator>;

/// The built-in evaluator for the literal boolean rule form.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralEvaluator;

impl RuleEvaluator for LiteralEvaluator {
	fn evaluate(&self, rule: &Rule, _context: &EvaluationContext) -> bool {
		match rule {
			Rule::Literal(value) => *value,
			Rule::Unrecognized(raw) => {
				warn!(rule = %raw, "unrecognized rule form, failing closed");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_literal_forms() {
		assert_eq!(Rule::parse("1"), Rule::Literal(true));
		assert_eq!(Rule::parse("0"), Rule::Literal(false));
		assert_eq!(Rule::parse(""), Rule::Literal(false));
	}

	#[test]
	fn test_parse_unrecognized_preserves_raw() {
		assert_eq!(
			Rule::parse("user_id == 42"),
			Rule::Unrecognized("user_id == 42".to_string())
		);
	}

	#[test]
	fn test_literal_evaluator() {
		let evaluator = LiteralEvaluator;
		let ctx = EvaluationContext::new();

		assert!(evaluator.evaluate(&Rule::parse("1"), &ctx));
		assert!(!evaluator.evaluate(&Rule::parse("0"), &ctx));
		assert!(!evaluator.evaluate(&Rule::parse(""), &ctx));
	}

	#[test]
	fn test_unrecognized_fails_closed() {
		let evaluator = LiteralEvaluator;
		let ctx = EvaluationContext::new();

		assert!(!evaluator.evaluate(&Rule::parse("percentage:50"), &ctx));
		assert!(!evaluator.evaluate(&Rule::parse("true"), &ctx));
		assert!(!evaluator.evaluate(&Rule::parse("garbage\u{0}bytes"), &ctx));
	}

	#[test]
	fn test_custom_evaluator_is_pluggable() {
		struct InvertingEvaluator;

		impl RuleEvaluator for InvertingEvaluator {
			fn evaluate(&self, rule: &Rule, _context: &EvaluationContext) -> bool {
				match rule {
					Rule::Literal(value) => !*value,
					Rule::Unrecognized(_) => false,
				}
			}
		}

		let evaluator: SharedRuleEvaluator = Arc::new(InvertingEvaluator);
		let ctx = EvaluationContext::new();
		assert!(!evaluator.evaluate(&Rule::parse("1"), &ctx));
		assert!(evaluator.evaluate(&Rule::parse("0"), &ctx));
	}

	#[test]
	fn test_context_builder() {
		let ctx = EvaluationContext::new()
			.with_user_id("user123")
			.with_attribute("plan", serde_json::json!("enterprise"));

		assert_eq!(ctx.user_id.as_deref(), Some("user123"));
		assert_eq!(ctx.attributes["plan"], serde_json::json!("enterprise"));
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn only_literal_one_evaluates_true(raw in "\\PC*") {
			let evaluator = LiteralEvaluator;
			let ctx = EvaluationContext::new();
			let result = evaluator.evaluate(&Rule::parse(&raw), &ctx);
			prop_assert_eq!(result, raw == "1");
		}

		#[test]
		fn parse_never_panics(raw in "\\PC*") {
			let _ = Rule::parse(&raw);
		}

		#[test]
		fn unrecognized_roundtrips_raw(raw in "[a-z%: ]{2,40}") {
			// Anything outside the literal grammar keeps its raw text.
			if raw != "1" && raw != "0" {
				match Rule::parse(&raw) {
					Rule::Unrecognized(kept) => prop_assert_eq!(kept, raw),
					Rule::Literal(_) => prop_assert!(false, "literal from non-literal input"),
				}
			}
		}
	}
}
