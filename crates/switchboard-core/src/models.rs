// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Central model catalog and reasoning-effort resolution.
//!
//! The set of valid model identifiers is closed: unknown values fall back to
//! the default model. Each model carries the subset of reasoning efforts it
//! supports and its own default effort.

use crate::types::ReasoningEffort;

/// A validated model identifier with its effort policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: &'static str,
    pub default_effort: ReasoningEffort,
    pub efforts: &'static [ReasoningEffort],
}

impl ModelSpec {
    pub fn supports(&self, effort: ReasoningEffort) -> bool {
        self.efforts.contains(&effort)
    }
}

/// Default model used when a caller supplies no model or an unknown one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// The closed catalog of valid models.
pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "claude-sonnet-4-20250514",
        default_effort: ReasoningEffort::Medium,
        efforts: &[
            ReasoningEffort::None,
            ReasoningEffort::Low,
            ReasoningEffort::Medium,
            ReasoningEffort::High,
            ReasoningEffort::Xhigh,
            ReasoningEffort::Max,
        ],
    },
    ModelSpec {
        id: "claude-opus-4-20250514",
        default_effort: ReasoningEffort::High,
        efforts: &[
            ReasoningEffort::None,
            ReasoningEffort::Low,
            ReasoningEffort::Medium,
            ReasoningEffort::High,
            ReasoningEffort::Xhigh,
            ReasoningEffort::Max,
        ],
    },
    ModelSpec {
        id: "claude-haiku-4-5-20250901",
        default_effort: ReasoningEffort::Low,
        efforts: &[
            ReasoningEffort::None,
            ReasoningEffort::Low,
            ReasoningEffort::Medium,
            ReasoningEffort::High,
        ],
    },
];

/// Look up a model by exact id.
pub fn find_model(id: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|m| m.id == id)
}

/// Resolve a caller-supplied model name against the catalog.
///
/// `None` or an unknown value falls back to [`DEFAULT_MODEL`].
pub fn resolve_model(requested: Option<&str>) -> &'static ModelSpec {
    requested
        .and_then(find_model)
        .unwrap_or_else(|| find_model(DEFAULT_MODEL).expect("default model is in the catalog"))
}

/// Resolve the effective reasoning effort for a command dispatch.
///
/// Precedence: per-message override, then session default, then the model's
/// own default. Efforts the model does not support fall through to the next
/// link in the chain.
pub fn resolve_effort(
    model: &ModelSpec,
    message_effort: Option<ReasoningEffort>,
    session_effort: Option<ReasoningEffort>,
) -> ReasoningEffort {
    message_effort
        .filter(|e| model.supports(*e))
        .or(session_effort.filter(|e| model.supports(*e)))
        .unwrap_or(model.default_effort)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(resolve_model(Some("gpt-9000")).id, DEFAULT_MODEL);
        assert_eq!(resolve_model(None).id, DEFAULT_MODEL);
        assert_eq!(
            resolve_model(Some("claude-opus-4-20250514")).id,
            "claude-opus-4-20250514"
        );
    }

    #[test]
    fn effort_precedence_message_over_session_over_model() {
        let model = find_model(DEFAULT_MODEL).unwrap();
        assert_eq!(
            resolve_effort(model, Some(ReasoningEffort::High), Some(ReasoningEffort::Max)),
            ReasoningEffort::High
        );
        assert_eq!(
            resolve_effort(model, None, Some(ReasoningEffort::Max)),
            ReasoningEffort::Max
        );
        assert_eq!(resolve_effort(model, None, None), model.default_effort);
    }

    #[test]
    fn unsupported_effort_falls_through() {
        let haiku = find_model("claude-haiku-4-5-20250901").unwrap();
        assert!(!haiku.supports(ReasoningEffort::Max));
        // Message asks for max, haiku cannot do it, session says low.
        assert_eq!(
            resolve_effort(haiku, Some(ReasoningEffort::Max), Some(ReasoningEffort::Low)),
            ReasoningEffort::Low
        );
        // Neither override supported: model default.
        assert_eq!(
            resolve_effort(haiku, Some(ReasoningEffort::Max), Some(ReasoningEffort::Xhigh)),
            haiku.default_effort
        );
    }
}
