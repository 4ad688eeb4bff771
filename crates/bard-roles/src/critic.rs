//! Critic: reviews a proposer draft
//!
//! A critique is advisory input to the proposer, never an action.

use crate::parse::{extract_json_object, record_provenance};
use crate::render::situation;
use crate::{Prompt, RoleContext, RoleError};
use bard_core::Role;
use bard_plugin::ParseProvenance;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;

const SYSTEM: &str = "You are an editor reviewing a co-author's next move in an interactive \
story. Rate the draft from 1 (poor) to 5 (excellent) on coherence, creativity and engagement, \
then give brief feedback and concrete suggestions. You do not choose the action yourself.\n\
Respond with a single JSON object and nothing else:\n\
{\"ratings\": {\"coherence\": n, \"creativity\": n, \"engagement\": n}, \
\"feedback\": \"<short paragraph>\", \"suggestions\": [\"<suggestion>\"]}";

/// Lowest accepted rating
pub const MIN_RATING: u8 = 1;
/// Highest accepted rating
pub const MAX_RATING: u8 = 5;

/// Ratings on fixed dimensions, each within `MIN_RATING..=MAX_RATING`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
    /// Fits the story so far
    pub coherence: u8,
    /// Fresh and surprising
    pub creativity: u8,
    /// Makes the reader want to continue
    pub engagement: u8,
}

/// Structured critic feedback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    /// Ratings, absent when the critic gave none
    pub ratings: Option<Ratings>,
    /// Free-text feedback
    pub feedback: String,
    /// Concrete suggestions
    pub suggestions: Vec<String>,
}

impl Critique {
    /// Placeholder used when the critic failed
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// No ratings, feedback or suggestions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ratings.is_none() && self.feedback.is_empty() && self.suggestions.is_empty()
    }
}

fn rating(ratings: &Value, key: &str) -> Option<u8> {
    let raw = ratings.get(key)?;
    let value = raw
        .as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))?;
    if !value.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamped = value.round().clamp(f64::from(MIN_RATING), f64::from(MAX_RATING)) as u8;
    Some(clamped)
}

/// Reviews proposer drafts
#[derive(Debug, Clone, Copy, Default)]
pub struct Critic;

impl Critic {
    /// Prompt presenting the situation and the draft under review
    #[must_use]
    pub fn build_prompt(&self, context: &RoleContext) -> Prompt {
        let mut user = situation(context);
        match &context.draft {
            Some(draft) => {
                let _ = write!(
                    user,
                    "\nYour co-author proposes action {}: \"{}\"",
                    draft.index, draft.label
                );
                if let Some(reasoning) = &draft.metadata.reasoning {
                    let _ = write!(user, "\nTheir reasoning: {reasoning}");
                }
                if let Some(authored) = &draft.authored {
                    let _ = write!(user, "\nTheir drafted continuation:\n{}", authored.passage);
                    for choice in &authored.choices {
                        let _ = write!(user, "\n- {choice}");
                    }
                }
            }
            None => user.push_str("\nYour co-author has not proposed an action."),
        }
        user.push_str("\n\nReview the proposal.");
        Prompt {
            system: SYSTEM.to_string(),
            user,
        }
    }

    /// Parse a critique. Ratings are clamped to `1..=5`.
    ///
    /// # Errors
    /// `RoleError::MalformedCritique` when the reply has no JSON object or the
    /// object carries none of ratings, feedback and suggestions.
    pub fn parse_critique(&self, output: &str) -> Result<Critique, RoleError> {
        let Some(object) = extract_json_object(output) else {
            record_provenance(Role::Critic, ParseProvenance::Default);
            return Err(RoleError::MalformedCritique("no JSON object in reply".into()));
        };
        let ratings = object.get("ratings").and_then(|r| {
            Some(Ratings {
                coherence: rating(r, "coherence")?,
                creativity: rating(r, "creativity")?,
                engagement: rating(r, "engagement")?,
            })
        });
        let feedback = object
            .get("feedback")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let suggestions = object
            .get("suggestions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let critique = Critique {
            ratings,
            feedback,
            suggestions,
        };
        if critique.is_empty() {
            record_provenance(Role::Critic, ParseProvenance::Default);
            return Err(RoleError::MalformedCritique(
                "object has no ratings, feedback or suggestions".into(),
            ));
        }
        record_provenance(Role::Critic, ParseProvenance::Structured);
        Ok(critique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::context;
    use bard_plugin::Action;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_and_clamps_ratings() {
        let critique = Critic
            .parse_critique(
                r#"Here you go: {"ratings": {"coherence": 7, "creativity": "3", "engagement": 0.4},
                   "feedback": " Solid. ", "suggestions": ["Add tension", ""]}"#,
            )
            .unwrap();
        assert_eq!(
            critique.ratings,
            Some(Ratings { coherence: 5, creativity: 3, engagement: 1 })
        );
        assert_eq!(critique.feedback, "Solid.");
        assert_eq!(critique.suggestions, vec!["Add tension".to_string()]);
    }

    #[test]
    fn partial_ratings_are_dropped_but_feedback_kept() {
        let critique = Critic
            .parse_critique(r#"{"ratings": {"coherence": 4}, "feedback": "Too abrupt"}"#)
            .unwrap();
        assert!(critique.ratings.is_none());
        assert_eq!(critique.feedback, "Too abrupt");
    }

    #[test]
    fn malformed_critiques_are_errors() {
        assert!(matches!(
            Critic.parse_critique("looks good to me"),
            Err(RoleError::MalformedCritique(_))
        ));
        assert!(Critic.parse_critique(r#"{"verdict": "fine"}"#).is_err());
        assert!(Critique::empty().is_empty());
    }

    #[test]
    fn prompt_presents_the_draft() {
        let mut draft = Action::choice(1, "Leave");
        draft.metadata.reasoning = Some("safer".into());
        let ctx = context(&["Knock", "Leave"]).with_draft(draft);
        let prompt = Critic.build_prompt(&ctx);
        assert!(prompt.user.contains("proposes action 1: \"Leave\""));
        assert!(prompt.user.contains("Their reasoning: safer"));
    }
}
