//! Proposer: picks the next action and, on generative backends, drafts the
//! continuation. In team mode it may revise after a critique.

use crate::render::situation;
use crate::{choose, Prompt, RoleAdapter, RoleContext, RoleError};
use bard_core::Role;
use bard_plugin::action::MAX_AUTHORED_CHOICES;
use bard_plugin::{Action, AuthoredContent, AuthoredStatus};
use serde_json::Value;
use std::fmt::Write;

const SYSTEM: &str = "You are co-authoring an interactive story. At each step you choose \
one of the numbered actions and explain why.";

const CHOICE_FORMAT: &str = "Respond with a single JSON object and nothing else:\n\
{\"choiceIndex\": <number from the list>, \"reasoning\": \"<one or two sentences>\"}";

const AUTHORING_FORMAT: &str = "Also write the passage that follows your chosen action and \
the choices the reader gets next.\n\
Respond with a single JSON object and nothing else:\n\
{\"choiceIndex\": <number from the list>, \"reasoning\": \"<one or two sentences>\", \
\"passage\": \"<the next passage>\", \"choices\": [\"<choice>\", \"<choice>\"]}";

/// Drafts and revises actions
#[derive(Debug, Clone, Copy, Default)]
pub struct Proposer;

fn authored_from(object: &Value) -> Option<Option<AuthoredContent>> {
    let passage = object.get("passage");
    let choices = object.get("choices");
    if passage.is_none() && choices.is_none() {
        return None;
    }
    let content = AuthoredContent {
        passage: passage.and_then(Value::as_str).unwrap_or_default().to_string(),
        choices: choices
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
    };
    Some(content.validated())
}

impl RoleAdapter for Proposer {
    fn role(&self) -> Role {
        Role::Proposer
    }

    fn build_prompt(&self, context: &RoleContext) -> Prompt {
        let mut system = String::from(SYSTEM);
        system.push('\n');
        if context.authoring {
            let _ = write!(system, "Offer at most {MAX_AUTHORED_CHOICES} choices. ");
            system.push_str(AUTHORING_FORMAT);
        } else {
            system.push_str(CHOICE_FORMAT);
        }

        let mut user = situation(context);
        match (&context.draft, &context.critique) {
            (Some(draft), Some(critique)) => {
                let _ = write!(
                    user,
                    "\nYou previously proposed action {}: \"{}\".",
                    draft.index, draft.label
                );
                if let Some(ratings) = &critique.ratings {
                    let _ = write!(
                        user,
                        "\nYour editor rated it coherence {}/5, creativity {}/5, engagement {}/5.",
                        ratings.coherence, ratings.creativity, ratings.engagement
                    );
                }
                if !critique.feedback.is_empty() {
                    let _ = write!(user, "\nEditor feedback: {}", critique.feedback);
                }
                for suggestion in &critique.suggestions {
                    let _ = write!(user, "\n- {suggestion}");
                }
                user.push_str(
                    "\n\nThe feedback is advisory. Keep or change your proposal, then give your final answer.",
                );
            }
            _ => user.push_str("\nWhat do you propose?"),
        }
        Prompt { system, user }
    }

    fn parse_response(&self, output: &str, context: &RoleContext) -> Result<Action, RoleError> {
        let (mut action, parsed) = choose(Role::Proposer, output, context)?;
        if let Some(authored) = parsed.object.as_ref().and_then(authored_from) {
            action.metadata.authored = Some(if authored.is_some() {
                AuthoredStatus::Accepted
            } else {
                AuthoredStatus::Rejected
            });
            action.authored = authored;
        }
        Ok(action)
    }
}
