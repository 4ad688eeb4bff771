//! Navigator: follows existing choices

use crate::render::situation;
use crate::{choose, Prompt, RoleAdapter, RoleContext, RoleError};
use bard_core::Role;
use bard_plugin::Action;

const SYSTEM: &str = "You are a reader playing an interactive story. At each step you pick \
one of the numbered actions to continue the story in the direction you find most engaging.\n\
Respond with a single JSON object and nothing else:\n\
{\"choiceIndex\": <number from the list>, \"reasoning\": \"<one or two sentences>\"}";

/// Selects among the plugin's choices
#[derive(Debug, Clone, Copy, Default)]
pub struct Navigator;

impl RoleAdapter for Navigator {
    fn role(&self) -> Role {
        Role::Navigator
    }

    fn build_prompt(&self, context: &RoleContext) -> Prompt {
        let mut user = situation(context);
        user.push_str("\nWhich action do you take?");
        Prompt {
            system: SYSTEM.to_string(),
            user,
        }
    }

    fn parse_response(&self, output: &str, context: &RoleContext) -> Result<Action, RoleError> {
        choose(Role::Navigator, output, context).map(|(action, _)| action)
    }
}
