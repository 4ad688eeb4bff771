use crate::RoleContext;
use std::fmt::Write;

/// Shared situation block: progress, recent history, scene and numbered actions
pub(crate) fn situation(context: &RoleContext) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Progress: action {} of {}",
        context.action_number, context.max_actions
    );
    out.push_str("\nRecent history:\n");
    if context.history.is_empty() {
        out.push_str("(none)\n");
    }
    for entry in &context.history {
        let _ = writeln!(out, "- [{}] chose \"{}\"", entry.scene_id, entry.choice);
    }
    let _ = write!(out, "\nCurrent scene:\n{}\n", context.scene_text.trim());
    out.push_str("\nAvailable actions:\n");
    for action in &context.actions {
        let _ = writeln!(out, "{}. {}", action.index, action.label);
    }
    out
}
