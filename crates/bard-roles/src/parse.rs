//! Total parsing of model replies into choice indices
//!
//! Strategies run in order; an index outside `[0, n)` counts as a failure
//! and falls through:
//! 1. structured: an embedded JSON object with `choiceIndex` (and optional `reasoning`)
//! 2. integer scan: the first standalone integer in the text
//! 3. default: index 0

use bard_core::Role;
use bard_plugin::ParseProvenance;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9]+\b").expect("integer pattern"));

/// Field carrying the chosen index in structured replies
pub const CHOICE_FIELD: &str = "choiceIndex";
/// Field carrying free-text reasoning in structured replies
pub const REASONING_FIELD: &str = "reasoning";

/// Result of [`parse_choice`]
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChoice {
    /// In-range index
    pub index: usize,
    /// Strategy that produced it
    pub provenance: ParseProvenance,
    /// Reasoning from the structured object, if any
    pub reasoning: Option<String>,
    /// The embedded object, if one was found
    pub object: Option<Value>,
}

/// Locate an embedded JSON object.
///
/// Tries a fenced ```` ```json ```` block first, then every `{` in order with a
/// balanced-brace scan that respects string literals.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<Value> {
    if let Some(block) = fenced_block(text) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(block) {
            return Some(value);
        }
    }
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| balanced_end(&text[start..]).map(|len| &text[start..start + len]))
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        })
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```json").map(|i| i + 7).or_else(|| text.find("```").map(|i| i + 3))?;
    let end = text[start..].find("```")?;
    let block = text[start..start + end].trim();
    (!block.is_empty()).then_some(block)
}

/// Byte length of the balanced `{...}` prefix of `text`
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// First standalone integer in `text`. A leading minus makes it negative,
/// which no index can be, so it yields `None`.
#[must_use]
pub fn first_standalone_integer(text: &str) -> Option<usize> {
    let found = INTEGER.find(text)?;
    if text[..found.start()].ends_with('-') {
        return None;
    }
    found.as_str().parse().ok()
}

fn structured_index(object: &Value) -> Option<usize> {
    match object.get(CHOICE_FIELD)? {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve a reply into an index in `[0, available)`. Never fails for
/// `available > 0`; with no actions the default index 0 is returned and the
/// caller must not use it.
#[must_use]
pub fn parse_choice(output: &str, available: usize) -> ParsedChoice {
    let object = extract_json_object(output);
    let reasoning = object
        .as_ref()
        .and_then(|o| o.get(REASONING_FIELD))
        .and_then(Value::as_str)
        .map(str::to_string);
    let in_range = |i: &usize| *i < available;

    let structured = object.as_ref().and_then(structured_index).filter(in_range);
    let (index, provenance) = if let Some(index) = structured {
        (index, ParseProvenance::Structured)
    } else if let Some(index) = first_standalone_integer(output).filter(in_range) {
        (index, ParseProvenance::IntegerScan)
    } else {
        (0, ParseProvenance::Default)
    };
    ParsedChoice {
        index,
        provenance,
        reasoning,
        object,
    }
}

/// Count which strategy fired, per role
pub(crate) fn record_provenance(role: Role, provenance: ParseProvenance) {
    metrics::counter!(
        "bard_parse_strategy_total",
        "role" => role.as_str(),
        "strategy" => provenance.as_str()
    )
    .increment(1);
    if provenance != ParseProvenance::Structured {
        tracing::debug!(
            role = role.as_str(),
            strategy = provenance.as_str(),
            "structured parse fell through"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn structured_reply_selects_index() {
        let parsed = parse_choice(r#"{"choiceIndex": 1, "reasoning": "test"}"#, 3);
        assert_eq!(parsed.index, 1);
        assert_eq!(parsed.provenance, ParseProvenance::Structured);
        assert_eq!(parsed.reasoning.as_deref(), Some("test"));
    }

    #[test]
    fn integer_scan_when_no_object() {
        let parsed = parse_choice("I think option 2 is best", 3);
        assert_eq!(parsed.index, 2);
        assert_eq!(parsed.provenance, ParseProvenance::IntegerScan);
    }

    #[test]
    fn default_when_nothing_usable() {
        let parsed = parse_choice("no numbers here", 3);
        assert_eq!(parsed.index, 0);
        assert_eq!(parsed.provenance, ParseProvenance::Default);
    }

    #[test]
    fn out_of_range_structured_index_falls_through() {
        let parsed = parse_choice(r#"Option 1: {"choiceIndex": 7}"#, 3);
        assert_eq!((parsed.index, parsed.provenance), (1, ParseProvenance::IntegerScan));

        let parsed = parse_choice(r#"{"choiceIndex": 7}"#, 3);
        assert_eq!((parsed.index, parsed.provenance), (0, ParseProvenance::Default));
    }

    #[test]
    fn fenced_block_and_prose_wrapped_objects() {
        let fenced = "Sure!\n```json\n{\"choiceIndex\": 2, \"reasoning\": \"brace } in string\"}\n```";
        assert_eq!(parse_choice(fenced, 3).index, 2);

        let wrapped = "My answer: {\"reasoning\": \"go {left}\", \"choiceIndex\": \"1\"} done";
        let parsed = parse_choice(wrapped, 3);
        assert_eq!((parsed.index, parsed.provenance), (1, ParseProvenance::Structured));
    }

    #[test]
    fn negative_and_huge_integers_are_rejected() {
        assert_eq!(first_standalone_integer("choose -1"), None);
        assert_eq!(first_standalone_integer("99999999999999999999999 apples"), None);
        assert_eq!(first_standalone_integer("pick 12."), Some(12));
        assert_eq!(first_standalone_integer("abc12def"), None);
    }

    proptest! {
        #[test]
        fn parsing_is_total(output in ".*", available in 1usize..12) {
            let parsed = parse_choice(&output, available);
            prop_assert!(parsed.index < available);
        }

        #[test]
        fn in_range_structured_index_always_wins(index in 0usize..6, noise in "[a-z ]{0,20}") {
            let output = format!("{noise} {{\"choiceIndex\": {index}}} 5");
            let parsed = parse_choice(&output, 6);
            prop_assert_eq!(parsed.index, index);
            prop_assert_eq!(parsed.provenance, ParseProvenance::Structured);
        }
    }
}
