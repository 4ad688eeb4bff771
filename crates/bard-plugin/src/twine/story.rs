//! Twine story model and link syntax

use crate::error::PluginError;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[(.+?)\]\]").expect("link pattern"));

/// Tag marking a passage as an ending
pub const END_TAG: &str = "end";

/// Link from one passage to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Text shown to the reader
    pub label: String,
    /// Destination passage name
    pub target: String,
}

impl Link {
    /// Parse the inside of a `[[...]]` link.
    ///
    /// Supports `label->target`, `target<-label`, `label|target` and `target`.
    #[must_use]
    pub fn parse(inner: &str) -> Self {
        let inner = inner.trim();
        let (label, target) = if let Some((label, target)) = inner.rsplit_once("->") {
            (label, target)
        } else if let Some((target, label)) = inner.split_once("<-") {
            (label, target)
        } else if let Some((label, target)) = inner.split_once('|') {
            (label, target)
        } else {
            (inner, inner)
        };
        Self {
            label: label.trim().to_string(),
            target: target.trim().to_string(),
        }
    }
}

/// Extract inline links and return the prose with link markup replaced by labels
#[must_use]
pub fn extract_links(text: &str) -> (String, Vec<Link>) {
    let mut links = Vec::new();
    let prose = LINK.replace_all(text, |caps: &regex::Captures<'_>| {
        let link = Link::parse(&caps[1]);
        let label = link.label.clone();
        links.push(link);
        label
    });
    (prose.trim().to_string(), links)
}

/// One passage of a story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    /// Unique name
    pub name: String,
    /// Prose with link markup resolved
    pub text: String,
    /// Tags
    pub tags: Vec<String>,
    /// Outgoing links, in order
    pub links: Vec<Link>,
}

impl Passage {
    /// Tagged `end`, or no way forward
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.links.is_empty() || self.tags.iter().any(|t| t.eq_ignore_ascii_case(END_TAG))
    }
}

#[derive(Deserialize)]
struct StoryFile {
    id: String,
    #[serde(default)]
    title: String,
    start: String,
    passages: Vec<PassageFile>,
}

#[derive(Deserialize)]
struct PassageFile {
    name: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    links: Vec<Link>,
}

/// Problems that make a story unplayable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryIssue {
    /// Start passage does not exist
    MissingStart(String),
    /// Two passages share a name
    DuplicatePassage(String),
    /// A link points nowhere
    DanglingLink {
        /// Passage holding the link
        passage: String,
        /// Missing destination
        target: String,
    },
}

impl fmt::Display for StoryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStart(name) => write!(f, "start passage '{name}' does not exist"),
            Self::DuplicatePassage(name) => write!(f, "passage '{name}' is defined twice"),
            Self::DanglingLink { passage, target } => {
                write!(f, "passage '{passage}' links to missing '{target}'")
            }
        }
    }
}

/// A static hypertext story
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Story {
    /// Story id (template id)
    pub id: String,
    /// Display title
    pub title: String,
    /// Name of the first passage
    pub start: String,
    /// Passages by name, in file order
    pub passages: IndexMap<String, Passage>,
    duplicates: Vec<String>,
}

impl Story {
    /// Parse the JSON story format.
    ///
    /// Explicit `links` and inline `[[...]]` links are merged, explicit first.
    ///
    /// # Errors
    /// `PluginError::Initialization` if the JSON does not match the format.
    pub fn from_json(text: &str) -> Result<Self, PluginError> {
        let file: StoryFile = serde_json::from_str(text)
            .map_err(|e| PluginError::Initialization(format!("invalid story file: {e}")))?;
        let mut passages = IndexMap::with_capacity(file.passages.len());
        let mut duplicates = Vec::new();
        for raw in file.passages {
            let (text, inline) = extract_links(&raw.text);
            let mut links = raw.links;
            links.extend(inline);
            let passage = Passage {
                name: raw.name.clone(),
                text,
                tags: raw.tags,
                links,
            };
            if passages.insert(raw.name.clone(), passage).is_some() {
                duplicates.push(raw.name);
            }
        }
        Ok(Self {
            id: file.id,
            title: file.title,
            start: file.start,
            passages,
            duplicates,
        })
    }

    /// Look up a passage
    #[must_use]
    pub fn passage(&self, name: &str) -> Option<&Passage> {
        self.passages.get(name)
    }

    /// Every structural problem, empty when the story is playable
    #[must_use]
    pub fn validate(&self) -> Vec<StoryIssue> {
        let mut issues: Vec<StoryIssue> = self
            .duplicates
            .iter()
            .cloned()
            .map(StoryIssue::DuplicatePassage)
            .collect();
        if !self.passages.contains_key(&self.start) {
            issues.push(StoryIssue::MissingStart(self.start.clone()));
        }
        for passage in self.passages.values() {
            for link in &passage.links {
                if !self.passages.contains_key(&link.target) {
                    issues.push(StoryIssue::DanglingLink {
                        passage: passage.name.clone(),
                        target: link.target.clone(),
                    });
                }
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn link_forms() {
        assert_eq!(
            Link::parse("Open the door->Hall"),
            Link { label: "Open the door".into(), target: "Hall".into() }
        );
        assert_eq!(
            Link::parse("Hall<-Open the door"),
            Link { label: "Open the door".into(), target: "Hall".into() }
        );
        assert_eq!(
            Link::parse("Open the door|Hall"),
            Link { label: "Open the door".into(), target: "Hall".into() }
        );
        assert_eq!(Link::parse("Hall"), Link { label: "Hall".into(), target: "Hall".into() });
    }

    #[test]
    fn inline_links_are_extracted_in_order() {
        let (prose, links) =
            extract_links("The jade dragon stares. [[Bow->Bow]] or [[Run away|Flee]]?");
        assert_eq!(prose, "The jade dragon stares. Bow or Run away?");
        assert_eq!(links.len(), 2);
        assert_eq!(links[1].target, "Flee");
    }

    #[test]
    fn validation_reports_dangling_links_and_missing_start() {
        let story = Story::from_json(
            r#"{"id":"s","start":"Nowhere","passages":[
                {"name":"A","text":"[[B]]"},
                {"name":"A","text":"dup"}
            ]}"#,
        )
        .unwrap();
        let issues = story.validate();
        assert!(issues.contains(&StoryIssue::DuplicatePassage("A".into())));
        assert!(issues.contains(&StoryIssue::MissingStart("Nowhere".into())));
        assert!(issues.iter().any(|i| matches!(i, StoryIssue::DanglingLink { target, .. } if target == "B")));
    }

    #[test]
    fn end_tag_overrides_links() {
        let passage = Passage {
            name: "Epilogue".into(),
            text: String::new(),
            tags: vec!["END".into()],
            links: vec![Link::parse("Again->Start")],
        };
        assert!(passage.is_terminal());
    }
}
