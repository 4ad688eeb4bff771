//! Twine-style hypertext backend

pub mod library;
mod plugin;
pub mod story;

pub use library::StoryLibrary;
pub use plugin::{TwinePlugin, STORY_ID_OPTION};
pub use story::{Link, Passage, Story, StoryIssue};
