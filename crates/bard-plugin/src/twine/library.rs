//! Story library backed by a moka cache
//!
//! Stories are looked up by id. Misses are loaded from `<dir>/<id>.json` when
//! the library has a directory; loaded stories must validate cleanly.

use super::story::Story;
use crate::error::PluginError;
use moka::future::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared, cloneable story library
#[derive(Debug, Clone)]
pub struct StoryLibrary {
    cache: Cache<String, Arc<Story>>,
    directory: Option<PathBuf>,
}

impl Default for StoryLibrary {
    /// Library without a directory, capacity 256 stories
    fn default() -> Self {
        Self::new(256)
    }
}

impl StoryLibrary {
    /// In-memory library with a capacity bound
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::new(max_capacity),
            directory: None,
        }
    }

    /// Load misses from a directory of `<id>.json` files
    #[inline]
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Add a story after validating it
    ///
    /// # Errors
    /// `PluginError::Initialization` listing every structural issue.
    pub async fn insert(&self, story: Story) -> Result<(), PluginError> {
        ensure_playable(&story)?;
        self.cache.insert(story.id.clone(), Arc::new(story)).await;
        Ok(())
    }

    /// Fetch a story, loading it from disk on a miss
    ///
    /// # Errors
    /// `PluginError::Initialization` for unknown ids or unplayable files.
    pub async fn get(&self, id: &str) -> Result<Arc<Story>, PluginError> {
        if let Some(story) = self.cache.get(id).await {
            return Ok(story);
        }
        let Some(directory) = &self.directory else {
            return Err(PluginError::Initialization(format!("unknown story '{id}'")));
        };
        if id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(PluginError::Initialization(format!("invalid story id '{id}'")));
        }
        let story = load_file(&directory.join(format!("{id}.json"))).await?;
        if story.id != id {
            return Err(PluginError::Initialization(format!(
                "story file for '{id}' declares id '{}'",
                story.id
            )));
        }
        let story = Arc::new(story);
        self.cache.insert(id.to_string(), Arc::clone(&story)).await;
        tracing::debug!(story_id = id, "story loaded");
        Ok(story)
    }

    /// Eagerly load every `*.json` file in the directory
    ///
    /// # Errors
    /// `PluginError::Initialization` on the first unreadable or unplayable file.
    pub async fn preload(&self) -> Result<usize, PluginError> {
        let Some(directory) = &self.directory else {
            return Ok(0);
        };
        let mut entries = tokio::fs::read_dir(directory)
            .await
            .map_err(|e| PluginError::Initialization(format!("{}: {e}", directory.display())))?;
        let mut loaded = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginError::Initialization(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let story = load_file(&path).await?;
            self.cache.insert(story.id.clone(), Arc::new(story)).await;
            loaded += 1;
        }
        tracing::info!(directory = %directory.display(), loaded, "story library preloaded");
        Ok(loaded)
    }

    /// Approximate number of cached stories
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// Read, parse and validate one story file
///
/// # Errors
/// `PluginError::Initialization` if the file is unreadable, malformed or unplayable.
pub async fn load_file(path: &Path) -> Result<Story, PluginError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PluginError::Initialization(format!("{}: {e}", path.display())))?;
    let story = Story::from_json(&text)?;
    ensure_playable(&story)?;
    Ok(story)
}

fn ensure_playable(story: &Story) -> Result<(), PluginError> {
    let issues = story.validate();
    if issues.is_empty() {
        return Ok(());
    }
    let detail: Vec<String> = issues.iter().map(ToString::to_string).collect();
    Err(PluginError::Initialization(format!(
        "story '{}' is unplayable: {}",
        story.id,
        detail.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORY: &str = r#"{"id":"jade_dragon_mystery","start":"Gate","passages":[
        {"name":"Gate","text":"A jade dragon guards the gate. [[Knock->Hall]] [[Leave]]"},
        {"name":"Hall","text":"Silence.","tags":["end"]},
        {"name":"Leave","text":"You walk away."}
    ]}"#;

    #[tokio::test]
    async fn loads_from_directory_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jade_dragon_mystery.json"), STORY).unwrap();
        let library = StoryLibrary::new(8).with_directory(dir.path());

        let story = library.get("jade_dragon_mystery").await.unwrap();
        assert_eq!(story.passages.len(), 3);

        std::fs::remove_file(dir.path().join("jade_dragon_mystery.json")).unwrap();
        assert!(library.get("jade_dragon_mystery").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_and_traversal_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let library = StoryLibrary::new(8).with_directory(dir.path());
        assert!(library.get("missing").await.is_err());
        assert!(library.get("../etc/passwd").await.is_err());
        assert!(StoryLibrary::default().get("anything").await.is_err());
    }

    #[tokio::test]
    async fn unplayable_story_is_refused() {
        let story = Story::from_json(r#"{"id":"broken","start":"A","passages":[{"name":"A","text":"[[Z]]"}]}"#)
            .unwrap();
        let error = StoryLibrary::default().insert(story).await.unwrap_err();
        assert!(error.to_string().contains("links to missing 'Z'"));
    }

    #[tokio::test]
    async fn preload_reads_every_json_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), STORY).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let library = StoryLibrary::new(8).with_directory(dir.path());
        assert_eq!(library.preload().await.unwrap(), 1);
        assert!(library.get("jade_dragon_mystery").await.is_ok());
    }
}
