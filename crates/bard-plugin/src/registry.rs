//! Plugin registry keyed by backend identifier

use crate::dynamic::{DynamicStoryPlugin, StoryService};
use crate::error::PluginError;
use crate::twine::{StoryLibrary, TwinePlugin};
use crate::StoryPlugin;
use bard_core::{PluginKind, TaskConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh plugin instance for one execution job
pub trait PluginFactory: Send + Sync {
    /// Create an uninitialized plugin
    fn create(&self, task: &TaskConfig) -> Result<Box<dyn StoryPlugin>, PluginError>;
}

impl<F> PluginFactory for F
where
    F: Fn(&TaskConfig) -> Result<Box<dyn StoryPlugin>, PluginError> + Send + Sync,
{
    fn create(&self, task: &TaskConfig) -> Result<Box<dyn StoryPlugin>, PluginError> {
        self(task)
    }
}

/// Maps each [`PluginKind`] to a factory
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<PluginKind, Arc<dyn PluginFactory>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl PluginRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with both reference backends
    #[must_use]
    pub fn with_defaults(library: StoryLibrary, service: Arc<dyn StoryService>) -> Self {
        let mut registry = Self::new();
        registry.register(
            PluginKind::Twine,
            move |_: &TaskConfig| -> Result<Box<dyn StoryPlugin>, PluginError> {
                Ok(Box::new(TwinePlugin::new(library.clone())))
            },
        );
        registry.register(
            PluginKind::DynamicStory,
            move |_: &TaskConfig| -> Result<Box<dyn StoryPlugin>, PluginError> {
                Ok(Box::new(DynamicStoryPlugin::new(Arc::clone(&service))))
            },
        );
        registry
    }

    /// Register or replace the factory for a kind
    pub fn register(&mut self, kind: PluginKind, factory: impl PluginFactory + 'static) {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Create a plugin for the task's backend
    ///
    /// # Errors
    /// `PluginError::Unsupported` if no factory is registered for the kind.
    pub fn create(&self, task: &TaskConfig) -> Result<Box<dyn StoryPlugin>, PluginError> {
        let factory = self
            .factories
            .get(&task.plugin_type)
            .ok_or_else(|| {
                PluginError::Unsupported(format!("no plugin registered for {}", task.plugin_type))
            })?;
        factory.create(task)
    }

    /// Registered kinds, in a stable order
    #[must_use]
    pub fn kinds(&self) -> Vec<PluginKind> {
        let mut kinds: Vec<PluginKind> = self.factories.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::tests::FakeService;

    #[test]
    fn defaults_cover_both_backends() {
        let registry =
            PluginRegistry::with_defaults(StoryLibrary::default(), Arc::new(FakeService::new(3)));
        assert_eq!(registry.kinds(), vec![PluginKind::DynamicStory, PluginKind::Twine]);

        let plugin = registry
            .create(&TaskConfig::new(PluginKind::Twine, 5, 1_000))
            .unwrap();
        assert_eq!(plugin.kind(), PluginKind::Twine);
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let registry = PluginRegistry::new();
        let result = registry.create(&TaskConfig::new(PluginKind::DynamicStory, 5, 1_000));
        assert!(matches!(result, Err(PluginError::Unsupported(_))));
    }
}
