//! A trivial alias -> layer registry, the collaborator consumer
//! frameworks use to look a configured layer up by name.

use std::sync::Arc;

use dashmap::DashMap;

use crate::layer::ChannelLayer;

/// Concurrent alias-to-layer map. Safe to share across tasks via `Arc`.
#[derive(Default)]
pub struct ChannelLayerRegistry {
    layers: DashMap<String, Arc<dyn ChannelLayer>>,
}

impl ChannelLayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, alias: impl Into<String>, layer: Arc<dyn ChannelLayer>) {
        self.layers.insert(alias.into(), layer);
    }

    pub fn get(&self, alias: &str) -> Option<Arc<dyn ChannelLayer>> {
        self.layers.get(alias).map(|entry| entry.value().clone())
    }

    pub fn has_any(&self) -> bool {
        !self.layers.is_empty()
    }

    pub fn unregister(&self, alias: &str) -> Option<Arc<dyn ChannelLayer>> {
        self.layers.remove(alias).map(|(_, layer)| layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLayer;
    use crate::config::InMemoryConfig;

    #[test]
    fn register_get_unregister_roundtrip() {
        let registry = ChannelLayerRegistry::new();
        assert!(!registry.has_any());

        let layer: Arc<dyn ChannelLayer> = Arc::new(InMemoryLayer::new(InMemoryConfig::default()));
        registry.register("default", layer);
        assert!(registry.has_any());
        assert!(registry.get("default").is_some());
        assert!(registry.get("missing").is_none());

        assert!(registry.unregister("default").is_some());
        assert!(!registry.has_any());
    }
}
