//! Destinations for decoded images.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Per-renderer material property overrides, shared with the host.
#[derive(Debug)]
pub struct PropertyBlock<I> {
    properties: Arc<Mutex<HashMap<String, I>>>,
}

impl<I> Clone for PropertyBlock<I> {
    fn clone(&self) -> Self {
        Self {
            properties: Arc::clone(&self.properties),
        }
    }
}

impl<I> Default for PropertyBlock<I> {
    fn default() -> Self {
        Self {
            properties: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<I: Clone> PropertyBlock<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_texture(&self, name: &str, image: I) {
        self.properties.lock().insert(name.to_string(), image);
    }

    pub fn texture(&self, name: &str) -> Option<I> {
        self.properties.lock().get(name).cloned()
    }

    pub fn clear(&self, name: &str) {
        self.properties.lock().remove(name);
    }
}

/// Overrides one texture property of a renderer's material.
#[derive(Debug, Clone)]
pub struct MaterialBinding<I> {
    pub block: PropertyBlock<I>,
    pub property: String,
}

impl<I: Clone> MaterialBinding<I> {
    pub fn new(block: PropertyBlock<I>, property: impl Into<String>) -> Self {
        Self {
            block,
            property: property.into(),
        }
    }

    pub fn apply(&self, image: &I) {
        self.block.set_texture(&self.property, image.clone());
    }
}
