use crate::loader::RasterHandle;
use std::collections::HashMap;

pub type InstanceId = u64;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub handle: RasterHandle,
    pub url: String,
}

/// Decoded images of every board, partitioned by instance.
///
/// Owned by the application and handed to each node; only the loader writes
/// to it.
pub struct ImageCache {
    next_instance_id: InstanceId,
    entries: HashMap<InstanceId, HashMap<String, CacheEntry>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self {
            next_instance_id: 1,
            entries: HashMap::new(),
        }
    }

    pub fn register_instance(&mut self) -> InstanceId {
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        self.entries.insert(id, HashMap::new());
        id
    }

    pub fn get(&self, instance: InstanceId, path: &str) -> Option<&CacheEntry> {
        self.entries.get(&instance)?.get(path)
    }

    pub fn insert(&mut self, instance: InstanceId, path: &str, entry: CacheEntry) {
        self.entries
            .entry(instance)
            .or_default()
            .insert(path.to_string(), entry);
    }

    pub fn invalidate(&mut self, instance: InstanceId, path: &str) -> bool {
        match self.entries.get_mut(&instance) {
            Some(map) => map.remove(path).is_some(),
            None => false,
        }
    }

    pub fn release_instance(&mut self, instance: InstanceId) {
        self.entries.remove(&instance);
    }

    pub fn len(&self, instance: InstanceId) -> usize {
        self.entries.get(&instance).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::{CacheEntry, ImageCache};
    use crate::loader::RasterHandle;
    use image::DynamicImage;

    fn entry() -> CacheEntry {
        CacheEntry {
            handle: RasterHandle::new(DynamicImage::new_luma8(2, 2)),
            url: "/view?filename=a.png".to_string(),
        }
    }

    #[test]
    fn test_instances_are_isolated() {
        let mut cache = ImageCache::new();
        let first = cache.register_instance();
        let second = cache.register_instance();
        cache.insert(first, "a.png", entry());
        assert!(cache.get(first, "a.png").is_some());
        assert!(cache.get(second, "a.png").is_none());

        assert!(cache.invalidate(first, "a.png"));
        assert!(!cache.invalidate(first, "a.png"));

        cache.insert(second, "a.png", entry());
        cache.release_instance(second);
        assert_eq!(0, cache.len(second));
    }
}
