use crate::layer::LayerId;
use std::collections::HashSet;

/// Hands out layer ids that are unique within one board instance.
///
/// Ids restored from persisted state are reserved so a fresh id never
/// collides with one the host already knows about.
pub struct IdGenerator {
    prefix: String,
    next_id: u32,
    used: HashSet<LayerId>,
}

impl IdGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next_id: 1,
            used: HashSet::new(),
        }
    }

    pub fn reserve(&mut self, id: &LayerId) {
        self.used.insert(id.clone());
    }

    pub fn generate_id(&mut self) -> LayerId {
        loop {
            let id = LayerId::new(format!("{}_{}", self.prefix, self.next_id));
            self.next_id += 1;
            if self.used.insert(id.clone()) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::id_generator::IdGenerator;
    use crate::layer::LayerId;

    #[test]
    fn test_skips_reserved_ids() {
        let mut generator = IdGenerator::new("layer");
        generator.reserve(&LayerId::new("layer_1"));
        assert_eq!(LayerId::new("layer_2"), generator.generate_id());
        assert_eq!(LayerId::new("layer_3"), generator.generate_id());
    }
}
