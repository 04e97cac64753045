//! Target registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::engine::DEFAULT_RING_CAPACITY;
use crate::target::model::{Target, TargetId};

/// Ordered, lock-guarded collection of targets.
///
/// Owned explicitly (usually behind an `Arc`) and passed to whichever
/// component needs it. Targets are fully built before they are inserted, so
/// a concurrent [`list_targets`](Self::list_targets) never observes a
/// partially constructed one.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: RwLock<Vec<Arc<Target>>>,
    next_id: AtomicU64,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a target with a fresh ring.
    ///
    /// A `ring_capacity` of 0 selects [`DEFAULT_RING_CAPACITY`].
    pub fn add_target(
        &self,
        name: impl Into<String>,
        addr: impl Into<String>,
        ring_capacity: usize,
    ) -> Arc<Target> {
        let capacity = if ring_capacity == 0 {
            DEFAULT_RING_CAPACITY
        } else {
            ring_capacity
        };
        let id = TargetId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (name, addr) = (name.into(), addr.into());

        let mut targets = self.targets.write();
        let target = Arc::new(Target::new(id, name, addr, targets.len(), capacity));
        targets.push(Arc::clone(&target));

        tracing::debug!(id = %id, target_name = %target.name(), addr = %target.addr(), "Target added");
        target
    }

    /// Remove the target at `position`. Returns `false` if out of range.
    pub fn remove_target_at(&self, position: usize) -> bool {
        self.take_target_at(position).is_some()
    }

    /// Remove and return the target at `position`, renumbering the rest so
    /// color indices stay gap-free.
    pub fn take_target_at(&self, position: usize) -> Option<Arc<Target>> {
        let mut targets = self.targets.write();
        if position >= targets.len() {
            return None;
        }

        let removed = targets.remove(position);
        for (index, target) in targets.iter().enumerate() {
            target.set_color_index(index);
        }

        tracing::debug!(id = %removed.id(), target_name = %removed.name(), "Target removed");
        Some(removed)
    }

    /// Copy of the current target list, in position order.
    pub fn list_targets(&self) -> Vec<Arc<Target>> {
        self.targets.read().clone()
    }

    /// Look up a target by id.
    pub fn get(&self, id: TargetId) -> Option<Arc<Target>> {
        self.targets.read().iter().find(|t| t.id() == id).cloned()
    }

    /// Current position of a target.
    pub fn position(&self, id: TargetId) -> Option<usize> {
        self.targets.read().iter().position(|t| t.id() == id)
    }

    pub fn count(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Remove every target, returning them.
    pub fn clear(&self) -> Vec<Arc<Target>> {
        std::mem::take(&mut *self.targets.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Sample;
    use std::time::Duration;

    #[test]
    fn test_add_assigns_indices() {
        let registry = TargetRegistry::new();
        let a = registry.add_target("a", "10.0.0.1", 10);
        let b = registry.add_target("b", "10.0.0.2", 0);

        assert_eq!(a.color_index(), 0);
        assert_eq!(b.color_index(), 1);
        assert_ne!(a.id(), b.id());
        assert_eq!(b.ring().capacity(), DEFAULT_RING_CAPACITY);
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_remove_renumbers() {
        let registry = TargetRegistry::new();
        for name in ["a", "b", "c", "d"] {
            registry.add_target(name, "127.0.0.1", 4);
        }

        assert!(registry.remove_target_at(1));
        assert!(!registry.remove_target_at(3));

        let list = registry.list_targets();
        let names: Vec<_> = list.iter().map(|t| t.name()).collect();
        let indices: Vec<_> = list.iter().map(|t| t.color_index()).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_lookup_by_id() {
        let registry = TargetRegistry::new();
        registry.add_target("a", "127.0.0.1", 4);
        let b = registry.add_target("b", "127.0.0.2", 4);

        assert_eq!(registry.position(b.id()), Some(1));
        registry.remove_target_at(0);
        assert_eq!(registry.position(b.id()), Some(0));
        assert_eq!(registry.get(b.id()).unwrap().name(), "b");
        assert!(registry.get(TargetId(999)).is_none());
    }

    #[test]
    fn test_removed_ring_outlives_registry_entry() {
        let registry = TargetRegistry::new();
        let target = registry.add_target("a", "127.0.0.1", 4);
        let ring = Arc::clone(target.ring());
        drop(target);

        let removed = registry.take_target_at(0).unwrap();
        drop(removed);

        // A reader that grabbed the ring earlier can still use it
        ring.push(Sample::ok(1, Duration::from_millis(5)));
        assert_eq!(ring.snapshot().len(), 1);
    }

    #[test]
    fn test_clear() {
        let registry = TargetRegistry::new();
        registry.add_target("a", "127.0.0.1", 4);
        registry.add_target("b", "127.0.0.1", 4);
        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_list_during_add_remove() {
        let registry = Arc::new(TargetRegistry::new());

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..500 {
                    registry.add_target(format!("t{i}"), "127.0.0.1", 8);
                    if i % 3 == 0 {
                        registry.remove_target_at(0);
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        for target in registry.list_targets() {
                            assert!(target.name().starts_with('t'));
                            assert_eq!(target.ring().capacity(), 8);
                            let _ = target.snapshot();
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(registry.count(), 500 - 167);
    }
}
