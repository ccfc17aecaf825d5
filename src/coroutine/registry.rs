//! Arena-backed ordered registry with a round-robin cursor
//!
//! Entries live in a slot arena linked into a doubly-linked list by index.
//! Keys carry a generation so a stale key never reaches a reused slot. The
//! cursor names the next entry to visit and survives insertion and removal
//! around it; removing the entry under the cursor moves the cursor to that
//! entry's successor first.

/// Stable handle to a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Entry<T> {
    value: Option<T>,
    generation: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct Registry<T> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    /// Next entry to visit; None restarts from the head
    cursor: Option<usize>,
    len: usize,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Registry {
            entries: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            cursor: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the tail
    pub fn push_back(&mut self, value: T) -> RegistryKey {
        let index = match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.generation += 1;
                entry.value = Some(value);
                entry.prev = self.tail;
                entry.next = None;
                index
            }
            None => {
                self.entries.push(Entry {
                    value: Some(value),
                    generation: 0,
                    prev: self.tail,
                    next: None,
                });
                self.entries.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.entries[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        RegistryKey {
            index,
            generation: self.entries[index].generation,
        }
    }

    fn live_index(&self, key: RegistryKey) -> Option<usize> {
        let entry = self.entries.get(key.index)?;
        if entry.generation == key.generation && entry.value.is_some() {
            Some(key.index)
        } else {
            None
        }
    }

    pub fn contains(&self, key: RegistryKey) -> bool {
        self.live_index(key).is_some()
    }

    pub fn get(&self, key: RegistryKey) -> Option<&T> {
        let index = self.live_index(key)?;
        self.entries[index].value.as_ref()
    }

    /// Unlink and return the entry for `key`
    pub fn remove(&mut self, key: RegistryKey) -> Option<T> {
        let index = self.live_index(key)?;
        let (prev, next) = {
            let entry = &self.entries[index];
            (entry.prev, entry.next)
        };

        if self.cursor == Some(index) {
            self.cursor = next;
        }

        match prev {
            Some(prev) => self.entries[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.entries[next].prev = prev,
            None => self.tail = prev,
        }

        let entry = &mut self.entries[index];
        entry.prev = None;
        entry.next = None;
        let value = entry.value.take();
        self.free.push(index);
        self.len -= 1;
        value
    }

    /// Entry under the cursor, then advance the cursor (wrapping at the
    /// tail)
    pub fn next_round_robin(&mut self) -> Option<(RegistryKey, &T)> {
        let index = self.cursor.or(self.head)?;
        self.cursor = self.entries[index].next;

        let entry = &self.entries[index];
        let key = RegistryKey {
            index,
            generation: entry.generation,
        };
        entry.value.as_ref().map(|value| (key, value))
    }

    /// Remove every entry, in list order
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        let mut current = self.head;
        while let Some(index) = current {
            let entry = &mut self.entries[index];
            current = entry.next;
            if let Some(value) = entry.value.take() {
                values.push(value);
            }
        }
        self.entries.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.cursor = None;
        self.len = 0;
        values
    }

    /// Values in list order
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut current = self.head;
        std::iter::from_fn(move || {
            let index = current?;
            let entry = &self.entries[index];
            current = entry.next;
            entry.value.as_ref()
        })
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(registry: &mut Registry<u32>) -> Option<u32> {
        registry.next_round_robin().map(|(_, value)| *value)
    }

    #[test]
    fn test_round_robin_wraps() {
        let mut registry = Registry::new();
        for value in 1..=3 {
            registry.push_back(value);
        }
        let visited: Vec<_> = (0..7).filter_map(|_| visit(&mut registry)).collect();
        assert_eq!(visited, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn test_remove_under_cursor_advances_cursor() {
        let mut registry = Registry::new();
        let _a = registry.push_back(1);
        let b = registry.push_back(2);
        let _c = registry.push_back(3);

        assert_eq!(visit(&mut registry), Some(1));
        // cursor now on 2
        assert_eq!(registry.remove(b), Some(2));
        assert_eq!(visit(&mut registry), Some(3));
        assert_eq!(visit(&mut registry), Some(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_tail_under_cursor_restarts_at_head() {
        let mut registry = Registry::new();
        registry.push_back(1);
        let tail = registry.push_back(2);

        assert_eq!(visit(&mut registry), Some(1));
        registry.remove(tail);
        assert_eq!(visit(&mut registry), Some(1));
    }

    #[test]
    fn test_insert_behind_cursor_is_visited_in_same_lap() {
        let mut registry = Registry::new();
        registry.push_back(1);
        registry.push_back(2);
        assert_eq!(visit(&mut registry), Some(1));
        registry.push_back(3);
        assert_eq!(visit(&mut registry), Some(2));
        assert_eq!(visit(&mut registry), Some(3));
        assert_eq!(visit(&mut registry), Some(1));
    }

    #[test]
    fn test_stale_key_does_not_hit_reused_slot() {
        let mut registry = Registry::new();
        let first = registry.push_back(1);
        registry.remove(first);
        let second = registry.push_back(2);

        assert_eq!(first.index, second.index);
        assert!(!registry.contains(first));
        assert_eq!(registry.remove(first), None);
        assert_eq!(registry.get(second), Some(&2));
    }

    #[test]
    fn test_remove_everything() {
        let mut registry = Registry::new();
        let keys: Vec<_> = (0..5).map(|v| registry.push_back(v)).collect();
        visit(&mut registry);
        visit(&mut registry);
        for key in keys.into_iter().rev() {
            registry.remove(key);
        }
        assert!(registry.is_empty());
        assert_eq!(visit(&mut registry), None);

        registry.push_back(42);
        assert_eq!(visit(&mut registry), Some(42));
    }

    #[test]
    fn test_drain_and_iter() {
        let mut registry = Registry::new();
        for value in [5, 6, 7] {
            registry.push_back(value);
        }
        assert_eq!(registry.iter().copied().collect::<Vec<_>>(), vec![5, 6, 7]);
        assert_eq!(registry.drain(), vec![5, 6, 7]);
        assert!(registry.is_empty());
        assert_eq!(visit(&mut registry), None);
    }
}
