use std::{collections::HashMap, hash::Hash};

/// Tabla asociativa con puntos de restauración.
///
/// Cada escritura registra el valor anterior de su llave, de modo que
/// [`ScopedMap::restore()`] deshace en orden inverso todo lo escrito
/// después de un [`Checkpoint`].
pub struct ScopedMap<K, V> {
    map: HashMap<K, V>,
    log: Vec<(K, Option<V>)>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint(usize);

impl<K: Hash + Eq + Clone, V> ScopedMap<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        let previous = self.map.insert(key.clone(), value);
        self.log.push((key, previous));
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.log.len())
    }

    pub fn restore(&mut self, Checkpoint(depth): Checkpoint) {
        assert!(depth <= self.log.len(), "checkpoint is newer than the undo log");

        for (key, previous) in self.log.drain(depth..).rev() {
            match previous {
                Some(previous) => self.map.insert(key, previous),
                None => self.map.remove(&key),
            };
        }
    }
}

impl<K, V> Default for ScopedMap<K, V> {
    fn default() -> Self {
        ScopedMap {
            map: HashMap::new(),
            log: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_undoes_in_reverse() {
        let mut map = ScopedMap::default();
        map.insert('a', 1);

        let outer = map.checkpoint();
        map.insert('a', 2);
        map.insert('b', 3);

        let inner = map.checkpoint();
        map.insert('a', 4);
        map.restore(inner);

        assert_eq!(map.get(&'a'), Some(&2));
        assert_eq!(map.get(&'b'), Some(&3));

        map.restore(outer);
        assert_eq!(map.get(&'a'), Some(&1));
        assert_eq!(map.get(&'b'), None);

        map.restore(outer);
        assert_eq!(map.get(&'a'), Some(&1));
    }
}
