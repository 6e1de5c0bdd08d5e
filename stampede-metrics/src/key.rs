use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Interned string id used for metric names, tag keys and tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<KeyId> for u32 {
    fn from(v: KeyId) -> Self {
        v.0
    }
}

#[derive(Debug, Default)]
struct InternerInner {
    map: AHashMap<Arc<str>, u32>,
    vec: Vec<Arc<str>>,
}

#[derive(Debug, Default)]
pub struct Interner {
    inner: RwLock<InternerInner>,
}

impl Interner {
    pub fn lookup(&self, s: &str) -> Option<KeyId> {
        self.inner.read().map.get(s).copied().map(KeyId)
    }

    pub fn get_or_intern(&self, s: &str) -> KeyId {
        if let Some(id) = self.lookup(s) {
            return id;
        }

        let mut inner = self.inner.write();
        if let Some(&id) = inner.map.get(s) {
            return KeyId(id);
        }

        let id = inner.vec.len() as u32;
        let s: Arc<str> = Arc::from(s);
        inner.vec.push(s.clone());
        inner.map.insert(s, id);

        KeyId(id)
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.inner.read().vec.get(id.0 as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let interner = Interner::default();
        let a = interner.get_or_intern("scenario");
        let b = interner.get_or_intern("status");
        assert_ne!(a, b);
        assert_eq!(interner.get_or_intern("scenario"), a);
        assert_eq!(interner.lookup("status"), Some(b));
        assert_eq!(interner.lookup("missing"), None);
        assert_eq!(interner.resolve(a).as_deref(), Some("scenario"));
    }
}
