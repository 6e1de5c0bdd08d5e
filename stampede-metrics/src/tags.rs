use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Most series carry fewer than four tags (scenario, status, check, method).
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    pub fn from_unsorted(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 4]> = iter.into_iter().collect();
        tags.sort_unstable();
        // Duplicate keys collapse to a single entry.
        let mut deduped: SmallVec<[(KeyId, KeyId); 4]> = SmallVec::with_capacity(tags.len());
        for (k, v) in tags {
            match deduped.last_mut() {
                Some(last) if last.0 == k => last.1 = v,
                _ => deduped.push((k, v)),
            }
        }
        Self { tags: deduped }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let slice: &[(KeyId, KeyId)] = &self.tags;
        let idx = slice.partition_point(|(k, _)| *k < key);
        slice.get(idx).and_then(|(k, v)| (*k == key).then_some(*v))
    }
}
