//! Named parameter arrays loaded from a training checkpoint

use std::collections::BTreeMap;

use crate::neural::dense::DenseArray;

/// Mapping from parameter key (`actor_mean.0.weight`) to its array.
///
/// Keys are kept sorted so listings are stable. Nothing in the converter
/// depends on that order; layer order comes from the layer mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    params: BTreeMap<String, DenseArray>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, returning the array it replaced if any
    pub fn insert(&mut self, key: impl Into<String>, array: DenseArray) -> Option<DenseArray> {
        self.params.insert(key.into(), array)
    }

    pub fn get(&self, key: &str) -> Option<&DenseArray> {
        self.params.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Drop a parameter, e.g. to build a deliberately broken checkpoint
    pub fn remove(&mut self, key: &str) -> Option<DenseArray> {
        self.params.remove(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DenseArray)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Total number of scalar parameters across all arrays
    pub fn parameter_count(&self) -> usize {
        self.params.values().map(DenseArray::numel).sum()
    }
}

impl FromIterator<(String, DenseArray)> for Checkpoint {
    fn from_iter<I: IntoIterator<Item = (String, DenseArray)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_sorted_regardless_of_insertion_order() {
        let mut checkpoint = Checkpoint::new();
        checkpoint.insert("critic.4.bias", DenseArray::vector(vec![0.0]));
        checkpoint.insert("actor_mean.2.bias", DenseArray::vector(vec![0.0; 3]));
        checkpoint.insert("actor_logstd", DenseArray::vector(vec![0.0; 2]));

        let keys: Vec<&str> = checkpoint.keys().collect();
        assert_eq!(keys, vec!["actor_logstd", "actor_mean.2.bias", "critic.4.bias"]);
        assert_eq!(checkpoint.parameter_count(), 6);
    }

    #[test]
    fn test_insert_replaces_and_remove_drops() {
        let mut checkpoint: Checkpoint =
            vec![("a".to_string(), DenseArray::vector(vec![1.0]))].into_iter().collect();

        let previous = checkpoint.insert("a", DenseArray::vector(vec![2.0]));
        assert_eq!(previous, Some(DenseArray::vector(vec![1.0])));
        assert_eq!(checkpoint.get("a").unwrap().values(), &[2.0]);

        assert!(checkpoint.remove("a").is_some());
        assert!(!checkpoint.contains("a"));
        assert!(checkpoint.is_empty());
    }
}
