use std::collections::HashSet;

/// Primary keys gathered before the feed reports `Ready`.
///
/// Unique, and flattened in first-insertion order so the initial publish is stable.
#[derive(Debug, Default)]
pub struct BootstrapSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl BootstrapSet {
    pub fn insert(&mut self, id: String) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push(id);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|x| x != id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn into_entries(self) -> Vec<String> {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_insertion_order_and_dedups() {
        let mut set = BootstrapSet::default();
        assert!(set.insert("b".into()));
        assert!(set.insert("a".into()));
        assert!(!set.insert("b".into()));
        assert!(set.remove("b"));
        assert!(!set.remove("b"));
        assert!(set.insert("b".into()));
        assert_eq!(set.into_entries(), vec!["a", "b"]);
    }
}
