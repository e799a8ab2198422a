//! Partition of a constraint set into independent groups. Two constraints are in the
//! same component if they share a variable, directly or through other constraints.

use std::collections::{BTreeMap, BTreeSet};

use crate::constraints::{EqualityConstraint, EqualityConstraints};
use crate::keys::Key;

/// Constraints that transitively share variables, with exactly the variables they touch
#[derive(Debug, Clone)]
pub struct ConnectedComponent {
    constraints: EqualityConstraints,
    keys: BTreeSet<Key>,
}

impl ConnectedComponent {
    pub fn new(constraints: EqualityConstraints) -> Self {
        let keys = constraints.keys();
        ConnectedComponent { constraints, keys }
    }

    pub fn constraints(&self) -> &EqualityConstraints {
        &self.constraints
    }

    pub fn keys(&self) -> &BTreeSet<Key> {
        &self.keys
    }

    pub fn contains(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }
}

/// Disjoint sets over an arena of key indices
struct UnionFind {
    index: BTreeMap<Key, usize>,
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new<'a>(keys: impl IntoIterator<Item = &'a Key>) -> Self {
        let mut index = BTreeMap::new();
        for key in keys {
            let next = index.len();
            index.entry(*key).or_insert(next);
        }
        let n = index.len();
        UnionFind { index, parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }

    fn root(&mut self, key: &Key) -> Option<usize> {
        let i = *self.index.get(key)?;
        Some(self.find(i))
    }
}

/// Splits the constraints into connected components.
///
/// Components are ordered by their smallest key; a constraint without keys forms a
/// component of its own and these come last. Inside a component, constraints keep
/// their order in the input. The partition itself does not depend on the input order.
pub fn find_connected_components(constraints: &EqualityConstraints) -> Vec<ConnectedComponent> {
    let keys = constraints.keys();
    let mut sets = UnionFind::new(keys.iter());
    for constraint in constraints.iter() {
        let indices: Vec<usize> = constraint.keys().iter().filter_map(|k| sets.index.get(k).copied()).collect();
        for pair in indices.windows(2) {
            sets.union(pair[0], pair[1]);
        }
    }

    // Root -> smallest key of the set. Keys iterate in ascending order, so the first
    // key seen for a root is its smallest one.
    let mut smallest: BTreeMap<usize, Key> = BTreeMap::new();
    for key in &keys {
        if let Some(root) = sets.root(key) {
            smallest.entry(root).or_insert(*key);
        }
    }

    let mut grouped: BTreeMap<Key, Vec<EqualityConstraint>> = BTreeMap::new();
    let mut keyless = Vec::new();
    for constraint in constraints.iter() {
        let root = constraint.keys().first().and_then(|k| sets.root(k));
        match root.and_then(|r| smallest.get(&r)) {
            Some(first) => grouped.entry(*first).or_default().push(constraint.clone()),
            None => keyless.push(constraint.clone()),
        }
    }

    grouped
        .into_values()
        .chain(keyless.into_iter().map(|c| vec![c]))
        .map(|group| ConnectedComponent::new(group.into_iter().collect()))
        .collect()
}

impl EqualityConstraints {
    pub fn connected_components(&self) -> Vec<ConnectedComponent> {
        find_connected_components(self)
    }
}
