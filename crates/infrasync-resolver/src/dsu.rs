//! Disjoint-set union (union-find) over entity indices.
//!
//! Cross-source identity is a graph problem: sightings are nodes, shared
//! alias keys are edges, and one real-world object is a connected
//! component. An explicit disjoint-set structure keeps transitive merges
//! correct (A~B on hostname and B~C on serial puts A, B, C in one group
//! even though A and C share nothing) and testable in isolation.

/// Union-find with path compression and union by rank.
#[derive(Debug)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    /// Creates `len` singleton sets, one per entity index.
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    /// Returns the representative of `index`'s set.
    pub fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression: point everything on the walk at the root.
        let mut current = index;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Merges the sets containing `a` and `b`.
    pub fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
    }

    /// Returns whether `a` and `b` are in the same set.
    pub fn connected(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }

    /// Collects the members of every set, grouped by representative.
    ///
    /// Groups and members come out in ascending index order, so the
    /// result is deterministic regardless of union order.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let len = self.parent.len();
        let mut by_root: std::collections::BTreeMap<usize, Vec<usize>> =
            std::collections::BTreeMap::new();
        for index in 0..len {
            let root = self.find(index);
            by_root.entry(root).or_default().push(index);
        }
        by_root.into_values().collect()
    }
}
