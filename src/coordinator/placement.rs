//! Replica-set generation
//!
//! Turns the ordered server permutation into the candidate replica sets that
//! regions are laid out on. Sets are slices into one flat backing store so
//! that large clusters don't duplicate server lists per set.
//!
//! With at most `R` servers every set is a rotation of the whole permutation.
//! Otherwise each starting offset `n` yields one set per stride
//! `p in [1, P]`, taking indices `n, n+p, ..., n+p(R-1)`, which spreads a
//! region's predecessors over non-adjacent servers. Strides that would run
//! past the end are skipped, so the work is bounded by the cluster size
//! however large `P` is.

use crate::common::ServerId;

/// One replica set: a window into [`ReplicaSets`] storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    len: usize,
}

/// Ordered list of replica sets computed from a permutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaSets {
    storage: Vec<ServerId>,
    spans: Vec<Span>,
}

impl ReplicaSets {
    /// Compute the replica sets for replication factor `r` and predecessor
    /// width `p`. A replication factor of zero yields no sets.
    pub fn compute(r: u64, p: u64, permutation: &[ServerId]) -> Self {
        let mut sets = Self::default();

        if r == 0 {
            return sets;
        }

        if permutation.len() as u64 <= r {
            sets.small(permutation);
        } else {
            let p = usize::try_from(p).unwrap_or(usize::MAX);
            sets.strided(r as usize, p, permutation);
        }

        sets
    }

    fn small(&mut self, permutation: &[ServerId]) {
        let n = permutation.len();

        for i in 0..n {
            self.spans.push(Span {
                start: self.storage.len(),
                len: n,
            });
            self.storage
                .extend((0..n).map(|j| permutation[(i + j) % n]));
        }
    }

    fn strided(&mut self, r: usize, p: usize, permutation: &[ServerId]) {
        let n = permutation.len();

        for start in 0..n {
            // Widest stride that still ends inside the permutation. With
            // R = 1 every stride picks the same server, so one set will do.
            let widest = match r {
                1 => 1,
                _ => (n - 1 - start) / (r - 1),
            };

            for stride in 1..=p.min(widest) {
                self.spans.push(Span {
                    start: self.storage.len(),
                    len: r,
                });
                self.storage
                    .extend((0..r).map(|k| permutation[start + stride * k]));
            }
        }
    }

    /// Number of replica sets
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Get the replica set at `idx`
    pub fn get(&self, idx: usize) -> Option<&[ServerId]> {
        self.spans
            .get(idx)
            .map(|s| &self.storage[s.start..s.start + s.len])
    }

    /// Replica set for region `region_idx` of `num_regions` in a subspace.
    ///
    /// Regions are spread over the sets in order: region `j` of `N` uses set
    /// `floor(j * |sets| / N)`.
    pub fn for_region(&self, region_idx: usize, num_regions: usize) -> Option<&[ServerId]> {
        if num_regions == 0 || region_idx >= num_regions {
            return None;
        }
        self.get(region_idx * self.len() / num_regions)
    }

    /// Iterate over all sets in order
    pub fn iter(&self) -> impl Iterator<Item = &[ServerId]> {
        self.spans
            .iter()
            .map(move |s| &self.storage[s.start..s.start + s.len])
    }

    /// The flat backing store the sets slice into
    pub fn storage(&self) -> &[ServerId] {
        &self.storage
    }
}

/// Compute replica sets; see [`ReplicaSets::compute`].
pub fn compute_replica_sets(r: u64, p: u64, permutation: &[ServerId]) -> ReplicaSets {
    ReplicaSets::compute(r, p, permutation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn servers(ids: &[u64]) -> Vec<ServerId> {
        ids.iter().copied().map(ServerId).collect()
    }

    #[test]
    fn test_empty_permutation() {
        let sets = compute_replica_sets(3, 1, &[]);
        assert!(sets.is_empty());
        assert!(sets.for_region(0, 4).is_none());
    }

    #[test]
    fn test_zero_replication_factor() {
        let sets = compute_replica_sets(0, 1, &servers(&[1, 2, 3]));
        assert!(sets.is_empty());
    }

    #[test]
    fn test_small_cluster_rotations() {
        let perm = servers(&[5, 6, 7]);
        let sets = compute_replica_sets(3, 2, &perm);

        assert_eq!(sets.len(), 3);
        assert_eq!(sets.get(0).unwrap(), servers(&[5, 6, 7]).as_slice());
        assert_eq!(sets.get(1).unwrap(), servers(&[6, 7, 5]).as_slice());
        assert_eq!(sets.get(2).unwrap(), servers(&[7, 5, 6]).as_slice());
        assert_eq!(sets.storage().len(), 9);
    }

    #[test]
    fn test_small_cluster_uses_whole_permutation() {
        // Two servers, R = 5: every set has both servers, not R of them
        let perm = servers(&[1, 2]);
        let sets = compute_replica_sets(5, 1, &perm);

        assert_eq!(sets.len(), 2);
        for set in sets.iter() {
            assert_eq!(set.len(), 2);
            let distinct: BTreeSet<_> = set.iter().collect();
            assert_eq!(distinct.len(), 2);
        }
    }

    #[test]
    fn test_single_server() {
        let sets = compute_replica_sets(1, 1, &servers(&[42]));
        assert_eq!(sets.len(), 1);
        assert_eq!(sets.get(0).unwrap(), servers(&[42]).as_slice());
    }

    #[test]
    fn test_strided_sets() {
        let perm = servers(&[1, 2, 3, 4, 5]);
        let sets = compute_replica_sets(2, 2, &perm);

        let expected: Vec<Vec<ServerId>> = vec![
            servers(&[1, 2]),
            servers(&[1, 3]),
            servers(&[2, 3]),
            servers(&[2, 4]),
            servers(&[3, 4]),
            servers(&[3, 5]),
            servers(&[4, 5]),
        ];
        let actual: Vec<Vec<ServerId>> = sets.iter().map(|s| s.to_vec()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_strided_sets_have_distinct_members_at_fixed_stride() {
        let perm = servers(&[10, 11, 12, 13, 14, 15, 16, 17, 18]);

        for r in 1..=4u64 {
            for p in 1..=3u64 {
                let sets = compute_replica_sets(r, p, &perm);
                assert!(!sets.is_empty());

                for set in sets.iter() {
                    assert_eq!(set.len() as u64, r);
                    let idx: Vec<usize> = set
                        .iter()
                        .map(|s| perm.iter().position(|x| x == s).unwrap())
                        .collect();
                    let distinct: BTreeSet<_> = idx.iter().collect();
                    assert_eq!(distinct.len(), idx.len());

                    if idx.len() > 1 {
                        let stride = idx[1] - idx[0];
                        assert!(stride >= 1 && stride as u64 <= p);
                        for w in idx.windows(2) {
                            assert_eq!(w[1] - w[0], stride);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let perm = servers(&[9, 3, 7, 1, 8, 2]);
        let a = compute_replica_sets(3, 2, &perm);
        let b = compute_replica_sets(3, 2, &perm);
        assert_eq!(a, b);
        assert_eq!(a.storage(), b.storage());
    }

    #[test]
    fn test_zero_predecessor_width_yields_nothing_for_large_clusters() {
        let sets = compute_replica_sets(2, 0, &servers(&[1, 2, 3, 4]));
        assert!(sets.is_empty());
    }

    #[test]
    fn test_huge_predecessor_width_stops_at_widest_stride() {
        let perm = servers(&[1, 2, 3, 4, 5]);
        let widest = compute_replica_sets(2, 4, &perm);
        assert_eq!(widest.len(), 10);

        assert_eq!(compute_replica_sets(2, 1 << 40, &perm), widest);
        assert_eq!(compute_replica_sets(2, u64::MAX, &perm), widest);
        assert_eq!(compute_replica_sets(3, u64::MAX, &perm), compute_replica_sets(3, 2, &perm));
    }

    #[test]
    fn test_single_replica_sets_ignore_stride() {
        let perm = servers(&[1, 2, 3, 4]);
        let sets = compute_replica_sets(1, u64::MAX, &perm);
        let actual: Vec<Vec<ServerId>> = sets.iter().map(|s| s.to_vec()).collect();
        assert_eq!(
            actual,
            vec![servers(&[1]), servers(&[2]), servers(&[3]), servers(&[4])]
        );
        assert_eq!(sets.for_region(5, 8), Some(&servers(&[3])[..]));
    }

    #[test]
    fn test_region_assignment() {
        let perm = servers(&[1, 2, 3, 4]);
        let sets = compute_replica_sets(2, 1, &perm);
        assert_eq!(sets.len(), 3);

        // 6 regions over 3 sets: two regions per set
        let assigned: Vec<Vec<ServerId>> = (0..6)
            .map(|j| sets.for_region(j, 6).unwrap().to_vec())
            .collect();
        assert_eq!(assigned[0], servers(&[1, 2]));
        assert_eq!(assigned[1], servers(&[1, 2]));
        assert_eq!(assigned[2], servers(&[2, 3]));
        assert_eq!(assigned[5], servers(&[3, 4]));
        assert!(sets.for_region(6, 6).is_none());
    }
}
