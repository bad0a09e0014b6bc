//! HDBSCAN over cosine distance.
//!
//! 1. Core distance: distance to the `min_samples`-th nearest point
//!    (the point itself counts as the first).
//! 2. Mutual reachability `max(core(a), core(b), d(a, b))`.
//! 3. Minimum spanning tree with Prim's algorithm.
//! 4. Single-linkage tree from the sorted MST edges.
//! 5. Condensed tree: splits smaller than `min_cluster_size` are points
//!    falling out of their parent cluster.
//! 6. Excess-of-mass selection of flat clusters, root excluded.

use std::collections::BTreeMap;

use keygraph_core::{ClusterId, ClusteringConfig, ClusteringMethod, Result, NOISE_CLUSTER_ID};
use keygraph_vector::cosine_distance_matrix;
use ndarray::Array2;
use tracing::debug;

use super::ClusteringAlgorithm;

const MIN_DISTANCE: f64 = 1e-10;

/// Edge of the condensed tree. `child < n` is a point, otherwise a cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CondensedEdge {
    pub parent: usize,
    pub child: usize,
    pub lambda: f64,
    pub size: usize,
}

#[derive(Debug, Clone, Copy)]
struct LinkageNode {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

#[derive(Debug, Clone)]
pub struct Hdbscan {
    pub min_cluster_size: usize,
    pub min_samples: usize,
}

impl Hdbscan {
    pub fn new(min_cluster_size: usize, min_samples: usize) -> Self {
        Self {
            min_cluster_size: min_cluster_size.max(2),
            min_samples: min_samples.max(1),
        }
    }

    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self::new(config.min_cluster_size, config.min_samples)
    }

    fn lambda(distance: f64) -> f64 {
        1.0 / distance.max(MIN_DISTANCE)
    }

    fn core_distances(&self, distances: &Array2<f64>) -> Vec<f64> {
        let n = distances.nrows();
        (0..n)
            .map(|i| {
                if self.min_samples <= 1 {
                    return 0.0;
                }
                let mut others: Vec<f64> = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| distances[[i, j]])
                    .collect();
                others.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let k = (self.min_samples - 2).min(others.len().saturating_sub(1));
                others.get(k).copied().unwrap_or(0.0)
            })
            .collect()
    }

    /// Prim's algorithm over the dense mutual-reachability graph, edges
    /// returned in ascending weight (stable for equal weights).
    fn minimum_spanning_tree(mutual_reachability: &Array2<f64>) -> Vec<(usize, usize, f64)> {
        let n = mutual_reachability.nrows();
        if n == 0 {
            return Vec::new();
        }

        let mut in_tree = vec![false; n];
        let mut edges = Vec::with_capacity(n.saturating_sub(1));
        let mut min_dist = vec![f64::INFINITY; n];
        let mut min_edge = vec![0usize; n];

        in_tree[0] = true;
        for j in 1..n {
            min_dist[j] = mutual_reachability[[0, j]];
        }

        for _ in 1..n {
            let mut min_val = f64::INFINITY;
            let mut min_idx = usize::MAX;
            for j in 0..n {
                if !in_tree[j] && (min_idx == usize::MAX || min_dist[j] < min_val) {
                    min_val = min_dist[j];
                    min_idx = j;
                }
            }
            if min_idx == usize::MAX {
                break;
            }

            in_tree[min_idx] = true;
            edges.push((min_edge[min_idx], min_idx, min_val));

            for j in 0..n {
                if !in_tree[j] && mutual_reachability[[min_idx, j]] < min_dist[j] {
                    min_dist[j] = mutual_reachability[[min_idx, j]];
                    min_edge[j] = min_idx;
                }
            }
        }

        edges.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        edges
    }

    /// Single-linkage dendrogram; node `n + i` is created by the `i`-th edge.
    fn single_linkage(n: usize, mst: &[(usize, usize, f64)]) -> Vec<LinkageNode> {
        let total = n + mst.len();
        let mut parent: Vec<usize> = (0..total).collect();
        let mut size: Vec<usize> = vec![1; total];
        let mut nodes = Vec::with_capacity(mst.len());

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        for (step, &(a, b, w)) in mst.iter().enumerate() {
            let ra = find(&mut parent, a);
            let rb = find(&mut parent, b);
            let node = n + step;
            size[node] = size[ra] + size[rb];
            parent[ra] = node;
            parent[rb] = node;
            nodes.push(LinkageNode {
                left: ra,
                right: rb,
                distance: w,
                size: size[node],
            });
        }
        nodes
    }

    fn leaves(n: usize, linkage: &[LinkageNode], root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node < n {
                out.push(node);
            } else {
                let link = &linkage[node - n];
                stack.push(link.right);
                stack.push(link.left);
            }
        }
        out
    }

    /// Condense the dendrogram. Cluster labels start at `n` for the root and
    /// always exceed their parent's label.
    fn condense(&self, n: usize, linkage: &[LinkageNode]) -> Vec<CondensedEdge> {
        let mut edges = Vec::new();
        if linkage.is_empty() {
            return edges;
        }
        let root = n + linkage.len() - 1;
        let node_size = |node: usize| if node < n { 1 } else { linkage[node - n].size };

        let mut next_label = n + 1;
        // (dendrogram node, cluster label it belongs to)
        let mut queue = std::collections::VecDeque::from([(root, n)]);

        while let Some((node, label)) = queue.pop_front() {
            if node < n {
                continue;
            }
            let link = linkage[node - n];
            let lambda = Self::lambda(link.distance);
            let left_big = node_size(link.left) >= self.min_cluster_size;
            let right_big = node_size(link.right) >= self.min_cluster_size;

            match (left_big, right_big) {
                (true, true) => {
                    for child in [link.left, link.right] {
                        let child_label = next_label;
                        next_label += 1;
                        edges.push(CondensedEdge {
                            parent: label,
                            child: child_label,
                            lambda,
                            size: node_size(child),
                        });
                        queue.push_back((child, child_label));
                    }
                }
                (false, false) => {
                    for child in [link.left, link.right] {
                        for point in Self::leaves(n, linkage, child) {
                            edges.push(CondensedEdge {
                                parent: label,
                                child: point,
                                lambda,
                                size: 1,
                            });
                        }
                    }
                }
                (big_left, _) => {
                    let (kept, dropped) = if big_left {
                        (link.left, link.right)
                    } else {
                        (link.right, link.left)
                    };
                    for point in Self::leaves(n, linkage, dropped) {
                        edges.push(CondensedEdge {
                            parent: label,
                            child: point,
                            lambda,
                            size: 1,
                        });
                    }
                    queue.push_back((kept, label));
                }
            }
        }
        edges
    }

    /// Labels from a condensed tree via excess-of-mass selection.
    ///
    /// A point takes the nearest selected ancestor of the cluster it fell out
    /// of, even when it leaves at that cluster's birth. Points leaving the
    /// root are noise.
    pub fn labels_from_condensed(n: usize, condensed: &[CondensedEdge]) -> Vec<ClusterId> {
        let mut labels = vec![NOISE_CLUSTER_ID; n];
        if condensed.is_empty() {
            return labels;
        }

        let root = n;
        let mut birth: BTreeMap<usize, f64> = BTreeMap::from([(root, 0.0)]);
        let mut cluster_parent: BTreeMap<usize, usize> = BTreeMap::new();
        let mut children: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for edge in condensed.iter().filter(|e| e.child >= n) {
            birth.insert(edge.child, edge.lambda);
            cluster_parent.insert(edge.child, edge.parent);
            children.entry(edge.parent).or_default().push(edge.child);
        }

        let mut stability: BTreeMap<usize, f64> = birth.keys().map(|c| (*c, 0.0)).collect();
        for edge in condensed {
            let born = birth.get(&edge.parent).copied().unwrap_or(0.0);
            if let Some(s) = stability.get_mut(&edge.parent) {
                *s += (edge.lambda - born) * edge.size as f64;
            }
        }

        // children carry larger labels, so descending order is bottom-up
        let mut selected: BTreeMap<usize, bool> = BTreeMap::new();
        let clusters: Vec<usize> = birth.keys().copied().filter(|c| *c != root).collect();
        for &cluster in clusters.iter().rev() {
            let own = stability.get(&cluster).copied().unwrap_or(0.0);
            let subtree: f64 = children
                .get(&cluster)
                .map(|kids| kids.iter().map(|k| stability.get(k).copied().unwrap_or(0.0)).sum())
                .unwrap_or(0.0);

            if subtree > own {
                selected.insert(cluster, false);
                stability.insert(cluster, subtree);
            } else {
                selected.insert(cluster, true);
                let mut stack: Vec<usize> = children.get(&cluster).cloned().unwrap_or_default();
                while let Some(descendant) = stack.pop() {
                    selected.insert(descendant, false);
                    if let Some(kids) = children.get(&descendant) {
                        stack.extend(kids.iter().copied());
                    }
                }
            }
        }

        let mut numbering: BTreeMap<usize, ClusterId> = BTreeMap::new();
        let mut fall_out: Vec<Option<usize>> = vec![None; n];
        for edge in condensed.iter().filter(|e| e.child < n) {
            fall_out[edge.child] = Some(edge.parent);
        }

        for (point, entry) in fall_out.iter().enumerate() {
            let Some(mut cluster) = *entry else {
                continue;
            };
            let owner = loop {
                if selected.get(&cluster).copied().unwrap_or(false) {
                    break Some(cluster);
                }
                match cluster_parent.get(&cluster) {
                    Some(parent) => cluster = *parent,
                    None => break None,
                }
            };
            let Some(owner) = owner else {
                continue;
            };
            let next = numbering.len() as ClusterId;
            labels[point] = *numbering.entry(owner).or_insert(next);
        }
        labels
    }

    /// Condensed tree for the given embeddings (exposed for diagnostics).
    pub fn condensed_tree(&self, embeddings: &Array2<f32>) -> Vec<CondensedEdge> {
        let n = embeddings.nrows();
        let distances = cosine_distance_matrix(embeddings.view());
        let core = self.core_distances(&distances);

        let mut mutual_reachability = distances.clone();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    mutual_reachability[[i, j]] = distances[[i, j]].max(core[i]).max(core[j]);
                }
            }
        }

        let mst = Self::minimum_spanning_tree(&mutual_reachability);
        let linkage = Self::single_linkage(n, &mst);
        self.condense(n, &linkage)
    }
}

impl ClusteringAlgorithm for Hdbscan {
    fn method(&self) -> ClusteringMethod {
        ClusteringMethod::Hdbscan
    }

    fn fit(&self, embeddings: &Array2<f32>) -> Result<Vec<ClusterId>> {
        let n = embeddings.nrows();
        if n < self.min_cluster_size {
            debug!(n, min_cluster_size = self.min_cluster_size, "Too few points; all noise");
            return Ok(vec![NOISE_CLUSTER_ID; n]);
        }

        let condensed = self.condensed_tree(embeddings);
        let labels = Self::labels_from_condensed(n, &condensed);
        debug!(
            n,
            clusters = labels.iter().copied().max().map_or(0, |m| m + 1),
            noise = labels.iter().filter(|l| **l == NOISE_CLUSTER_ID).count(),
            "HDBSCAN fit"
        );
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn three_groups() -> Array2<f32> {
        array![
            [1.0f32, 0.02, 0.0],
            [0.99, 0.0, 0.03],
            [0.98, 0.05, 0.0],
            [0.97, 0.0, 0.0],
            [0.0, 1.0, 0.02],
            [0.03, 0.99, 0.0],
            [0.0, 0.98, 0.05],
            [0.02, 0.97, 0.0],
            [0.0, 0.0, 1.0],
            [0.03, 0.02, 0.99],
            [0.0, 0.05, 0.98],
            [0.04, 0.0, 0.97],
        ]
    }

    #[test]
    fn test_finds_dense_groups() {
        let labels = Hdbscan::new(3, 2).fit(&three_groups()).unwrap();
        assert_eq!(labels, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_too_few_points_is_noise() {
        let subset = three_groups().slice(ndarray::s![..4, ..]).to_owned();
        let labels = Hdbscan::new(5, 2).fit(&subset).unwrap();
        assert_eq!(labels, vec![-1, -1, -1, -1]);
    }

    #[test]
    fn test_outlier_is_noise() {
        let mut data: Vec<f32> = three_groups().iter().copied().collect();
        data.extend_from_slice(&[-1.0, -1.0, -1.0]);
        let embeddings = Array2::from_shape_vec((13, 3), data).unwrap();
        let labels = Hdbscan::new(3, 2).fit(&embeddings).unwrap();
        assert_eq!(labels[12], NOISE_CLUSTER_ID);
        assert_eq!(labels[0], labels[3]);
        assert_ne!(labels[0], labels[4]);
    }

    #[test]
    fn test_condensed_tree_structure() {
        let hdbscan = Hdbscan::new(3, 2);
        let condensed = hdbscan.condensed_tree(&three_groups());
        let n = 12;
        // every point falls out exactly once
        let mut seen = vec![0; n];
        for edge in condensed.iter().filter(|e| e.child < n) {
            seen[edge.child] += 1;
        }
        assert!(seen.iter().all(|c| *c == 1));
        // child clusters are labelled after their parents
        assert!(condensed.iter().filter(|e| e.child >= n).all(|e| e.child > e.parent));
    }

    #[test]
    fn test_points_leaving_at_birth_stay_members() {
        // root splits into {A: 3 points, B: 2 + 3}; B sheds two points at its
        // own birth lambda and they still belong to B
        let n = 8;
        let condensed = vec![
            CondensedEdge { parent: 8, child: 9, lambda: 1.0, size: 3 },
            CondensedEdge { parent: 8, child: 10, lambda: 1.0, size: 5 },
            CondensedEdge { parent: 9, child: 0, lambda: 2.0, size: 1 },
            CondensedEdge { parent: 9, child: 1, lambda: 2.0, size: 1 },
            CondensedEdge { parent: 9, child: 2, lambda: 2.0, size: 1 },
            CondensedEdge { parent: 10, child: 3, lambda: 1.0, size: 1 },
            CondensedEdge { parent: 10, child: 4, lambda: 1.0, size: 1 },
            CondensedEdge { parent: 10, child: 5, lambda: 2.0, size: 1 },
            CondensedEdge { parent: 10, child: 6, lambda: 2.0, size: 1 },
            CondensedEdge { parent: 10, child: 7, lambda: 2.0, size: 1 },
        ];
        let labels = Hdbscan::labels_from_condensed(n, &condensed);
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_points_leaving_root_are_noise() {
        let n = 7;
        let condensed = vec![
            CondensedEdge { parent: 7, child: 0, lambda: 0.5, size: 1 },
            CondensedEdge { parent: 7, child: 8, lambda: 1.0, size: 3 },
            CondensedEdge { parent: 7, child: 9, lambda: 1.0, size: 3 },
            CondensedEdge { parent: 8, child: 1, lambda: 3.0, size: 1 },
            CondensedEdge { parent: 8, child: 2, lambda: 3.0, size: 1 },
            CondensedEdge { parent: 8, child: 3, lambda: 3.0, size: 1 },
            CondensedEdge { parent: 9, child: 4, lambda: 1.0, size: 1 },
            CondensedEdge { parent: 9, child: 5, lambda: 4.0, size: 1 },
            CondensedEdge { parent: 9, child: 6, lambda: 4.0, size: 1 },
        ];
        let labels = Hdbscan::labels_from_condensed(n, &condensed);
        assert_eq!(labels, vec![-1, 0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_cluster_shedding_all_points_at_birth_is_kept() {
        // tied reachability: every point of cluster 8 leaves at its birth
        let n = 6;
        let condensed = vec![
            CondensedEdge { parent: 6, child: 7, lambda: 1.0, size: 3 },
            CondensedEdge { parent: 6, child: 8, lambda: 1.0, size: 3 },
            CondensedEdge { parent: 7, child: 0, lambda: 5.0, size: 1 },
            CondensedEdge { parent: 7, child: 1, lambda: 5.0, size: 1 },
            CondensedEdge { parent: 7, child: 2, lambda: 5.0, size: 1 },
            CondensedEdge { parent: 8, child: 3, lambda: 1.0, size: 1 },
            CondensedEdge { parent: 8, child: 4, lambda: 1.0, size: 1 },
            CondensedEdge { parent: 8, child: 5, lambda: 1.0, size: 1 },
        ];
        let labels = Hdbscan::labels_from_condensed(n, &condensed);
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1]);
    }
}
