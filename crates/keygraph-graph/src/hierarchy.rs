//! Parent/child topic hierarchy over clusters.
//!
//! Clusters live in an arena indexed by position (ascending cluster id).
//! Parent links are resolved into levels with an explicit walk and a
//! per-node state marker, so a malformed relationship graph can neither
//! recurse nor loop forever.

use std::collections::{BTreeMap, BTreeSet};

use keygraph_core::text::normalize_keyword;
use keygraph_core::{
    ClusterId, ClusterRelationshipMap, RelationshipType, TopicHierarchy, TopicNode, TopicTree,
    NOISE_CLUSTER_ID,
};
use tracing::{debug, warn};

/// Terms that mark a keyword as an umbrella query.
pub const BROAD_MARKERS: &[&str] = &[
    "guide",
    "best",
    "how to",
    "overview",
    "basics",
    "tips",
    "what is",
    "introduction",
    "beginner",
    "complete",
    "ultimate",
    "types of",
];

const SIZE_CAP: f32 = 20.0;
const WORD_CAP: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    Unvisited,
    InProgress,
    Done(usize),
}

/// Resolve hierarchy levels from parent links.
///
/// A node revisited while its own walk is still in progress closes a cycle;
/// it is detached (its parent set to `None`) and becomes a level-0 root.
/// Out-of-range parents are detached the same way.
pub fn compute_levels(parents: &mut [Option<usize>]) -> Vec<usize> {
    let n = parents.len();
    let mut state = vec![WalkState::Unvisited; n];
    let mut path: Vec<usize> = Vec::new();

    for start in 0..n {
        if state[start] != WalkState::Unvisited {
            continue;
        }

        path.clear();
        let mut node = start;
        loop {
            match state[node] {
                WalkState::Done(_) => break,
                WalkState::InProgress => {
                    warn!(node, "Cycle in topic hierarchy; detaching node as a root");
                    parents[node] = None;
                    state[node] = WalkState::Done(0);
                    break;
                }
                WalkState::Unvisited => {
                    state[node] = WalkState::InProgress;
                    path.push(node);
                    match parents[node] {
                        Some(parent) if parent < n => node = parent,
                        Some(_) => {
                            parents[node] = None;
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // every parent on the path is resolved before its child
        for &v in path.iter().rev() {
            if let WalkState::Done(_) = state[v] {
                continue;
            }
            let level = match parents[v] {
                Some(p) => match state[p] {
                    WalkState::Done(l) => l + 1,
                    _ => 0,
                },
                None => 0,
            };
            state[v] = WalkState::Done(level);
        }
    }

    state
        .into_iter()
        .map(|s| match s {
            WalkState::Done(level) => level,
            _ => 0,
        })
        .collect()
}

/// Builds the topic hierarchy from cluster-level relationships.
#[derive(Debug, Clone)]
pub struct TopicHierarchyBuilder {
    /// Minimum aggregate strength for a cluster pair to count.
    pub strength_threshold: f32,
    /// Generality difference separating parent/child from siblings.
    pub generality_gap: f32,
    /// Minimum strength for a sibling link.
    pub sibling_strength: f32,
}

impl Default for TopicHierarchyBuilder {
    fn default() -> Self {
        Self {
            strength_threshold: 0.6,
            generality_gap: 0.1,
            sibling_strength: 0.5,
        }
    }
}

impl TopicHierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn has_broad_marker(keyword: &str) -> bool {
        let padded = format!(" {} ", normalize_keyword(keyword));
        BROAD_MARKERS
            .iter()
            .any(|marker| padded.contains(&format!(" {marker} ")))
    }

    /// Heuristic breadth of a cluster's topic, in `[0, 1]`.
    pub fn generality_score(members: &[String]) -> f32 {
        let size = members.len() as f32;
        let size_signal = (size / SIZE_CAP).min(1.0);

        let (avg_words, broad_fraction) = if members.is_empty() {
            (0.0, 0.0)
        } else {
            let words: usize = members
                .iter()
                .map(|m| normalize_keyword(m).split_whitespace().count())
                .sum();
            let broad = members.iter().filter(|m| Self::has_broad_marker(m)).count();
            (words as f32 / size, broad as f32 / size)
        };
        let brevity_signal = 1.0 - (avg_words / WORD_CAP).min(1.0);

        (0.4 * size_signal + 0.4 * brevity_signal + 0.2 * broad_fraction).clamp(0.0, 1.0)
    }

    pub fn build(
        &self,
        clusters: &BTreeMap<ClusterId, Vec<String>>,
        relationships: &ClusterRelationshipMap,
        labels: &BTreeMap<ClusterId, String>,
    ) -> TopicHierarchy {
        let ids: Vec<ClusterId> = clusters
            .keys()
            .copied()
            .filter(|id| *id != NOISE_CLUSTER_ID)
            .collect();
        if ids.is_empty() {
            return TopicHierarchy::default();
        }
        let index: BTreeMap<ClusterId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let n = ids.len();

        let generality: Vec<f32> = ids
            .iter()
            .map(|id| Self::generality_score(clusters.get(id).map(Vec::as_slice).unwrap_or(&[])))
            .collect();

        let mut candidates: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];
        let mut siblings: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

        for (src_id, targets) in relationships {
            let Some(&src) = index.get(src_id) else {
                continue;
            };
            for (dst_id, rel) in targets {
                let Some(&dst) = index.get(dst_id) else {
                    continue;
                };
                let strength = rel.average_strength;
                if src == dst || strength <= self.strength_threshold {
                    continue;
                }

                let diff = generality[dst] - generality[src];
                if diff > self.generality_gap {
                    candidates[src].push((dst, strength));
                } else if diff < -self.generality_gap {
                    candidates[dst].push((src, strength));
                } else if matches!(
                    rel.dominant_type,
                    RelationshipType::Related | RelationshipType::Synonymous
                ) && strength > self.sibling_strength
                {
                    siblings[src].insert(dst);
                    siblings[dst].insert(src);
                }
            }
        }

        let mut parents: Vec<Option<usize>> = candidates
            .iter()
            .map(|options| {
                options
                    .iter()
                    .fold(None::<(usize, f32)>, |best, &(candidate, strength)| match best {
                        Some((b, s)) if s > strength || (s == strength && b <= candidate) => {
                            Some((b, s))
                        }
                        _ => Some((candidate, strength)),
                    })
                    .map(|(p, _)| p)
            })
            .collect();

        let levels = compute_levels(&mut parents);

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (child, parent) in parents.iter().enumerate() {
            if let Some(p) = parent {
                children[*p].push(child);
            }
        }
        let roots: Vec<usize> = (0..n).filter(|&i| parents[i].is_none()).collect();
        let max_depth = levels.iter().copied().max().unwrap_or(0);

        let label_of = |i: usize| {
            labels
                .get(&ids[i])
                .cloned()
                .unwrap_or_else(|| format!("Cluster {}", ids[i]))
        };

        // deepest nodes first, so every subtree exists before its parent
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|a, b| levels[*b].cmp(&levels[*a]).then(a.cmp(b)));
        let mut built: Vec<Option<TopicTree>> = vec![None; n];
        for &v in &order {
            let subtrees = children[v]
                .iter()
                .filter_map(|c| built[*c].take())
                .collect();
            built[v] = Some(TopicTree {
                cluster_id: ids[v],
                label: label_of(v),
                level: levels[v],
                children: subtrees,
            });
        }
        let tree: Vec<TopicTree> = roots.iter().filter_map(|r| built[*r].take()).collect();

        let nodes: BTreeMap<ClusterId, TopicNode> = (0..n)
            .map(|i| {
                (
                    ids[i],
                    TopicNode {
                        cluster_id: ids[i],
                        label: label_of(i),
                        generality_score: generality[i],
                        parent: parents[i].map(|p| ids[p]),
                        children: children[i].iter().map(|c| ids[*c]).collect(),
                        siblings: siblings[i].iter().map(|s| ids[*s]).collect(),
                        level: levels[i],
                    },
                )
            })
            .collect();

        debug!(
            topics = n,
            roots = roots.len(),
            max_depth,
            "Built topic hierarchy"
        );

        TopicHierarchy {
            nodes,
            roots: roots.iter().map(|r| ids[*r]).collect(),
            tree,
            max_depth,
        }
    }
}
