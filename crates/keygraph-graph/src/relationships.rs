//! Pairwise keyword relationships and their cluster-level aggregation.

use std::collections::{BTreeMap, BTreeSet};

use keygraph_core::text::{normalize_keyword, tokenize};
use keygraph_core::{
    ClusterId, ClusterRelationship, ClusterRelationshipMap, ClusteringConfig, ClusteringError,
    Relationship, RelationshipType, Result, NOISE_CLUSTER_ID,
};
use keygraph_vector::cosine_similarity_matrix;
use ndarray::ArrayView2;
use tracing::debug;

const OVERLAP_SYNONYM: f32 = 0.8;
const OVERLAP_RELATED: f32 = 0.5;
const MAX_EXAMPLES: usize = 3;

/// Infers typed, weighted relationships between keywords.
#[derive(Debug, Clone)]
pub struct RelationshipMapper {
    similarity_threshold: f32,
}

impl Default for RelationshipMapper {
    fn default() -> Self {
        Self::new(0.6)
    }
}

impl RelationshipMapper {
    pub fn new(similarity_threshold: f32) -> Self {
        Self {
            similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self::new(config.similarity_threshold)
    }

    /// Largest cosine distance still considered for a relationship.
    pub fn max_distance(&self) -> f32 {
        1.0 - self.similarity_threshold
    }

    /// Jaccard overlap of the two keywords' word sets.
    pub fn word_overlap(a: &str, b: &str) -> f32 {
        let left: BTreeSet<String> = tokenize(a).into_iter().collect();
        let right: BTreeSet<String> = tokenize(b).into_iter().collect();
        let union = left.union(&right).count();
        if union == 0 {
            return 0.0;
        }
        left.intersection(&right).count() as f32 / union as f32
    }

    /// Relationship type for a pair, or `None` when the pair is too far apart.
    ///
    /// Lexical evidence wins over distance: containment first, then word
    /// overlap, then distance buckets.
    pub fn classify(a: &str, b: &str, distance: f32) -> Option<RelationshipType> {
        let left = normalize_keyword(a);
        let right = normalize_keyword(b);

        if !left.is_empty() && !right.is_empty() && (left.contains(&right) || right.contains(&left))
        {
            return Some(RelationshipType::Hierarchical);
        }

        let overlap = Self::word_overlap(&left, &right);
        if overlap > OVERLAP_SYNONYM {
            return Some(RelationshipType::Synonymous);
        }
        if overlap > OVERLAP_RELATED {
            return Some(RelationshipType::Related);
        }

        if distance < 0.2 {
            Some(RelationshipType::Synonymous)
        } else if distance < 0.4 {
            Some(RelationshipType::Related)
        } else if distance < 0.6 {
            Some(RelationshipType::TopicallyRelated)
        } else {
            None
        }
    }

    /// Relationships for every keyword, recorded in both directions.
    ///
    /// Every keyword gets an entry, possibly empty. Cluster tags come from
    /// `cluster_of`; keywords missing from it are tagged as noise.
    pub fn map_relationships(
        &self,
        keywords: &[String],
        embeddings: ArrayView2<'_, f32>,
        cluster_of: &BTreeMap<String, ClusterId>,
    ) -> Result<BTreeMap<String, Vec<Relationship>>> {
        let n = keywords.len();
        if embeddings.nrows() != n {
            return Err(ClusteringError::InvalidInput(format!(
                "{} keywords but {} embedding rows",
                n,
                embeddings.nrows()
            )));
        }

        let mut relationships: BTreeMap<String, Vec<Relationship>> = keywords
            .iter()
            .map(|k| (k.clone(), Vec::new()))
            .collect();
        if n < 2 {
            return Ok(relationships);
        }

        let sims = cosine_similarity_matrix(embeddings);
        let max_distance = self.max_distance();
        let tag = |k: &String| cluster_of.get(k).copied().unwrap_or(NOISE_CLUSTER_ID);

        let mut edges = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                let distance = (1.0 - sims[[i, j]]).clamp(0.0, 2.0);
                if distance > max_distance {
                    continue;
                }
                let Some(relationship_type) = Self::classify(&keywords[i], &keywords[j], distance)
                else {
                    continue;
                };
                let strength = (1.0 - distance).clamp(0.0, 1.0);
                let (ci, cj) = (tag(&keywords[i]), tag(&keywords[j]));

                for (src, dst, src_cluster, dst_cluster) in
                    [(i, j, ci, cj), (j, i, cj, ci)]
                {
                    if let Some(list) = relationships.get_mut(&keywords[src]) {
                        list.push(Relationship {
                            source: keywords[src].clone(),
                            target: keywords[dst].clone(),
                            relationship_type,
                            strength,
                            distance,
                            source_cluster: src_cluster,
                            target_cluster: dst_cluster,
                        });
                    }
                }
                edges += 1;
            }
        }

        debug!(keywords = n, edges, max_distance, "Mapped keyword relationships");
        Ok(relationships)
    }

    /// Summarise keyword edges per ordered `(source, target)` cluster pair.
    pub fn aggregate(
        relationships: &BTreeMap<String, Vec<Relationship>>,
        cluster_of: &BTreeMap<String, ClusterId>,
    ) -> ClusterRelationshipMap {
        #[derive(Default)]
        struct Accumulator {
            strength_sum: f32,
            count: usize,
            type_counts: BTreeMap<RelationshipType, usize>,
            examples: Vec<String>,
        }

        let mut groups: BTreeMap<(ClusterId, ClusterId), Accumulator> = BTreeMap::new();
        for edge in relationships.values().flatten() {
            let src = cluster_of
                .get(&edge.source)
                .copied()
                .unwrap_or(edge.source_cluster);
            let dst = cluster_of
                .get(&edge.target)
                .copied()
                .unwrap_or(edge.target_cluster);
            if src == dst {
                continue;
            }

            let acc = groups.entry((src, dst)).or_default();
            acc.strength_sum += edge.strength;
            acc.count += 1;
            *acc.type_counts.entry(edge.relationship_type).or_insert(0) += 1;
            if acc.examples.len() < MAX_EXAMPLES && !acc.examples.contains(&edge.target) {
                acc.examples.push(edge.target.clone());
            }
        }

        let mut map: ClusterRelationshipMap = BTreeMap::new();
        for ((src, dst), acc) in groups {
            // BTreeMap iterates in enum order, so ties keep the earlier type
            let mut dominant = RelationshipType::TopicallyRelated;
            let mut best = 0usize;
            for (kind, count) in &acc.type_counts {
                if *count > best {
                    best = *count;
                    dominant = *kind;
                }
            }

            map.entry(src).or_default().insert(
                dst,
                ClusterRelationship {
                    source_cluster: src,
                    target_cluster: dst,
                    dominant_type: dominant,
                    average_strength: acc.strength_sum / acc.count as f32,
                    evidence_count: acc.count,
                    example_keywords: acc.examples,
                },
            );
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn kw(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classification_priority() {
        assert_eq!(
            RelationshipMapper::classify("plumber", "emergency plumber", 0.5),
            Some(RelationshipType::Hierarchical)
        );
        assert_eq!(
            RelationshipMapper::classify("repair pipe", "pipe repair", 0.55),
            Some(RelationshipType::Synonymous)
        );
        // 3 shared of 5 distinct words
        assert_eq!(
            RelationshipMapper::classify("fast pipe leak repair", "cheap pipe leak repair", 0.55),
            Some(RelationshipType::Related)
        );
        assert_eq!(
            RelationshipMapper::classify("sofa", "couch", 0.1),
            Some(RelationshipType::Synonymous)
        );
        assert_eq!(
            RelationshipMapper::classify("sofa", "armchair", 0.3),
            Some(RelationshipType::Related)
        );
        assert_eq!(
            RelationshipMapper::classify("sofa", "lamp", 0.5),
            Some(RelationshipType::TopicallyRelated)
        );
        assert_eq!(RelationshipMapper::classify("sofa", "lamp", 0.7), None);
    }

    #[test]
    fn test_containment_ignores_case_and_punctuation() {
        assert_eq!(
            RelationshipMapper::classify("24/7 Plumber", "247 plumber near me", 0.9),
            Some(RelationshipType::Hierarchical)
        );
    }

    #[test]
    fn test_symmetric_edges_with_cluster_tags() {
        let keywords = kw(&["sofa", "couch", "lamp"]);
        let embeddings = array![[1.0f32, 0.0], [0.95, 0.31], [0.0, 1.0]];
        let cluster_of: BTreeMap<String, ClusterId> =
            [("sofa", 0), ("couch", 1), ("lamp", 1)]
                .iter()
                .map(|(k, c)| (k.to_string(), *c))
                .collect();

        let mapper = RelationshipMapper::default();
        let rels = mapper
            .map_relationships(&keywords, embeddings.view(), &cluster_of)
            .unwrap();

        assert_eq!(rels.len(), 3);
        assert_eq!(rels["sofa"].len(), 1);
        assert_eq!(rels["couch"].len(), 1);
        assert!(rels["lamp"].is_empty());

        let forward = &rels["sofa"][0];
        let backward = &rels["couch"][0];
        assert_eq!(forward.target, "couch");
        assert_eq!(backward.target, "sofa");
        assert_eq!(forward.relationship_type, RelationshipType::Synonymous);
        assert_eq!(forward.source_cluster, 0);
        assert_eq!(forward.target_cluster, 1);
        assert_relative_eq!(forward.strength, backward.strength);
        assert_relative_eq!(forward.strength, 1.0 - forward.distance, epsilon = 1e-6);
    }

    #[test]
    fn test_row_mismatch_is_rejected() {
        let mapper = RelationshipMapper::default();
        let embeddings = array![[1.0f32, 0.0]];
        let result = mapper.map_relationships(&kw(&["a", "b"]), embeddings.view(), &BTreeMap::new());
        assert!(matches!(result, Err(ClusteringError::InvalidInput(_))));
    }

    fn edge(source: &str, target: &str, kind: RelationshipType, strength: f32) -> Relationship {
        Relationship {
            source: source.to_string(),
            target: target.to_string(),
            relationship_type: kind,
            strength,
            distance: 1.0 - strength,
            source_cluster: NOISE_CLUSTER_ID,
            target_cluster: NOISE_CLUSTER_ID,
        }
    }

    #[test]
    fn test_aggregate_counts_and_dominant_type() {
        let cluster_of: BTreeMap<String, ClusterId> = [
            ("a1", 0),
            ("a2", 0),
            ("b1", 1),
            ("b2", 1),
        ]
        .iter()
        .map(|(k, c)| (k.to_string(), *c))
        .collect();

        let mut rels: BTreeMap<String, Vec<Relationship>> = BTreeMap::new();
        rels.insert(
            "a1".into(),
            vec![
                edge("a1", "b1", RelationshipType::Related, 0.8),
                edge("a1", "b2", RelationshipType::Synonymous, 0.9),
                edge("a1", "a2", RelationshipType::Synonymous, 0.95),
            ],
        );
        rels.insert(
            "a2".into(),
            vec![edge("a2", "b1", RelationshipType::Related, 0.7)],
        );

        let map = RelationshipMapper::aggregate(&rels, &cluster_of);
        assert!(map[&0].get(&0).is_none());

        let summary = &map[&0][&1];
        assert_eq!(summary.evidence_count, 3);
        assert_eq!(summary.dominant_type, RelationshipType::Related);
        assert_relative_eq!(summary.average_strength, 0.8, epsilon = 1e-6);
        assert_eq!(summary.example_keywords, vec!["b1", "b2"]);
    }

    #[test]
    fn test_aggregate_tie_prefers_enum_order() {
        let cluster_of: BTreeMap<String, ClusterId> =
            [("x", 0), ("y", 1), ("z", 1)]
                .iter()
                .map(|(k, c)| (k.to_string(), *c))
                .collect();
        let mut rels = BTreeMap::new();
        rels.insert(
            "x".to_string(),
            vec![
                edge("x", "y", RelationshipType::TopicallyRelated, 0.5),
                edge("x", "z", RelationshipType::Hierarchical, 0.7),
            ],
        );
        let map = RelationshipMapper::aggregate(&rels, &cluster_of);
        assert_eq!(map[&0][&1].dominant_type, RelationshipType::Hierarchical);
    }
}
