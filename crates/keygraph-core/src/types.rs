use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type ClusterId = i32;

/// Reserved id for keywords that could not be confidently grouped.
pub const NOISE_CLUSTER_ID: ClusterId = -1;

/// Label always given to the noise cluster.
pub const NOISE_LABEL: &str = "Miscellaneous";

/// Clustering algorithm requested for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ClusteringMethod {
    /// Density-based (HDBSCAN); yields noise points.
    #[default]
    #[serde(rename = "hdbscan")]
    Hdbscan,
    /// Centroid-based with automatic k.
    #[serde(rename = "kmeans")]
    KMeans,
    /// Hierarchical agglomerative (Ward) with automatic k.
    #[serde(rename = "agglomerative")]
    Agglomerative,
}

impl ClusteringMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusteringMethod::Hdbscan => "hdbscan",
            ClusteringMethod::KMeans => "kmeans",
            ClusteringMethod::Agglomerative => "agglomerative",
        }
    }

    /// Fallback order used when a requested method is unavailable.
    pub fn priority_order() -> [ClusteringMethod; 3] {
        [
            ClusteringMethod::Hdbscan,
            ClusteringMethod::KMeans,
            ClusteringMethod::Agglomerative,
        ]
    }
}

impl fmt::Display for ClusteringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusteringMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hdbscan" | "density" => Ok(ClusteringMethod::Hdbscan),
            "kmeans" | "k-means" | "centroid" => Ok(ClusteringMethod::KMeans),
            "agglomerative" | "hierarchical" => Ok(ClusteringMethod::Agglomerative),
            other => Err(format!(
                "Unknown clustering method: {}. Must be one of: hdbscan, kmeans, agglomerative",
                other
            )),
        }
    }
}

/// Directed semantic relationship between two keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Hierarchical,
    Synonymous,
    Related,
    TopicallyRelated,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Hierarchical => "hierarchical",
            RelationshipType::Synonymous => "synonymous",
            RelationshipType::Related => "related",
            RelationshipType::TopicallyRelated => "topically_related",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relationship_type: RelationshipType,
    /// `1 - distance`, clamped to `[0, 1]`.
    pub strength: f32,
    pub distance: f32,
    pub source_cluster: ClusterId,
    pub target_cluster: ClusterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRelationship {
    pub source_cluster: ClusterId,
    pub target_cluster: ClusterId,
    pub dominant_type: RelationshipType,
    pub average_strength: f32,
    pub evidence_count: usize,
    /// Up to three target keywords backing the relationship.
    pub example_keywords: Vec<String>,
}

/// Source cluster -> target cluster -> aggregated relationship.
pub type ClusterRelationshipMap = BTreeMap<ClusterId, BTreeMap<ClusterId, ClusterRelationship>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSpoke {
    pub hub: String,
    pub spokes: Vec<String>,
    /// `|spokes| / (size - 1)`; zero for single-member clusters.
    pub coverage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicNode {
    pub cluster_id: ClusterId,
    pub label: String,
    pub generality_score: f32,
    pub parent: Option<ClusterId>,
    pub children: Vec<ClusterId>,
    pub siblings: Vec<ClusterId>,
    pub level: usize,
}

/// Nested view of the hierarchy rooted at a single topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicTree {
    pub cluster_id: ClusterId,
    pub label: String,
    pub level: usize,
    pub children: Vec<TopicTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TopicHierarchy {
    pub nodes: BTreeMap<ClusterId, TopicNode>,
    pub roots: Vec<ClusterId>,
    pub tree: Vec<TopicTree>,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAssessment {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityAssessment {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.8 {
            QualityAssessment::Excellent
        } else if score >= 0.6 {
            QualityAssessment::Good
        } else if score >= 0.4 {
            QualityAssessment::Fair
        } else {
            QualityAssessment::Poor
        }
    }
}

impl fmt::Display for QualityAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityAssessment::Excellent => "excellent",
            QualityAssessment::Good => "good",
            QualityAssessment::Fair => "fair",
            QualityAssessment::Poor => "poor",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Silhouette-style cohesion over non-noise points, in `[-1, 1]`.
    pub silhouette: f32,
    pub inertia: f64,
    pub stability: BTreeMap<ClusterId, f32>,
    pub quality: BTreeMap<ClusterId, f32>,
    pub overall_score: f32,
    pub assessment: QualityAssessment,
    pub recommendations: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            silhouette: 0.0,
            inertia: 0.0,
            stability: BTreeMap::new(),
            quality: BTreeMap::new(),
            overall_score: 0.0,
            assessment: QualityAssessment::Poor,
            recommendations: Vec::new(),
        }
    }
}

/// Flattened per-cluster view used by persistence adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub label: String,
    pub keywords: Vec<String>,
    pub hub: Option<String>,
    pub spokes: Vec<String>,
    pub coverage: f32,
}

impl Cluster {
    pub fn is_noise(&self) -> bool {
        self.id == NOISE_CLUSTER_ID
    }
}

/// Everything produced by one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringResult {
    pub method: ClusteringMethod,
    pub clusters: BTreeMap<ClusterId, Vec<String>>,
    pub labels: BTreeMap<ClusterId, String>,
    pub hub_spoke: BTreeMap<ClusterId, HubSpoke>,
    pub keyword_relationships: BTreeMap<String, Vec<Relationship>>,
    pub cluster_relationships: ClusterRelationshipMap,
    pub hierarchy: TopicHierarchy,
    pub validation: ValidationReport,
    pub noise_keywords: Vec<String>,
    pub assignments: BTreeMap<String, ClusterId>,
}

impl ClusteringResult {
    pub fn empty(method: ClusteringMethod) -> Self {
        Self {
            method,
            clusters: BTreeMap::new(),
            labels: BTreeMap::new(),
            hub_spoke: BTreeMap::new(),
            keyword_relationships: BTreeMap::new(),
            cluster_relationships: BTreeMap::new(),
            hierarchy: TopicHierarchy::default(),
            validation: ValidationReport::default(),
            noise_keywords: Vec::new(),
            assignments: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Number of clusters excluding noise.
    pub fn cluster_count(&self) -> usize {
        self.clusters
            .keys()
            .filter(|id| **id != NOISE_CLUSTER_ID)
            .count()
    }

    pub fn cluster_summaries(&self) -> Vec<Cluster> {
        self.clusters
            .iter()
            .map(|(id, keywords)| {
                let hub_spoke = self.hub_spoke.get(id);
                Cluster {
                    id: *id,
                    label: self
                        .labels
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| NOISE_LABEL.to_string()),
                    keywords: keywords.clone(),
                    hub: hub_spoke.map(|hs| hs.hub.clone()),
                    spokes: hub_spoke.map(|hs| hs.spokes.clone()).unwrap_or_default(),
                    coverage: hub_spoke.map(|hs| hs.coverage).unwrap_or(0.0),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_serde_names() {
        assert_eq!(
            serde_json::to_string(&ClusteringMethod::KMeans).unwrap(),
            "\"kmeans\""
        );
        assert_eq!(
            "Hierarchical".parse::<ClusteringMethod>().unwrap(),
            ClusteringMethod::Agglomerative
        );
        assert!("spectral".parse::<ClusteringMethod>().is_err());
    }

    #[test]
    fn test_relationship_type_serde_names() {
        assert_eq!(
            serde_json::to_string(&RelationshipType::TopicallyRelated).unwrap(),
            "\"topically_related\""
        );
    }

    #[test]
    fn test_assessment_buckets() {
        assert_eq!(QualityAssessment::from_score(0.85), QualityAssessment::Excellent);
        assert_eq!(QualityAssessment::from_score(0.6), QualityAssessment::Good);
        assert_eq!(QualityAssessment::from_score(0.45), QualityAssessment::Fair);
        assert_eq!(QualityAssessment::from_score(0.1), QualityAssessment::Poor);
    }

    #[test]
    fn test_empty_result_serializes() {
        let result = ClusteringResult::empty(ClusteringMethod::Hdbscan);
        let json = serde_json::to_string(&result).unwrap();
        let back: ClusteringResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.cluster_count(), 0);
    }
}
