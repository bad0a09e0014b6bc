use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use keygraph_core::{
    ClusterId, ClusteringConfig, ClusteringError, ClusteringMethod, ClusteringResult, Result,
    NOISE_CLUSTER_ID,
};
use keygraph_graph::{RelationshipMapper, TopicHierarchyBuilder};
use keygraph_vector::EmbeddingService;
use ndarray::Array2;
use tracing::{debug, info, instrument};

use crate::engine::ClusterEngine;
use crate::hub_spoke::HubSpokeAnalyzer;
use crate::labeler::ClusterLabeler;
use crate::validation::StatisticalValidator;

/// Runs the full pipeline: embed, cluster, label, hub-spoke, relationships,
/// hierarchy and validation.
pub struct ClusterManager {
    config: ClusteringConfig,
    engine: ClusterEngine,
    labeler: ClusterLabeler,
    hub_spoke: HubSpokeAnalyzer,
    relationships: RelationshipMapper,
    hierarchy: TopicHierarchyBuilder,
    validator: StatisticalValidator,
}

impl ClusterManager {
    pub fn new(config: ClusteringConfig, embedding: Arc<EmbeddingService>) -> Self {
        let engine = ClusterEngine::new(&config, embedding);
        Self::with_engine(config, engine)
    }

    /// Manager around a pre-built engine, e.g. one with custom algorithms.
    pub fn with_engine(config: ClusteringConfig, engine: ClusterEngine) -> Self {
        Self {
            labeler: ClusterLabeler::from_config(&config),
            hub_spoke: HubSpokeAnalyzer::from_config(&config),
            relationships: RelationshipMapper::from_config(&config),
            hierarchy: TopicHierarchyBuilder::new(),
            validator: StatisticalValidator::from_config(&config),
            engine,
            config,
        }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Run with the configured default method.
    pub fn run_default(&self, keywords: &[String]) -> Result<ClusteringResult> {
        self.run(keywords, self.config.default_method)
    }

    #[instrument(skip(self, keywords), fields(keywords = keywords.len()))]
    pub fn run(&self, keywords: &[String], method: ClusteringMethod) -> Result<ClusteringResult> {
        let keywords = dedupe(keywords);
        if keywords.is_empty() {
            info!("No keywords to cluster");
            return Ok(ClusteringResult::empty(method));
        }
        let n = keywords.len();
        let started = Instant::now();

        let t = Instant::now();
        let output = self
            .engine
            .cluster_detailed(&keywords, method)
            .map_err(|e| ClusteringError::in_stage("clustering", e))?;
        let embeddings = if output.embeddings.nrows() == n {
            output.embeddings
        } else {
            Array2::zeros((n, 0))
        };
        info!(
            method = %output.method,
            elapsed_ms = t.elapsed().as_millis() as u64,
            "Clustering stage complete"
        );

        let assignments: BTreeMap<String, ClusterId> = keywords
            .iter()
            .cloned()
            .zip(output.labels.iter().copied())
            .collect();
        let member_rows = crate::metrics::members_by_cluster(&output.labels);
        let clusters: BTreeMap<ClusterId, Vec<String>> = member_rows
            .iter()
            .map(|(id, rows)| (*id, rows.iter().map(|r| keywords[*r].clone()).collect()))
            .collect();
        let noise_keywords = clusters.get(&NOISE_CLUSTER_ID).cloned().unwrap_or_default();

        let t = Instant::now();
        let labels = self.labeler.label(&clusters);
        debug!(elapsed_ms = t.elapsed().as_millis() as u64, "Labeling stage complete");

        let t = Instant::now();
        let hub_spoke = self
            .hub_spoke
            .analyze(&keywords, embeddings.view(), &member_rows)
            .map_err(|e| ClusteringError::in_stage("hub_spoke", e))?;
        debug!(elapsed_ms = t.elapsed().as_millis() as u64, "Hub-spoke stage complete");

        let t = Instant::now();
        let keyword_relationships = self
            .relationships
            .map_relationships(&keywords, embeddings.view(), &assignments)
            .map_err(|e| ClusteringError::in_stage("relationships", e))?;
        let cluster_relationships =
            RelationshipMapper::aggregate(&keyword_relationships, &assignments);
        info!(
            cluster_pairs = cluster_relationships.values().map(|m| m.len()).sum::<usize>(),
            elapsed_ms = t.elapsed().as_millis() as u64,
            "Relationship stage complete"
        );

        let t = Instant::now();
        let hierarchy = self
            .hierarchy
            .build(&clusters, &cluster_relationships, &labels);
        debug!(
            roots = hierarchy.roots.len(),
            max_depth = hierarchy.max_depth,
            elapsed_ms = t.elapsed().as_millis() as u64,
            "Hierarchy stage complete"
        );

        let t = Instant::now();
        let validation = self
            .validator
            .validate(&keywords, embeddings.view(), &output.labels)
            .map_err(|e| ClusteringError::in_stage("validation", e))?;
        debug!(elapsed_ms = t.elapsed().as_millis() as u64, "Validation stage complete");

        let result = ClusteringResult {
            method: output.method,
            clusters,
            labels,
            hub_spoke,
            keyword_relationships,
            cluster_relationships,
            hierarchy,
            validation,
            noise_keywords,
            assignments,
        };
        info!(
            clusters = result.cluster_count(),
            noise = result.noise_keywords.len(),
            overall_score = result.validation.overall_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Clustering pipeline complete"
        );
        Ok(result)
    }
}

/// Drop repeated keywords, keeping the first occurrence.
fn dedupe(keywords: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .iter()
        .filter(|k| seen.insert(k.as_str()))
        .cloned()
        .collect()
}
