//! Maps integer cluster ids from a run onto durable, slug-keyed cluster records.

use std::collections::{BTreeMap, HashSet};

use keygraph_core::text::slugify;
use keygraph_core::{ClusterId, ClusteringError, ClusteringResult, NOISE_CLUSTER_ID, NOISE_LABEL};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No open transaction")]
    NoTransaction,

    #[error("Transaction already open")]
    TransactionOpen,

    #[error("Keyword rejected: {0}")]
    KeywordRejected(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for ClusteringError {
    fn from(err: StoreError) -> Self {
        ClusteringError::Persistence(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Hub,
    Spoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub slug: String,
    pub cluster_type: ClusterType,
}

impl ClusterRecord {
    pub fn new(project_id: Uuid, name: &str, slug: String, cluster_type: ClusterType) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            slug,
            cluster_type,
        }
    }
}

/// Transactional store owning projects, keywords and clusters.
///
/// Reads inside an open transaction must see that transaction's own writes.
pub trait ClusterStore {
    fn begin(&mut self) -> StoreResult<()>;

    fn find_cluster_by_slug(&self, project_id: Uuid, slug: &str)
        -> StoreResult<Option<ClusterRecord>>;

    fn create_cluster(&mut self, record: ClusterRecord) -> StoreResult<ClusterRecord>;

    /// Point a project keyword at a cluster, replacing any earlier assignment.
    fn assign_keyword(&mut self, project_id: Uuid, keyword: &str, cluster_id: Uuid)
        -> StoreResult<()>;

    fn commit(&mut self) -> StoreResult<()>;

    fn rollback(&mut self) -> StoreResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistReport {
    pub clusters_created: usize,
    pub clusters_reused: usize,
    pub keywords_assigned: usize,
    pub failed_keywords: Vec<String>,
    /// Run-local cluster id to durable record id.
    pub cluster_ids: BTreeMap<ClusterId, Uuid>,
}

pub struct ClusterPersister<S> {
    store: S,
}

impl<S: ClusterStore> ClusterPersister<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Write one run's clusters and assignments as a single batch.
    ///
    /// A keyword that cannot be assigned is skipped and reported. Any
    /// cluster-level or commit failure rolls the whole batch back.
    pub fn persist(
        &mut self,
        project_id: Uuid,
        result: &ClusteringResult,
    ) -> Result<PersistReport, ClusteringError> {
        self.store.begin()?;
        match self.write_batch(project_id, result) {
            Ok(report) => match self.store.commit() {
                Ok(()) => {
                    info!(
                        project = %project_id,
                        created = report.clusters_created,
                        reused = report.clusters_reused,
                        assigned = report.keywords_assigned,
                        failed = report.failed_keywords.len(),
                        "Persisted clustering result"
                    );
                    Ok(report)
                }
                Err(e) => Err(self.abort(e)),
            },
            Err(e) => Err(self.abort(e)),
        }
    }

    fn write_batch(&mut self, project_id: Uuid, result: &ClusteringResult) -> StoreResult<PersistReport> {
        let mut report = PersistReport::default();
        let mut taken: HashSet<String> = HashSet::new();

        for (cluster, keywords) in &result.clusters {
            let (name, cluster_type) = if *cluster == NOISE_CLUSTER_ID {
                (NOISE_LABEL.to_string(), ClusterType::Spoke)
            } else {
                let label = result
                    .labels
                    .get(cluster)
                    .cloned()
                    .unwrap_or_else(|| format!("Cluster {cluster}"));
                (label, ClusterType::Hub)
            };
            let mut slug = slugify(&name);
            if slug.is_empty() {
                slug = format!("cluster-{cluster}");
            }
            // clusters sharing a label in one run keep separate records
            if !taken.insert(slug.clone()) {
                slug = format!("{slug}-{cluster}");
                taken.insert(slug.clone());
            }

            let record = match self.store.find_cluster_by_slug(project_id, &slug)? {
                Some(existing) => {
                    debug!(slug = %slug, id = %existing.id, "Reusing existing cluster");
                    report.clusters_reused += 1;
                    existing
                }
                None => {
                    let created = self.store.create_cluster(ClusterRecord::new(
                        project_id,
                        &name,
                        slug,
                        cluster_type,
                    ))?;
                    report.clusters_created += 1;
                    created
                }
            };
            report.cluster_ids.insert(*cluster, record.id);

            for keyword in keywords {
                match self.store.assign_keyword(project_id, keyword, record.id) {
                    Ok(()) => report.keywords_assigned += 1,
                    Err(e) => {
                        warn!(keyword = %keyword, error = %e, "Skipping keyword that failed to persist");
                        report.failed_keywords.push(keyword.clone());
                    }
                }
            }
        }
        Ok(report)
    }

    fn abort(&mut self, cause: StoreError) -> ClusteringError {
        if let Err(e) = self.store.rollback() {
            warn!(error = %e, "Rollback failed");
        }
        warn!(error = %cause, "Persistence batch rolled back");
        ClusteringError::from(cause)
    }
}

#[derive(Debug, Default, Clone)]
struct Staged {
    clusters: Vec<ClusterRecord>,
    assignments: Vec<(Uuid, String, Uuid)>,
}

/// Reference store keeping everything in memory with staged writes.
#[derive(Debug, Default)]
pub struct InMemoryClusterStore {
    clusters: Vec<ClusterRecord>,
    assignments: BTreeMap<(Uuid, String), Uuid>,
    staged: Option<Staged>,
    failing_keywords: HashSet<String>,
    fail_commit: bool,
}

impl InMemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject assignments of this keyword.
    pub fn with_failing_keyword(mut self, keyword: &str) -> Self {
        self.failing_keywords.insert(keyword.to_string());
        self
    }

    /// Make the next commits fail.
    pub fn with_failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn clusters(&self) -> &[ClusterRecord] {
        &self.clusters
    }

    pub fn cluster_of(&self, project_id: Uuid, keyword: &str) -> Option<Uuid> {
        self.assignments
            .get(&(project_id, keyword.to_string()))
            .copied()
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    fn staged_mut(&mut self) -> StoreResult<&mut Staged> {
        self.staged.as_mut().ok_or(StoreError::NoTransaction)
    }
}

impl ClusterStore for InMemoryClusterStore {
    fn begin(&mut self) -> StoreResult<()> {
        if self.staged.is_some() {
            return Err(StoreError::TransactionOpen);
        }
        self.staged = Some(Staged::default());
        Ok(())
    }

    fn find_cluster_by_slug(
        &self,
        project_id: Uuid,
        slug: &str,
    ) -> StoreResult<Option<ClusterRecord>> {
        let staged = self.staged.iter().flat_map(|s| s.clusters.iter());
        Ok(self
            .clusters
            .iter()
            .chain(staged)
            .find(|c| c.project_id == project_id && c.slug == slug)
            .cloned())
    }

    fn create_cluster(&mut self, record: ClusterRecord) -> StoreResult<ClusterRecord> {
        self.staged_mut()?.clusters.push(record.clone());
        Ok(record)
    }

    fn assign_keyword(
        &mut self,
        project_id: Uuid,
        keyword: &str,
        cluster_id: Uuid,
    ) -> StoreResult<()> {
        if self.failing_keywords.contains(keyword) {
            return Err(StoreError::KeywordRejected(keyword.to_string()));
        }
        self.staged_mut()?
            .assignments
            .push((project_id, keyword.to_string(), cluster_id));
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.staged.is_none() {
            return Err(StoreError::NoTransaction);
        }
        if self.fail_commit {
            return Err(StoreError::Backend("commit failed".to_string()));
        }
        if let Some(staged) = self.staged.take() {
            self.clusters.extend(staged.clusters);
            for (project, keyword, cluster) in staged.assignments {
                self.assignments.insert((project, keyword), cluster);
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.staged.take().map(|_| ()).ok_or(StoreError::NoTransaction)
    }
}
