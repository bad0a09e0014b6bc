pub mod hierarchy;
pub mod relationships;

pub use hierarchy::{compute_levels, TopicHierarchyBuilder, BROAD_MARKERS};
pub use relationships::RelationshipMapper;
