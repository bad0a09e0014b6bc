use std::collections::BTreeMap;

use keygraph_core::{ClusterId, RelationshipType};
use keygraph_graph::{RelationshipMapper, TopicHierarchyBuilder};
use ndarray::array;

fn tagged(pairs: &[(&str, ClusterId)]) -> (Vec<String>, BTreeMap<String, ClusterId>) {
    let keywords = pairs.iter().map(|(k, _)| k.to_string()).collect();
    let cluster_of = pairs.iter().map(|(k, c)| (k.to_string(), *c)).collect();
    (keywords, cluster_of)
}

#[test]
fn test_relationships_flow_into_hierarchy() {
    let (keywords, cluster_of) = tagged(&[
        ("plumbing", 0),
        ("plumbing guide", 0),
        ("plumber", 0),
        ("emergency burst pipe repair", 1),
        ("kitchen sink leak repair", 1),
    ]);
    // cluster 1 points lean towards cluster 0's direction
    let embeddings = array![
        [1.0f32, 0.0, 0.0],
        [0.98, 0.2, 0.0],
        [0.97, 0.0, 0.24],
        [0.8, 0.6, 0.0],
        [0.8, 0.0, 0.6],
    ];

    let mapper = RelationshipMapper::default();
    let rels = mapper
        .map_relationships(&keywords, embeddings.view(), &cluster_of)
        .unwrap();

    // every edge appears in both directions
    let total: usize = rels.values().map(Vec::len).sum();
    assert_eq!(total % 2, 0);
    for (keyword, edges) in &rels {
        for edge in edges {
            assert_eq!(&edge.source, keyword);
            assert!(rels[&edge.target].iter().any(|back| &back.target == keyword));
        }
    }
    assert!(rels["plumbing"]
        .iter()
        .any(|e| e.target == "plumbing guide" && e.relationship_type == RelationshipType::Hierarchical));

    let aggregated = RelationshipMapper::aggregate(&rels, &cluster_of);
    let forward = &aggregated[&1][&0];
    let backward = &aggregated[&0][&1];
    assert_eq!(forward.evidence_count, backward.evidence_count);
    assert!(forward.average_strength > 0.6);
    assert!(forward.example_keywords.len() <= 3);

    let clusters: BTreeMap<ClusterId, Vec<String>> = BTreeMap::from([
        (0, keywords[..3].to_vec()),
        (1, keywords[3..].to_vec()),
    ]);
    let labels = BTreeMap::from([(0, "Plumbing".to_string()), (1, "Repair".to_string())]);
    let hierarchy = TopicHierarchyBuilder::new().build(&clusters, &aggregated, &labels);

    assert_eq!(hierarchy.nodes[&1].parent, Some(0));
    assert_eq!(hierarchy.roots, vec![0]);
    assert_eq!(hierarchy.max_depth, 1);
    for node in hierarchy.nodes.values() {
        assert!((0.0..=1.0).contains(&node.generality_score));
    }
}

#[test]
fn test_unrelated_keywords_have_empty_entries() {
    let (keywords, cluster_of) = tagged(&[("alpha", 0), ("beta", 1)]);
    let embeddings = array![[1.0f32, 0.0], [0.0, 1.0]];
    let rels = RelationshipMapper::new(0.6)
        .map_relationships(&keywords, embeddings.view(), &cluster_of)
        .unwrap();

    assert_eq!(rels.len(), 2);
    assert!(rels.values().all(Vec::is_empty));
    assert!(RelationshipMapper::aggregate(&rels, &cluster_of).is_empty());
}
