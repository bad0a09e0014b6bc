use keygraph_core::{ClusteringMethod, ConfigError, ConfigManager, KeyGraphConfig};
use tempfile::TempDir;

#[test]
fn test_create_and_load_default_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    ConfigManager::create_default_config(&path).unwrap();
    assert!(path.exists());

    let manager = ConfigManager::load_from(&path).unwrap();
    assert_eq!(manager.config_path(), Some(path.as_path()));
    assert_eq!(
        manager.config().clustering,
        KeyGraphConfig::default().clustering
    );
}

#[test]
fn test_load_custom_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keygraph.toml");
    std::fs::write(
        &path,
        r#"
[clustering]
min_cluster_size = 4
hub_threshold = 0.65
default_method = "agglomerative"

[embedding]
provider = "tfidf"
"#,
    )
    .unwrap();

    let config = ConfigManager::load_from(&path).unwrap().into_config();
    assert_eq!(config.clustering.min_cluster_size, 4);
    assert_eq!(config.clustering.hub_threshold, 0.65);
    assert_eq!(
        config.clustering.default_method,
        ClusteringMethod::Agglomerative
    );
    assert_eq!(config.embedding.provider, "tfidf");
}

#[test]
fn test_missing_and_invalid_config() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        ConfigManager::load_from(&missing),
        Err(ConfigError::NotFound(_))
    ));

    let invalid = dir.path().join("invalid.toml");
    std::fs::write(&invalid, "[clustering]\nmin_cluster_size = \"three\"\n").unwrap();
    assert!(matches!(
        ConfigManager::load_from(&invalid),
        Err(ConfigError::ParseError(_))
    ));

    let out_of_range = dir.path().join("range.toml");
    std::fs::write(&out_of_range, "[clustering]\nsimilarity_threshold = 2.0\n").unwrap();
    assert!(matches!(
        ConfigManager::load_from(&out_of_range),
        Err(ConfigError::ValidationError(_))
    ));
}
