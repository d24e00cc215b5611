//! Layered configuration loading: files, environment and overrides

use shardcache::config::{BackendKind, ConfigLoader, MutationPolicy, CONFIG_PATH_ENV};
use shardcache::{CacheConfig, CacheError};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("temp config should be writable");
    path
}

/// A loader that only sees environment variables under `prefix`
fn isolated(prefix: &str) -> ConfigLoader {
    ConfigLoader::new().with_env_prefix(prefix)
}

#[test]
fn test_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "shardcache.toml",
        r#"
backend = "cluster"
mutation_policy = "fail_fast"

[redis]
address = "10.0.0.1:7000"
password = "s3cret"
connect_timeout_ms = 250

[scan]
default_count = 500
max_iterations = 10000
operation_timeout_ms = 2000
fanout_concurrency = 4
"#,
    );

    let config = isolated("SHARDCACHE_IT_TOML").with_file(&path).load().unwrap();
    assert_eq!(config.backend, BackendKind::Cluster);
    assert_eq!(config.mutation_policy, MutationPolicy::FailFast);
    assert_eq!(config.redis.address, "10.0.0.1:7000");
    assert_eq!(config.redis.password.as_deref(), Some("s3cret"));
    assert_eq!(config.redis.connect_timeout_ms, 250);
    assert_eq!(config.scan.default_count, 500);
    assert_eq!(config.scan.max_iterations, 10_000);
    assert_eq!(config.scan.fanout_concurrency, 4);
    // untouched fields keep their defaults
    assert_eq!(config.scan.channel_capacity, 64);
    assert_eq!(config.redis.database, 0);
}

#[test]
fn test_yaml_file_with_backend_alias() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "shardcache.yaml",
        "backend: single\nredis:\n  address: cache.internal:6380\n  database: 3\n",
    );

    let config = isolated("SHARDCACHE_IT_YAML").with_file(&path).load().unwrap();
    assert_eq!(config.backend, BackendKind::Standalone);
    assert_eq!(config.redis.address, "cache.internal:6380");
    assert_eq!(config.redis.database, 3);
    assert_eq!(config.mutation_policy, MutationPolicy::BestEffort);
}

#[test]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "shardcache.json",
        r#"{
            "backend": "standalone",
            "redis": {"address": "file-host:6379"},
            "scan": {"default_count": 10}
        }"#,
    );

    let prefix = format!("SHARDCACHE_IT_{}", uuid::Uuid::new_v4().simple()).to_uppercase();
    std::env::set_var(format!("{prefix}__BACKEND"), "cluster");
    std::env::set_var(format!("{prefix}__REDIS__ADDRESS"), "env-host:7000");
    std::env::set_var(format!("{prefix}__SCAN__CHANNEL_CAPACITY"), "8");

    let config = isolated(&prefix).with_file(&path).load().unwrap();
    assert_eq!(config.backend, BackendKind::Cluster);
    assert_eq!(config.redis.address, "env-host:7000");
    assert_eq!(config.scan.channel_capacity, 8);
    assert_eq!(config.scan.default_count, 10);

    // explicit overrides sit above the environment
    let config = isolated(&prefix)
        .with_file(&path)
        .with_override("redis.address", "override-host:7001")
        .load()
        .unwrap();
    assert_eq!(config.redis.address, "override-host:7001");
}

#[test]
fn test_config_path_from_environment() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "from-env.toml",
        "backend = \"redis-cluster\"\n[redis]\naddress = \"seed:7000\"\n",
    );
    std::env::set_var(CONFIG_PATH_ENV, &path);

    let config = CacheConfig::load().unwrap();
    assert_eq!(config.backend, BackendKind::Cluster);
    assert_eq!(config.redis.address, "seed:7000");

    std::env::remove_var(CONFIG_PATH_ENV);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();

    let zero_capacity = write_config(&dir, "zero.toml", "[scan]\nchannel_capacity = 0\n");
    let err = isolated("SHARDCACHE_IT_INVALID")
        .with_file(&zero_capacity)
        .load()
        .unwrap_err();
    assert!(matches!(err, CacheError::Configuration(ref msg) if msg.contains("channel_capacity")));

    let unknown_backend = write_config(&dir, "backend.toml", "backend = \"memcached\"\n");
    let err = isolated("SHARDCACHE_IT_INVALID")
        .with_file(&unknown_backend)
        .load()
        .unwrap_err();
    assert!(matches!(err, CacheError::Configuration(_)));

    let negative_db = write_config(&dir, "db.toml", "[redis]\ndatabase = -1\n");
    let err = isolated("SHARDCACHE_IT_INVALID")
        .with_file(&negative_db)
        .load()
        .unwrap_err();
    assert!(matches!(err, CacheError::Configuration(ref msg) if msg.contains("database")));
}

#[test]
fn test_cluster_urls() {
    let mut config = CacheConfig::cluster("10.0.0.1:7000");
    config.redis.password = Some("pw".to_string());
    assert_eq!(config.redis.seed_url(), "redis://:pw@10.0.0.1:7000");
    assert_eq!(config.redis.host(), "10.0.0.1");

    let node = config.redis.node_connection_info("10.0.0.2:7001").unwrap();
    assert_eq!(node.addr.to_string(), "10.0.0.2:7001");
    assert_eq!(node.redis.password.as_deref(), Some("pw"));

    // credentials embedded in the seed URL reach every master
    let config = CacheConfig::cluster("redis://:s3cret@seed.local:7000");
    let node = config.redis.node_connection_info("10.0.0.5:7001").unwrap();
    assert_eq!(node.redis.password.as_deref(), Some("s3cret"));
}

#[test]
fn test_loader_constants_are_exported() {
    assert_eq!(CONFIG_PATH_ENV, "SHARDCACHE_CONFIG");
    assert_eq!(shardcache::config::ENV_PREFIX, "SHARDCACHE");
}
