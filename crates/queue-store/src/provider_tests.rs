//! Tests for provider types.

use super::*;

#[test]
fn test_store_config_defaults_to_in_memory() {
    assert_eq!(StoreConfig::default(), StoreConfig::InMemory);
}

#[test]
fn test_postgres_config_defaults() {
    let config = PostgresConfig::new("postgres://db/app");
    assert_eq!(config.database_url, "postgres://db/app");
    assert_eq!(config.max_connections, 10);
    assert_eq!(config.connect_timeout_seconds, 10);
}

#[test]
fn test_store_config_deserialization() {
    let config: StoreConfig = serde_json::from_str(
        r#"{ "provider": "postgres", "database_url": "postgres://db/app", "max_connections": 4 }"#,
    )
    .unwrap();

    match config {
        StoreConfig::Postgres(pg) => {
            assert_eq!(pg.database_url, "postgres://db/app");
            assert_eq!(pg.max_connections, 4);
            assert_eq!(pg.connect_timeout_seconds, 10);
        }
        other => panic!("Expected Postgres config, got {:?}", other),
    }

    let in_memory: StoreConfig = serde_json::from_str(r#"{ "provider": "in_memory" }"#).unwrap();
    assert_eq!(in_memory, StoreConfig::InMemory);
}

#[test]
fn test_store_config_provider_type() {
    assert_eq!(StoreConfig::InMemory.provider_type(), ProviderType::InMemory);
    assert_eq!(
        StoreConfig::Postgres(PostgresConfig::default()).provider_type(),
        ProviderType::Pgmq
    );
}
