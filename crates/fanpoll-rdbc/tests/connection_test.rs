//! Unit tests for fanpoll-rdbc connection module and mock endpoints

use std::time::Duration;

use fanpoll_rdbc::connection::{ConnectionConfig, ConnectionFactory};
use fanpoll_rdbc::security::Credentials;
use fanpoll_rdbc::testing::{MockConnectionFactory, MockEndpoint};
use fanpoll_rdbc::types::{Table, Value};

#[test]
fn test_connection_config_default() {
    let config = ConnectionConfig::default();

    assert!(config.url.is_empty());
    assert!(config.credentials.is_none());
    assert!(config.connect_timeout > Duration::ZERO);
    assert!(config.query_timeout > Duration::ZERO);
    assert_eq!(config.application_name.as_deref(), Some("fanpoll"));
}

#[tokio::test]
async fn test_mock_factory_passes_credentials() {
    let factory = MockConnectionFactory::new();
    let config = ConnectionConfig::new("Server=10.0.0.9")
        .with_credentials(Credentials::new("poller", "pw"));

    let conn = factory.connect(&config).await.unwrap();
    assert!(conn.is_valid().await);
    assert_eq!(
        factory.endpoint("Server=10.0.0.9").logins(),
        vec![Some("poller".to_string())]
    );
}

#[tokio::test]
async fn test_mock_multiple_result_sets() {
    let factory = MockConnectionFactory::new();
    factory.endpoint("control").respond(
        "EXEC getRequestData",
        vec![
            Table::new(["reqId"]).with_row(vec![Value::Int32(1)]),
            Table::new(["reqId", "name"]),
        ],
    );

    let conn = factory
        .connect(&ConnectionConfig::new("control"))
        .await
        .unwrap();
    let sets = conn.query_multiple("EXEC getRequestData", &[]).await.unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].len(), 1);
    assert!(sets[1].is_empty());
}

#[tokio::test]
async fn test_mock_bulk_insert() {
    let endpoint = MockEndpoint::new();
    endpoint.fail_bulk_load("broken");
    let conn = fanpoll_rdbc::testing::MockConnection::new(endpoint.clone());
    let batch = Table::new(["id", "logRowId", "v"])
        .with_row(vec![Value::Null, Value::Int64(1), Value::Int32(5)]);

    use fanpoll_rdbc::connection::Connection;
    assert_eq!(conn.bulk_insert("results", &batch).await.unwrap(), 1);
    assert!(conn.bulk_insert("broken", &batch).await.is_err());
    assert_eq!(endpoint.rows_loaded_into("results").len(), 1);
    assert!(endpoint.rows_loaded_into("broken").is_empty());
}

#[tokio::test]
async fn test_execute_batch_stops_at_first_failure() {
    use fanpoll_rdbc::connection::Connection;

    let endpoint = MockEndpoint::new();
    endpoint.fail("UPDATE bad", "deadlock victim");
    let conn = fanpoll_rdbc::testing::MockConnection::new(endpoint.clone());

    let statements = vec![
        ("UPDATE good SET a = 1".to_string(), vec![]),
        ("UPDATE bad SET a = 1".to_string(), vec![]),
        ("UPDATE later SET a = 1".to_string(), vec![]),
    ];
    assert!(conn.execute_batch(&statements).await.is_err());
    assert_eq!(endpoint.statement_count("UPDATE later"), 0);
}
