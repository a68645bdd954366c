//! Connection integration tests.
//!
//! Tests connection probing and error handling.

use super::get_test_database_url;
use sqlcmdr::config::ConnectionConfig;
use sqlcmdr::db::MetadataService;
use sqlcmdr::error::SqlCmdrError;

#[tokio::test]
async fn test_connect_with_valid_credentials() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = MetadataService::new().test_connection(&url).await.unwrap();

    assert!(result.success, "Connection test failed: {:?}", result.error_message);
    assert!(result.server_version.is_some());
    assert!(result.database_name.is_some());
    assert!(result.user_name.is_some());
    assert!(result.error_message.is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_host() {
    let config = ConnectionConfig {
        host: Some("invalid.host.that.does.not.exist.local".to_string()),
        database: Some("testdb".to_string()),
        user: Some("testuser".to_string()),
        password: Some("testpass".to_string()),
        ..ConnectionConfig::default()
    };

    let result = MetadataService::new()
        .test_connection(&config.to_connection_string().unwrap())
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.server_version.is_none());
    assert!(!result.error_message.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_get_metadata_with_unreachable_server_is_error() {
    let result = MetadataService::new()
        .get_metadata("postgres://testuser@invalid.host.that.does.not.exist.local/testdb")
        .await;

    assert!(matches!(result, Err(SqlCmdrError::Connection(_))));
}

#[tokio::test]
async fn test_blank_connection_string_rejected() {
    let service = MetadataService::new();

    assert!(service
        .test_connection("  ")
        .await
        .unwrap_err()
        .is_invalid_argument());
    assert!(service
        .get_metadata("")
        .await
        .unwrap_err()
        .is_invalid_argument());
}
