//! Schema introspection integration tests.
//!
//! Each test creates its own schema so runs do not depend on seeded fixtures.

use super::{get_test_database_url, run_batch, unique_schema};
use sqlcmdr::db::{MetadataService, ParameterDirection, RoutineKind};

fn fixture_sql(schema: &str) -> String {
    format!(
        r#"
        CREATE SCHEMA {schema};
        CREATE TABLE {schema}.users (
            id serial PRIMARY KEY,
            email varchar(255) NOT NULL,
            bio text,
            balance numeric(12, 2)
        );
        CREATE TABLE {schema}.orders (
            id serial PRIMARY KEY,
            user_id integer NOT NULL REFERENCES {schema}.users (id)
        );
        CREATE VIEW {schema}.active_users AS SELECT id, email FROM {schema}.users;
        CREATE PROCEDURE {schema}.touch(p_id integer, INOUT p_count integer)
            LANGUAGE plpgsql AS $$ BEGIN p_count := p_count + 1; END $$;
        CREATE FUNCTION {schema}.user_emails() RETURNS TABLE (email varchar)
            LANGUAGE sql AS $$ SELECT email FROM {schema}.users $$;
        "#
    )
}

#[tokio::test]
async fn test_catalog_shape() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let schema = unique_schema("sqlcmdr_catalog");
    run_batch(&url, &fixture_sql(&schema)).await;

    let metadata = MetadataService::new().get_metadata(&url).await;
    run_batch(&url, &format!("DROP SCHEMA {schema} CASCADE")).await;
    let metadata = metadata.unwrap();

    let tables: Vec<_> = metadata.tables.iter().filter(|t| t.schema == schema).collect();
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["orders", "users"]);

    let users = tables[1];
    let columns: Vec<&str> = users.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "email", "bio", "balance"]);
    assert!(!users.columns[1].is_nullable);
    assert_eq!(users.columns[1].display_type(), "varchar(255)");
    assert!(users.columns[2].is_nullable);
    assert_eq!(users.columns[3].display_type(), "numeric(12,2)");

    let view = metadata
        .views
        .iter()
        .find(|v| v.schema == schema && v.name == "active_users")
        .expect("view should exist");
    assert_eq!(view.columns.len(), 2);

    let fks: Vec<_> = metadata
        .foreign_keys
        .iter()
        .filter(|fk| fk.parent_schema == schema)
        .collect();
    assert_eq!(fks.len(), 1);
    assert_eq!(fks[0].parent_table, "orders");
    assert_eq!(fks[0].parent_column, "user_id");
    assert_eq!(fks[0].referenced_table, "users");
    assert_eq!(fks[0].referenced_column, "id");
}

#[tokio::test]
async fn test_routines_and_output_shape() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let schema = unique_schema("sqlcmdr_routines");
    run_batch(&url, &fixture_sql(&schema)).await;

    let metadata = MetadataService::new().get_metadata(&url).await;
    run_batch(&url, &format!("DROP SCHEMA {schema} CASCADE")).await;
    let metadata = metadata.unwrap();

    let routines: Vec<_> = metadata
        .stored_procedures
        .iter()
        .filter(|r| r.schema == schema)
        .collect();
    assert_eq!(routines.len(), 2);

    let touch = routines.iter().find(|r| r.name == "touch").unwrap();
    assert_eq!(touch.kind, RoutineKind::Procedure);
    let params: Vec<(&str, ParameterDirection)> = touch
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p.direction))
        .collect();
    assert_eq!(
        params,
        vec![
            ("p_id", ParameterDirection::Input),
            ("p_count", ParameterDirection::Output)
        ]
    );

    // Needs arguments, so its output shape cannot be described.
    assert!(touch.output_columns.is_empty());

    let emails = routines.iter().find(|r| r.name == "user_emails").unwrap();
    assert_eq!(emails.kind, RoutineKind::Function);
    let output: Vec<&str> = emails
        .output_columns
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(output, vec!["email"]);
}

#[tokio::test]
async fn test_same_named_foreign_keys_stay_with_their_tables() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let schema = unique_schema("sqlcmdr_fk_names");
    run_batch(
        &url,
        &format!(
            r#"
            CREATE SCHEMA {schema};
            CREATE TABLE {schema}.users (id int PRIMARY KEY);
            CREATE TABLE {schema}.teams (id int PRIMARY KEY);
            CREATE TABLE {schema}.a (owner int CONSTRAINT fk_owner REFERENCES {schema}.users (id));
            CREATE TABLE {schema}.b (team int CONSTRAINT fk_owner REFERENCES {schema}.teams (id));
            CREATE TABLE {schema}.grid (gx int, gy int, PRIMARY KEY (gx, gy));
            CREATE TABLE {schema}.pairs (
                x int,
                y int,
                CONSTRAINT fk_pair FOREIGN KEY (y, x) REFERENCES {schema}.grid (gx, gy)
            );
            "#
        ),
    )
    .await;

    let metadata = MetadataService::new().get_metadata(&url).await;
    run_batch(&url, &format!("DROP SCHEMA {schema} CASCADE")).await;
    let metadata = metadata.unwrap();

    let pairs: Vec<(&str, &str, &str, &str)> = metadata
        .foreign_keys
        .iter()
        .filter(|fk| fk.parent_schema == schema)
        .map(|fk| {
            (
                fk.parent_table.as_str(),
                fk.parent_column.as_str(),
                fk.referenced_table.as_str(),
                fk.referenced_column.as_str(),
            )
        })
        .collect();

    assert_eq!(
        pairs,
        vec![
            ("a", "owner", "users", "id"),
            ("b", "team", "teams", "id"),
            ("pairs", "y", "grid", "gx"),
            ("pairs", "x", "grid", "gy"),
        ]
    );
}
