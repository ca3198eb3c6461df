mod common;

use std::collections::HashMap;

use pgroll::actions::common::ColumnDef;
use pgroll::actions::create_constraint::{ConstraintKind, CreateConstraint};
use pgroll::actions::create_table::CreateTable;
use pgroll::migration::Migration;

use common::Test;

fn text_column(name: &str, nullable: bool) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        data_type: "text".to_string(),
        nullable,
        default: None,
        comment: None,
        pk: false,
    }
}

fn id_column() -> ColumnDef {
    ColumnDef {
        name: "id".to_string(),
        data_type: "serial".to_string(),
        nullable: false,
        default: None,
        comment: None,
        pk: true,
    }
}

#[tokio::test]
async fn foreign_key_cascade_deletes_through_new_view() {
    let mut test = Test::connect().await;
    common::reset(&mut test.old_db).await;

    let create_users = Migration::new("create_users").with_operation(Box::new(CreateTable {
        name: "users".to_string(),
        columns: vec![id_column()],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
    }));
    test.migrator.start(&create_users).await.unwrap();
    test.migrator.complete(&create_users).await.unwrap();

    let create_orders = Migration::new("create_orders").with_operation(Box::new(CreateTable {
        name: "orders".to_string(),
        columns: vec![
            id_column(),
            ColumnDef {
                name: "user_id".to_string(),
                data_type: "integer".to_string(),
                nullable: false,
                default: None,
                comment: None,
                pk: false,
            },
        ],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
    }));
    test.migrator.start(&create_orders).await.unwrap();
    test.migrator.complete(&create_orders).await.unwrap();

    let add_fk = Migration::new("add_orders_user_fk").with_operation(Box::new(CreateConstraint {
        table: "orders".to_string(),
        name: "orders_user_id_fkey".to_string(),
        columns: vec!["user_id".to_string()],
        kind: ConstraintKind::ForeignKey {
            referenced_table: "users".to_string(),
            referenced_columns: vec!["id".to_string()],
            on_delete: "CASCADE".to_string(),
            on_update: "NO ACTION".to_string(),
        },
        up: HashMap::new(),
        down: HashMap::new(),
    }));

    test.migrator.start(&add_fk).await.unwrap();
    test.migrator.complete(&add_fk).await.unwrap();

    common::use_version(&mut test.new_db, "add_orders_user_fk").await;
    let user_id: i32 = test
        .new_db
        .query_one("INSERT INTO users DEFAULT VALUES RETURNING id", &[])
        .await
        .unwrap()
        .get(0);
    test.new_db
        .execute("INSERT INTO orders (user_id) VALUES ($1)", &[&user_id])
        .await
        .unwrap();

    test.new_db
        .execute("DELETE FROM users WHERE id = $1", &[&user_id])
        .await
        .unwrap();

    let remaining = test
        .new_db
        .query("SELECT id FROM orders WHERE user_id = $1", &[&user_id])
        .await
        .unwrap();
    assert!(remaining.is_empty());

    common::assert_cleaned_up(&mut test.old_db).await;
}

#[tokio::test]
async fn check_constraint_backfills_existing_rows() {
    let mut test = Test::connect().await;
    common::reset(&mut test.old_db).await;

    let create_places = Migration::new("create_places").with_operation(Box::new(CreateTable {
        name: "places".to_string(),
        columns: vec![id_column(), text_column("city", true)],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
    }));
    test.migrator.start(&create_places).await.unwrap();
    test.migrator.complete(&create_places).await.unwrap();

    common::use_version(&mut test.old_db, "create_places").await;
    test.old_db
        .execute("INSERT INTO places (city) VALUES ($1)", &[&"nowhere"])
        .await
        .unwrap();

    let mut up = HashMap::new();
    up.insert("city".to_string(), "'chicago'".to_string());
    let mut down = HashMap::new();
    down.insert("city".to_string(), "city".to_string());

    let add_check = Migration::new("add_city_check").with_operation(Box::new(CreateConstraint {
        table: "places".to_string(),
        name: "places_city_check".to_string(),
        columns: vec!["city".to_string()],
        kind: ConstraintKind::Check {
            expression: "city != 'nowhere'".to_string(),
        },
        up,
        down,
    }));

    test.migrator.start(&add_check).await.unwrap();
    // Give the backfill worker a moment to run its batches.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    test.migrator.complete(&add_check).await.unwrap();

    let city: String = test
        .old_db
        .query_one("SELECT city FROM places", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(city, "chicago");

    common::assert_cleaned_up(&mut test.old_db).await;
}
