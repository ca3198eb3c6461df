mod common;

use pgroll::actions::common::ColumnDef;
use pgroll::actions::create_table::CreateTable;
use pgroll::actions::rename_column::RenameColumn;
use pgroll::migration::Migration;

use common::Test;

#[tokio::test]
async fn rename_column_keeps_both_views_live() {
    let mut test = Test::connect().await;
    common::reset(&mut test.old_db).await;

    let create_users = Migration::new("create_users").with_operation(Box::new(CreateTable {
        name: "users".to_string(),
        columns: vec![
            ColumnDef {
                name: "id".to_string(),
                data_type: "serial".to_string(),
                nullable: false,
                default: None,
                comment: None,
                pk: true,
            },
            ColumnDef {
                name: "username".to_string(),
                data_type: "text".to_string(),
                nullable: false,
                default: None,
                comment: None,
                pk: false,
            },
        ],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
    }));

    test.migrator.start(&create_users).await.unwrap();
    test.migrator.complete(&create_users).await.unwrap();

    let rename = Migration::new("rename_username").with_operation(Box::new(RenameColumn {
        table: "users".to_string(),
        column: "username".to_string(),
        new_name: "name".to_string(),
    }));

    let new_schema = test.migrator.start(&rename).await.unwrap();
    assert!(new_schema.get_table("users").unwrap().get_column("name").is_some());

    common::use_version(&mut test.old_db, "create_users").await;
    common::use_version(&mut test.new_db, "rename_username").await;

    test.old_db
        .execute("INSERT INTO users (username) VALUES ($1)", &[&"bob"])
        .await
        .unwrap();
    test.new_db
        .execute("INSERT INTO users (name) VALUES ($1)", &[&"alice"])
        .await
        .unwrap();

    let old_rows = test.old_db.query("SELECT username FROM users", &[]).await.unwrap();
    let new_rows = test.new_db.query("SELECT name FROM users", &[]).await.unwrap();
    assert_eq!(old_rows.len(), 2);
    assert_eq!(new_rows.len(), 2);

    test.migrator.complete(&rename).await.unwrap();

    let columns: Vec<String> = test
        .old_db
        .query(
            "SELECT column_name FROM information_schema.columns WHERE table_name = 'users' ORDER BY column_name",
            &[],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| row.get(0))
        .collect();
    assert!(columns.contains(&"name".to_string()));
    assert!(!columns.contains(&"username".to_string()));

    common::assert_cleaned_up(&mut test.old_db).await;
}
