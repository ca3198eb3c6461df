mod common;

use pgroll::actions::alter_column::AlterColumn;
use pgroll::actions::common::ColumnDef;
use pgroll::actions::create_table::CreateTable;
use pgroll::migration::Migration;

use common::Test;

#[tokio::test]
async fn alter_column_type_change_keeps_both_representations_in_sync() {
    let mut test = Test::connect().await;
    common::reset(&mut test.old_db).await;

    let create_reviews = Migration::new("create_reviews").with_operation(Box::new(CreateTable {
        name: "reviews".to_string(),
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
                name: "rating".to_string(),
                data_type: "text".to_string(),
                nullable: true,
                default: None,
                comment: None,
                pk: false,
            },
        ],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
    }));

    test.migrator.start(&create_reviews).await.unwrap();
    test.migrator.complete(&create_reviews).await.unwrap();

    let retype = Migration::new("retype_rating").with_operation(Box::new(AlterColumn {
        table: "reviews".to_string(),
        column: "rating".to_string(),
        data_type: Some("integer".to_string()),
        nullable: None,
        default: None,
        comment: None,
        unique: false,
        check: None,
        references: None,
        up: Some("CAST(rating AS integer)".to_string()),
        down: Some("CAST(rating AS text)".to_string()),
    }));

    test.migrator.start(&retype).await.unwrap();

    common::use_version(&mut test.new_db, "retype_rating").await;
    test.new_db
        .execute("INSERT INTO reviews (rating) VALUES ($1)", &[&5_i32])
        .await
        .unwrap();

    common::use_version(&mut test.old_db, "create_reviews").await;
    let old_rating: String = test
        .old_db
        .query_one("SELECT rating FROM reviews", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(old_rating, "5");

    common::use_version(&mut test.new_db, "retype_rating").await;
    let new_rating: i32 = test
        .new_db
        .query_one("SELECT rating FROM reviews", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(new_rating, 5);

    test.migrator.complete(&retype).await.unwrap();
    common::assert_cleaned_up(&mut test.old_db).await;
}
