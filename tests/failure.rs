use pgroll::actions::common::ColumnDef;
use pgroll::actions::create_table::CreateTable;
use pgroll::actions::raw_sql::RawSql;
use pgroll::actions::Operation;
use pgroll::error::MigrationError;
use pgroll::migration::Migration;
use pgroll::schema::VirtualSchema;

#[test]
fn isolating_raw_sql_cannot_share_a_migration() {
    let migration = Migration::new("mixed")
        .with_operation(Box::new(RawSql {
            up: "ALTER TABLE users ADD COLUMN legacy_flag boolean".to_string(),
            down: None,
            on_complete: false,
            in_transaction: false,
        }))
        .with_operation(Box::new(CreateTable {
            name: "widgets".to_string(),
            columns: vec![ColumnDef {
                name: "id".to_string(),
                data_type: "serial".to_string(),
                nullable: false,
                default: None,
                comment: None,
                pk: true,
            }],
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }));

    let err = migration.validate_shape().unwrap_err();
    assert!(matches!(err, MigrationError::InvalidMigration(_)));
}

#[test]
fn raw_sql_on_complete_may_coexist_with_other_operations() {
    let migration = Migration::new("combined")
        .with_operation(Box::new(RawSql {
            up: "ANALYZE users".to_string(),
            down: None,
            on_complete: true,
            in_transaction: false,
        }))
        .with_operation(Box::new(CreateTable {
            name: "widgets".to_string(),
            columns: vec![ColumnDef {
                name: "id".to_string(),
                data_type: "serial".to_string(),
                nullable: false,
                default: None,
                comment: None,
                pk: true,
            }],
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }));

    assert!(migration.validate_shape().is_ok());
}

#[test]
fn identifier_over_63_bytes_fails_validation() {
    let long_name = "x".repeat(64);
    let create_table = CreateTable {
        name: long_name,
        columns: vec![ColumnDef {
            name: "id".to_string(),
            data_type: "serial".to_string(),
            nullable: false,
            default: None,
            comment: None,
            pk: true,
        }],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
    };

    let mut schema = VirtualSchema::new();
    let err = create_table.validate(&mut schema).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidIdentifierLength { .. }));
}
