//! Version View Schema: a database schema, named after a migration
//! version, containing one view per table that projects the post-migration
//! shape by aliasing each logical column to its current physical name.

use crate::db::Connection;
use crate::schema::VirtualSchema;

/// Creates the `pgroll.is_new_schema()` helper used by every trigger
/// function to decide whether the write came in through `version_schema`
/// (the post-migration view) or the pre-migration one. A session can also
/// force the answer via `SET pgroll.force_new_schema = 'true'`, which the
/// backfill task and tests rely on to target one side explicitly.
pub async fn create_is_new_schema_function(
    conn: &mut dyn Connection,
    version_schema: &str,
) -> anyhow::Result<()> {
    conn.run("CREATE SCHEMA IF NOT EXISTS pgroll").await?;
    conn.run(&format!(
        r#"CREATE OR REPLACE FUNCTION pgroll.is_new_schema() RETURNS boolean AS $$
  SELECT COALESCE(
    current_setting('pgroll.force_new_schema', true)::boolean,
    trim(both '"' from trim(split_part(current_setting('search_path', true), ',', 1))) = '{version_schema}'
  );
$$ LANGUAGE sql STABLE"#,
    ))
    .await
}

pub async fn drop_is_new_schema_function(conn: &mut dyn Connection) -> anyhow::Result<()> {
    conn.run("DROP FUNCTION IF EXISTS pgroll.is_new_schema() CASCADE")
        .await
}

/// Creates `version_schema` and a view per visible table projecting each
/// logical column by its current physical name.
pub async fn create_version_schema(
    conn: &mut dyn Connection,
    schema: &VirtualSchema,
    version_schema: &str,
) -> anyhow::Result<()> {
    conn.run(&format!(r#"CREATE SCHEMA IF NOT EXISTS "{version_schema}""#))
        .await?;

    for table in schema.tables() {
        create_view_for_table(conn, table, version_schema).await?;
    }

    Ok(())
}

async fn create_view_for_table(
    conn: &mut dyn Connection,
    table: &crate::schema::Table,
    version_schema: &str,
) -> anyhow::Result<()> {
    let projections: Vec<String> = table
        .columns()
        .filter(|c| !c.is_removed())
        .map(|c| format!(r#""{}" AS "{}""#, c.physical_name, c.name))
        .collect();

    conn.run(&format!(
        r#"CREATE OR REPLACE VIEW "{version_schema}"."{view_name}" AS SELECT {projections} FROM "{table_name}""#,
        view_name = table.name,
        projections = projections.join(", "),
        table_name = table.name,
    ))
    .await
}

pub async fn drop_version_schema(conn: &mut dyn Connection, version_schema: &str) -> anyhow::Result<()> {
    conn.run(&format!(r#"DROP SCHEMA IF EXISTS "{version_schema}" CASCADE"#))
        .await
}
