use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_indexes (
            name TEXT PRIMARY KEY,
            dimension INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Default namespace is stored as ''.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            index_name TEXT NOT NULL,
            namespace TEXT NOT NULL DEFAULT '',
            id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (index_name, namespace, id),
            FOREIGN KEY (index_name) REFERENCES vector_indexes(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_namespace ON vectors(index_name, namespace)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
