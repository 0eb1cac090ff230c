use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{Sqlite, SqlitePool},
    Pool,
};

pub type DbPool = Pool<Sqlite>;

/// Every mutation appends one row per touched key; a deletion is a row with
/// `tombstone = 1`. The latest row of a key at or below a revision is its
/// state at that revision.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        revision INTEGER NOT NULL,
        key BLOB NOT NULL,
        value BLOB NOT NULL,
        create_revision INTEGER NOT NULL,
        version INTEGER NOT NULL,
        lease INTEGER NOT NULL DEFAULT 0,
        tombstone INTEGER NOT NULL DEFAULT 0,
        timestamp INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS records_key_revision ON records (key, revision)",
    "CREATE INDEX IF NOT EXISTS records_revision ON records (revision)",
    r#"
    CREATE TABLE IF NOT EXISTS leases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ttl INTEGER NOT NULL,
        granted_at INTEGER NOT NULL
    )
    "#,
];

pub async fn ensure_database_file(url: &str) -> Result<(), sqlx::Error> {
    let exists = Sqlite::database_exists(url).await?;

    if !exists {
        Sqlite::create_database(url).await?;
    }

    Ok(())
}

pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    ensure_database_file(database_url).await?;
    let pool = SqlitePool::connect(database_url).await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}
