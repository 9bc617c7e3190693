use anyhow::{anyhow, Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod store;

pub use store::PgQueueStore;

pub const ENV_DB_URL: &str = "CQ_DATABASE_URL";

/// Connect to Postgres at `url`.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Connect to Postgres using CQ_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 10).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    tracing::info!("database migrations applied");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_queue_tables: bool,
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from information_schema.tables
        where table_schema = 'public'
          and table_name in ('services', 'patients', 'queue_entries', 'users')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_queue_tables: n == 4,
    })
}

/// Provision a credential row. The secret is stored as given.
pub async fn create_user(pool: &PgPool, username: &str, secret: &str) -> Result<()> {
    if username.trim().is_empty() || secret.is_empty() {
        return Err(anyhow!("username and secret must be non-empty"));
    }
    let res = sqlx::query("insert into users (username, secret) values ($1, $2)")
        .bind(username)
        .bind(secret)
        .execute(pool)
        .await;

    match res {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(anyhow!("user {username} already exists")),
        Err(e) => Err(anyhow::Error::new(e).context("create_user failed")),
    }
}

/// Postgres unique_violation (SQLSTATE 23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
