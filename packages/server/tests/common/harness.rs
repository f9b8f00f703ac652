//! Postgres test harness built on testcontainers.
//!
//! One container serves the whole test binary. Every [`TestHarness`] creates
//! its own database inside it and migrates it, so tests never observe each
//! other's crawl jobs.

use anyhow::{Context, Result};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Address of the shared container. Pools are never cached here because
/// each `#[tokio::test]` runs on its own runtime.
struct SharedPostgres {
    host: String,
    port: u16,
    _container: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn start() -> Result<Self> {
        // RUST_LOG=crawl_core=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let container = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        Ok(Self {
            host: container.get_host().await?.to_string(),
            port: container.get_host_port_ipv4(5432).await?,
            _container: container,
        })
    }

    async fn get() -> &'static Self {
        SHARED_POSTGRES
            .get_or_init(|| async {
                Self::start()
                    .await
                    .expect("Failed to start shared Postgres container")
            })
            .await
    }

    fn url(&self, database: &str) -> String {
        format!(
            "postgresql://postgres:postgres@{}:{}/{}",
            self.host, self.port, database
        )
    }

    /// Create an empty database and return a migrated pool for it.
    async fn fresh_database(&self) -> Result<(String, PgPool)> {
        let name = format!("crawl_test_{}", Uuid::new_v4().simple());

        let admin = PgPool::connect(&self.url("postgres"))
            .await
            .context("Failed to connect to admin database")?;
        sqlx::query(&format!(r#"CREATE DATABASE "{name}""#))
            .execute(&admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await;

        let pool = PgPool::connect(&self.url(&name))
            .await
            .context("Failed to connect to test database")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok((name, pool))
    }
}

/// Per-test context owning a migrated, empty database.
///
/// ```ignore
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &mut TestHarness) {
///     let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
/// }
/// ```
pub struct TestHarness {
    pub db_pool: PgPool,
    pub database_name: String,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        let (database_name, db_pool) = SharedPostgres::get()
            .await
            .fresh_database()
            .await
            .expect("Failed to create test database");

        Self {
            db_pool,
            database_name,
        }
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}
