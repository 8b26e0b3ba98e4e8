//! Migration runner for pgforge's own control-plane tables.
//!
//! Follows the teacher's versioned, idempotent `Migration`/`Migrator`
//! shape: each migration is recorded once applied, in a ledger table
//! named `pgforge_migrations` to avoid colliding with an embedding
//! application's own migration tracker.

use pgforge_core::error::{Error, Result};
use sqlx::PgPool;

/// A single migration: a version, a name, and the SQL to apply.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Runs pgforge's migrations against a Postgres pool.
pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Migrator {
    pub fn new() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    pub fn add(&mut self, migration: Migration) -> &mut Self {
        self.migrations.push(migration);
        self.migrations.sort_by_key(|m| m.version);
        self
    }

    pub fn with_migrations(mut self, migrations: Vec<Migration>) -> Self {
        for m in migrations {
            self.add(m);
        }
        self
    }

    /// Run all pending migrations, returning the versions newly applied.
    pub async fn run(&self, pool: &PgPool) -> Result<Vec<i64>> {
        self.ensure_migrations_table(pool).await?;
        let applied = self.get_applied_migrations(pool).await?;

        let mut newly_applied = Vec::new();
        for migration in &self.migrations {
            if !applied.contains(&migration.version) {
                self.apply_migration(pool, migration).await?;
                newly_applied.push(migration.version);
            }
        }

        if newly_applied.is_empty() {
            tracing::info!("no pending pgforge migrations");
        } else {
            tracing::info!(count = newly_applied.len(), "applied pgforge migrations");
        }

        Ok(newly_applied)
    }

    async fn ensure_migrations_table(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pgforge_migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| Error::database_with_source("failed to create pgforge_migrations table", e))?;

        Ok(())
    }

    async fn get_applied_migrations(&self, pool: &PgPool) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT version FROM pgforge_migrations ORDER BY version")
                .fetch_all(pool)
                .await
                .map_err(|e| Error::database_with_source("failed to read pgforge_migrations", e))?;

        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    async fn apply_migration(&self, pool: &PgPool, migration: &Migration) -> Result<()> {
        tracing::info!(version = migration.version, name = %migration.name, "applying migration");

        sqlx::query(&migration.sql)
            .execute(pool)
            .await
            .map_err(|e| Error::Migration {
                message: format!("migration {} ({}) failed: {e}", migration.version, migration.name),
            })?;

        sqlx::query("INSERT INTO pgforge_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(&migration.name)
            .execute(pool)
            .await
            .map_err(|e| Error::database_with_source("failed to record migration", e))?;

        Ok(())
    }
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Migrations that install pgforge's own control-plane schema:
/// the executor job audit table and the durable subscription resume
/// point table (§6). `pg_cron`'s own `cron.job`/`cron.job_run_details`
/// tables are created by the extension itself and are not migrated
/// here.
pub fn control_plane_migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            1,
            "create_executor_scheduled_job",
            r#"
            CREATE TABLE IF NOT EXISTS executor_scheduled_job (
                name TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                last_started_at TIMESTAMPTZ,
                next_fire_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        ),
        Migration::new(
            2,
            "create_durable_subscription_resume_points",
            r#"
            CREATE TABLE IF NOT EXISTS durable_subscription_resume_points (
                subscriber_id TEXT NOT NULL,
                aggregate_type TEXT NOT NULL,
                resume_from_and_including_global_order BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (subscriber_id, aggregate_type)
            );
            "#,
        ),
    ]
}

/// The TTL delete-function migration (4.F). Kept separate from
/// [`control_plane_migrations`] so the TTL manager can install it
/// independently, under a caller-configurable function name, the
/// first time a TTL job is scheduled.
///
/// `function_name` is spliced directly into DDL (function names can't
/// be bind parameters); callers MUST validate it with
/// `pgforge_core::ident::is_valid_function_name` first. The `%I`
/// identifier-quoting inside the function body is the only protection
/// the installed function itself provides for `p_table_name`.
pub fn ttl_function_migration(version: i64, function_name: &str) -> Migration {
    Migration::new(
        version,
        format!("create_ttl_function_{function_name}"),
        format!(
            r#"
            CREATE OR REPLACE FUNCTION {function_name}(p_table_name text, p_delete_statement text)
            RETURNS void AS $$
            BEGIN
                EXECUTE format('DELETE FROM %I WHERE %s', p_table_name, p_delete_statement);
            END;
            $$ LANGUAGE plpgsql;
            "#
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_added_out_of_order_sort_by_version() {
        let mut migrator = Migrator::new();
        migrator.add(Migration::new(2, "second", "SELECT 1"));
        migrator.add(Migration::new(1, "first", "SELECT 1"));

        assert_eq!(migrator.migrations[0].version, 1);
        assert_eq!(migrator.migrations[1].version, 2);
    }

    #[test]
    fn ttl_migration_uses_identifier_quoting_for_table_name() {
        let migration = ttl_function_migration(3, "pgforge_ttl_delete");
        assert!(migration.sql.contains("%I"));
        assert!(migration.sql.contains("pgforge_ttl_delete"));
    }
}
