//! [`RoleCatalog`] backed by a live PostgreSQL server.
//!
//! Every call opens its own connection with the admin credentials and closes
//! it before returning. Schema-level statements connect to the database that
//! holds the schema.

use super::{RoleCatalog, StepOutcome};
use crate::error::Result;
use crate::secrets::SecretString;
use crate::target::{quote_ident, quote_literal};
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, Executor, PgConnection};
use std::str::FromStr;

/// SQLSTATE for `duplicate_object` (CREATE ROLE lost a race).
const DUPLICATE_OBJECT: &str = "42710";
/// SQLSTATE for `duplicate_database`.
const DUPLICATE_DATABASE: &str = "42P04";

pub struct PgCatalog {
    admin: PgConnectOptions,
}

impl PgCatalog {
    pub fn from_admin_url(admin_url: &SecretString) -> Result<Self> {
        // Statement logging would carry the password literal of ALTER ROLE.
        let admin = PgConnectOptions::from_str(admin_url.expose())?
            .application_name("bootgate")
            .disable_statement_logging();
        Ok(Self { admin })
    }

    async fn connect(&self, database: Option<&str>) -> Result<PgConnection> {
        let opts = match database {
            Some(db) => self.admin.clone().database(db),
            None => self.admin.clone(),
        };
        Ok(PgConnection::connect_with(&opts).await?)
    }

    /// Run one DDL statement over the simple query protocol.
    async fn execute(&self, database: Option<&str>, sql: &str) -> Result<()> {
        let mut conn = self.connect(database).await?;
        let result = conn.execute(sqlx::raw_sql(sql)).await;
        let _ = conn.close().await;
        result?;
        Ok(())
    }
}

fn sqlstate_is(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(code),
        _ => false,
    }
}

#[async_trait]
impl RoleCatalog for PgCatalog {
    async fn role_exists(&self, role: &str) -> Result<bool> {
        let mut conn = self.connect(None).await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)")
                .bind(role)
                .fetch_one(&mut conn)
                .await?;
        let _ = conn.close().await;
        Ok(exists)
    }

    async fn create_login_role(&self, role: &str) -> Result<StepOutcome> {
        let sql = format!("CREATE ROLE {} WITH LOGIN", quote_ident(role)?);
        let mut conn = self.connect(None).await?;
        let result = conn.execute(sqlx::raw_sql(&sql)).await;
        let _ = conn.close().await;
        match result {
            Ok(_) => Ok(StepOutcome::Applied),
            Err(e) if sqlstate_is(&e, DUPLICATE_OBJECT) => Ok(StepOutcome::AlreadySatisfied),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_password(&self, role: &str, password: &SecretString) -> Result<()> {
        let sql = format!(
            "ALTER ROLE {} WITH LOGIN PASSWORD {}",
            quote_ident(role)?,
            quote_literal(password.expose())
        );
        self.execute(None, &sql).await
    }

    async fn database_owner(&self, database: &str) -> Result<Option<String>> {
        let mut conn = self.connect(None).await?;
        let owner: Option<String> = sqlx::query_scalar(
            "SELECT pg_get_userbyid(datdba)::text FROM pg_database WHERE datname = $1",
        )
        .bind(database)
        .fetch_optional(&mut conn)
        .await?;
        let _ = conn.close().await;
        Ok(owner)
    }

    async fn create_database(&self, database: &str, owner: &str) -> Result<StepOutcome> {
        let sql = format!(
            "CREATE DATABASE {} OWNER {}",
            quote_ident(database)?,
            quote_ident(owner)?
        );
        let mut conn = self.connect(None).await?;
        let result = conn.execute(sqlx::raw_sql(&sql)).await;
        let _ = conn.close().await;
        match result {
            Ok(_) => Ok(StepOutcome::Applied),
            Err(e) if sqlstate_is(&e, DUPLICATE_DATABASE) => Ok(StepOutcome::AlreadySatisfied),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_database_owner(&self, database: &str, role: &str) -> Result<()> {
        let sql = format!(
            "ALTER DATABASE {} OWNER TO {}",
            quote_ident(database)?,
            quote_ident(role)?
        );
        self.execute(None, &sql).await
    }

    async fn schema_owner(&self, database: &str, schema: &str) -> Result<Option<String>> {
        let mut conn = self.connect(Some(database)).await?;
        let owner: Option<String> = sqlx::query_scalar(
            "SELECT pg_get_userbyid(nspowner)::text FROM pg_namespace WHERE nspname = $1",
        )
        .bind(schema)
        .fetch_optional(&mut conn)
        .await?;
        let _ = conn.close().await;
        Ok(owner)
    }

    async fn set_schema_owner(&self, database: &str, schema: &str, role: &str) -> Result<()> {
        let sql = format!(
            "ALTER SCHEMA {} OWNER TO {}",
            quote_ident(schema)?,
            quote_ident(role)?
        );
        self.execute(Some(database), &sql).await
    }

    async fn schema_grants_held(&self, database: &str, schema: &str, role: &str) -> Result<bool> {
        let mut conn = self.connect(Some(database)).await?;
        let held: bool = sqlx::query_scalar(
            "SELECT has_schema_privilege($1, $2, 'USAGE') AND has_schema_privilege($1, $2, 'CREATE')",
        )
        .bind(role)
        .bind(schema)
        .fetch_one(&mut conn)
        .await?;
        let _ = conn.close().await;
        Ok(held)
    }

    async fn grant_schema(&self, database: &str, schema: &str, role: &str) -> Result<()> {
        let sql = format!(
            "GRANT USAGE, CREATE ON SCHEMA {} TO {}",
            quote_ident(schema)?,
            quote_ident(role)?
        );
        self.execute(Some(database), &sql).await
    }
}
