//! Idempotent database bootstrap.
//!
//! `ensure_role` brings a target database to the state the application
//! expects: a login role with the configured password that owns the primary
//! and shadow databases and their default schema. Every step first reads the
//! live catalog, so re-running against a satisfied target changes nothing
//! except the (unconditionally reset) password.
//!
//! Failure policy:
//! - role creation, password reset, database creation and schema grants are
//!   fatal;
//! - ownership reassignment (database or schema) is tolerated: the failure is
//!   logged and recorded as [`StepOutcome::Tolerated`], and the run continues.

pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

use crate::error::{BootgateError, Result};
use crate::secrets::SecretString;
use crate::target::DatabaseTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use postgres::PgCatalog;

// ---------------------------------------------------------------------------
// RoleCatalog
// ---------------------------------------------------------------------------

/// The slice of a database server's catalog that bootstrap reads and writes.
#[async_trait]
pub trait RoleCatalog: Send + Sync {
    async fn role_exists(&self, role: &str) -> Result<bool>;

    /// Create a login role. A concurrent creation that wins the race is
    /// reported as `AlreadySatisfied`.
    async fn create_login_role(&self, role: &str) -> Result<StepOutcome>;

    async fn set_password(&self, role: &str, password: &SecretString) -> Result<()>;

    /// Current owner of `database`, or `None` when it does not exist.
    async fn database_owner(&self, database: &str) -> Result<Option<String>>;

    async fn create_database(&self, database: &str, owner: &str) -> Result<StepOutcome>;

    async fn set_database_owner(&self, database: &str, role: &str) -> Result<()>;

    /// Current owner of `schema` inside `database`, or `None` when missing.
    async fn schema_owner(&self, database: &str, schema: &str) -> Result<Option<String>>;

    async fn set_schema_owner(&self, database: &str, schema: &str, role: &str) -> Result<()>;

    /// Whether `role` already holds USAGE and CREATE on `schema`.
    async fn schema_grants_held(&self, database: &str, schema: &str, role: &str) -> Result<bool>;

    async fn grant_schema(&self, database: &str, schema: &str, role: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    AlreadySatisfied,
    /// The step failed in a way that almost always means "already correct".
    Tolerated { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub role: String,
    pub steps: Vec<StepRecord>,
}

impl BootstrapReport {
    fn record(&mut self, step: impl Into<String>, outcome: StepOutcome) {
        let step = step.into();
        match &outcome {
            StepOutcome::Tolerated { reason } => {
                tracing::warn!(role = %self.role, step = %step, reason = %reason, "bootstrap step tolerated")
            }
            other => tracing::info!(role = %self.role, step = %step, outcome = ?other, "bootstrap step"),
        }
        self.steps.push(StepRecord { step, outcome });
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.outcome)
    }

    pub fn applied_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Applied)
            .count()
    }
}

/// Proof that bootstrap completed for a target. Only [`ensure_role`] creates one.
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    report: BootstrapReport,
}

impl Bootstrapped {
    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }

    pub fn into_report(self) -> BootstrapReport {
        self.report
    }

    #[cfg(test)]
    pub(crate) fn for_tests(role: &str) -> Self {
        Self {
            report: BootstrapReport {
                role: role.to_string(),
                steps: vec![],
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ensure_role
// ---------------------------------------------------------------------------

fn fatal(step: &str) -> impl Fn(BootgateError) -> BootgateError + '_ {
    move |e| BootgateError::BootstrapStep {
        step: step.to_string(),
        reason: e.to_string(),
    }
}

/// Run every bootstrap step against `catalog` in order.
pub async fn ensure_role<C: RoleCatalog + ?Sized>(
    catalog: &C,
    target: &DatabaseTarget,
    password: &SecretString,
) -> Result<Bootstrapped> {
    target.validate()?;
    let role = target.role.as_str();
    let schema = target.schema.as_str();
    let mut report = BootstrapReport {
        role: role.to_string(),
        steps: Vec::new(),
    };

    // 1. Role identity.
    let exists = catalog.role_exists(role).await.map_err(fatal("role"))?;
    let outcome = if exists {
        StepOutcome::AlreadySatisfied
    } else {
        catalog.create_login_role(role).await.map_err(fatal("role"))?
    };
    report.record("role", outcome);

    // 2. Credential, reset every run so rotation needs no special case.
    catalog
        .set_password(role, password)
        .await
        .map_err(fatal("password"))?;
    report.record("password", StepOutcome::Applied);

    // 3. Database existence and ownership.
    for database in target.databases() {
        let step = format!("owner:{database}");
        let outcome = match catalog.database_owner(database).await.map_err(fatal(&step))? {
            None => catalog
                .create_database(database, role)
                .await
                .map_err(fatal(&step))?,
            Some(owner) if owner == role => StepOutcome::AlreadySatisfied,
            Some(_) => match catalog.set_database_owner(database, role).await {
                Ok(()) => StepOutcome::Applied,
                Err(e) => StepOutcome::Tolerated {
                    reason: e.to_string(),
                },
            },
        };
        report.record(step, outcome);
    }

    // 4. Schema privileges (fatal) and schema ownership (tolerated).
    for database in target.databases() {
        let step = format!("grant:{database}.{schema}");
        let held = catalog
            .schema_grants_held(database, schema, role)
            .await
            .map_err(fatal(&step))?;
        let outcome = if held {
            StepOutcome::AlreadySatisfied
        } else {
            catalog
                .grant_schema(database, schema, role)
                .await
                .map_err(fatal(&step))?;
            StepOutcome::Applied
        };
        report.record(step, outcome);

        let step = format!("schema-owner:{database}.{schema}");
        let outcome = match catalog
            .schema_owner(database, schema)
            .await
            .map_err(fatal(&step))?
        {
            Some(owner) if owner == role => StepOutcome::AlreadySatisfied,
            Some(_) => match catalog.set_schema_owner(database, schema, role).await {
                Ok(()) => StepOutcome::Applied,
                Err(e) => StepOutcome::Tolerated {
                    reason: e.to_string(),
                },
            },
            None => {
                return Err(BootgateError::BootstrapStep {
                    step,
                    reason: format!("schema '{schema}' does not exist in '{database}'"),
                })
            }
        };
        report.record(step, outcome);
    }

    Ok(Bootstrapped { report })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
