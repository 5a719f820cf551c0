//! In-memory [`RoleCatalog`] that mimics a fresh PostgreSQL server.

use super::{RoleCatalog, StepOutcome};
use crate::error::{BootgateError, Result};
use crate::secrets::SecretString;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogState {
    /// role → password
    pub roles: BTreeMap<String, Option<String>>,
    pub databases: BTreeMap<String, DatabaseState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseState {
    pub owner: String,
    pub schemas: BTreeMap<String, SchemaState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaState {
    pub owner: String,
    pub grants: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    CreateRole,
    SetPassword,
    AlterOwner,
    Grant,
    ReadSchemaOwner,
}

#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
    faults: Mutex<HashSet<Fault>>,
    calls: AtomicU32,
}

fn denied(what: &str) -> BootgateError {
    BootgateError::BootstrapStep {
        step: what.to_string(),
        reason: "permission denied".to_string(),
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CatalogState {
        self.state.lock().unwrap().clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().unwrap().insert(fault);
    }

    /// Pre-create a database with a `public` schema owned by `owner`.
    pub fn seed_database(&self, name: &str, owner: &str) {
        self.state
            .lock()
            .unwrap()
            .databases
            .insert(name.to_string(), fresh_database(owner));
    }

    fn tick(&self, fault: Fault) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().unwrap().contains(&fault) {
            return Err(denied(&format!("{fault:?}")));
        }
        Ok(())
    }

    fn read(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn fresh_database(owner: &str) -> DatabaseState {
    let mut schemas = BTreeMap::new();
    schemas.insert(
        "public".to_string(),
        SchemaState {
            owner: "postgres".to_string(),
            grants: BTreeSet::new(),
        },
    );
    DatabaseState {
        owner: owner.to_string(),
        schemas,
    }
}

#[async_trait]
impl RoleCatalog for MemoryCatalog {
    async fn role_exists(&self, role: &str) -> Result<bool> {
        self.read();
        Ok(self.state.lock().unwrap().roles.contains_key(role))
    }

    async fn create_login_role(&self, role: &str) -> Result<StepOutcome> {
        self.tick(Fault::CreateRole)?;
        let mut state = self.state.lock().unwrap();
        if state.roles.contains_key(role) {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        state.roles.insert(role.to_string(), None);
        Ok(StepOutcome::Applied)
    }

    async fn set_password(&self, role: &str, password: &SecretString) -> Result<()> {
        self.tick(Fault::SetPassword)?;
        let mut state = self.state.lock().unwrap();
        match state.roles.get_mut(role) {
            Some(p) => {
                *p = Some(password.expose().to_string());
                Ok(())
            }
            None => Err(BootgateError::BootstrapStep {
                step: "password".into(),
                reason: format!("role \"{role}\" does not exist"),
            }),
        }
    }

    async fn database_owner(&self, database: &str) -> Result<Option<String>> {
        self.read();
        Ok(self
            .state
            .lock()
            .unwrap()
            .databases
            .get(database)
            .map(|d| d.owner.clone()))
    }

    async fn create_database(&self, database: &str, owner: &str) -> Result<StepOutcome> {
        self.read();
        let mut state = self.state.lock().unwrap();
        if state.databases.contains_key(database) {
            return Ok(StepOutcome::AlreadySatisfied);
        }
        state
            .databases
            .insert(database.to_string(), fresh_database(owner));
        Ok(StepOutcome::Applied)
    }

    async fn set_database_owner(&self, database: &str, role: &str) -> Result<()> {
        self.tick(Fault::AlterOwner)?;
        let mut state = self.state.lock().unwrap();
        let db = state
            .databases
            .get_mut(database)
            .ok_or_else(|| denied("owner"))?;
        db.owner = role.to_string();
        Ok(())
    }

    async fn schema_owner(&self, database: &str, schema: &str) -> Result<Option<String>> {
        self.tick(Fault::ReadSchemaOwner)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .databases
            .get(database)
            .and_then(|d| d.schemas.get(schema))
            .map(|s| s.owner.clone()))
    }

    async fn set_schema_owner(&self, database: &str, schema: &str, role: &str) -> Result<()> {
        self.tick(Fault::AlterOwner)?;
        let mut state = self.state.lock().unwrap();
        let s = state
            .databases
            .get_mut(database)
            .and_then(|d| d.schemas.get_mut(schema))
            .ok_or_else(|| denied("schema-owner"))?;
        s.owner = role.to_string();
        Ok(())
    }

    async fn schema_grants_held(&self, database: &str, schema: &str, role: &str) -> Result<bool> {
        self.read();
        let state = self.state.lock().unwrap();
        let s = state
            .databases
            .get(database)
            .and_then(|d| d.schemas.get(schema))
            .ok_or_else(|| denied("grant"))?;
        Ok(s.owner == role || s.grants.contains(role))
    }

    async fn grant_schema(&self, database: &str, schema: &str, role: &str) -> Result<()> {
        self.tick(Fault::Grant)?;
        let mut state = self.state.lock().unwrap();
        let s = state
            .databases
            .get_mut(database)
            .and_then(|d| d.schemas.get_mut(schema))
            .ok_or_else(|| denied("grant"))?;
        s.grants.insert(role.to_string());
        Ok(())
    }
}
