//! The database a host bootstraps and migrates.

use crate::error::{BootgateError, Result};
use crate::secrets::{SecretString, Secrets};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseTarget {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Primary database name.
    pub primary: String,
    /// Shadow database the migration tool diffs against.
    pub shadow: String,
    /// Login role that owns both databases.
    pub role: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Secret holding the role's password.
    pub password_secret: String,
    /// Secret holding a superuser connection URL used for bootstrap.
    pub admin_url_secret: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

impl DatabaseTarget {
    /// `host:port`, used for probing and log fields. IPv6 hosts are bracketed.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bracketed_host(), self.port)
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    pub fn databases(&self) -> [&str; 2] {
        [self.primary.as_str(), self.shadow.as_str()]
    }

    pub fn secret_names(&self) -> Vec<String> {
        vec![self.password_secret.clone(), self.admin_url_secret.clone()]
    }

    /// Check every name that ends up spliced into SQL.
    pub fn validate(&self) -> Result<()> {
        for ident in [&self.primary, &self.shadow, &self.role, &self.schema] {
            validate_identifier(ident)?;
        }
        if self.primary == self.shadow {
            return Err(BootgateError::InvalidConfig(format!(
                "primary and shadow database must differ (both '{}')",
                self.primary
            )));
        }
        Ok(())
    }

    /// Application connection string for `database` as the login role.
    pub fn connection_url(&self, database: &str, password: &SecretString) -> Result<SecretString> {
        let mut url = Url::parse(&format!("postgres://{}", self.address()))?;
        url.set_username(&self.role).map_err(|_| {
            BootgateError::InvalidConfig(format!("cannot use role '{}' in a URL", self.role))
        })?;
        url.set_password(Some(password.expose())).map_err(|_| {
            BootgateError::InvalidConfig("cannot encode password in a URL".to_string())
        })?;
        url.set_path(&format!("/{database}"));
        Ok(SecretString::new(url.to_string()))
    }

    /// Resolve both application connection strings from `secrets`.
    pub fn connection_strings(&self, secrets: &Secrets) -> Result<ConnectionStrings> {
        let password = secrets.get(&self.password_secret)?;
        Ok(ConnectionStrings {
            primary: self.connection_url(&self.primary, password)?,
            shadow: self.connection_url(&self.shadow, password)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStrings {
    pub primary: SecretString,
    pub shadow: SecretString,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"))
}

pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(BootgateError::InvalidIdentifier(name.to_string()))
    }
}

/// Double-quote a validated identifier.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// Single-quote a string literal for statements that cannot take bind
/// parameters (`ALTER ROLE ... PASSWORD`).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
