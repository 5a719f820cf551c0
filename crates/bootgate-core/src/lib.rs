pub mod bootstrap;
pub mod config;
pub mod error;
pub mod graph;
pub mod host;
pub mod io;
pub mod launch;
pub mod migrate;
pub mod probe;
pub mod reconcile;
pub mod secrets;
pub mod status;
pub mod supervisor;
pub mod target;
pub mod unit;

pub use error::{BootgateError, Result};
