pub mod config;
pub mod db;
pub mod graph;
pub mod plan;
pub mod status;
pub mod up;
