//! Configuration for gather.toml
//!
//! Settings for the built-in gatherers and the cluster client. Every field
//! has a default, so an empty or missing file is a valid configuration.

mod parser;
mod schema;

pub use parser::{default_config_path, load_config, load_default_config, parse_config_str};
pub use schema::{ClusterConfig, GatherConfig, GitConfig, HttpConfig};
