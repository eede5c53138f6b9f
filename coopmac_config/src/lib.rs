pub mod config;
pub mod types;

pub use config::{
    AccessMode, AckPolicy, ArqConfig, CombiningConfig, ConfigError, CsmaConfig, NodeConfig,
};
pub use types::node_id::NodeID;
