pub mod node_id;
pub mod units;
