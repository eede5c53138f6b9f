pub mod arq;
pub mod frame;
pub mod mac;
pub mod phy;
pub mod reconstruction;
pub mod seq;
pub mod stats;
pub mod timer;
pub mod util;

pub use arq::ArqManager;
pub use coopmac_config::{NodeConfig, NodeID};
pub use frame::{Frame, Payload};
pub use mac::ChannelAccess;
pub use phy::{LinkEnv, Phy, RateControl, UpperLayer};
