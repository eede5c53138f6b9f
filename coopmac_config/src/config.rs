use serde::Deserialize;
use std::time::Duration;

use crate::types::node_id::NodeID;
use crate::types::units::{deserialize_duration, deserialize_size};

// NOTE: Sequence numbers are compared circularly within a window of 4096,
// the send window has to stay well inside of that.
pub const MAX_SEND_WINDOW: u16 = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    ZeroSendWindow,
    SendWindowTooLarge(u16),
    ZeroQueueCapacity,
    ZeroPayloadSize,
    InvalidContentionWindow { min: u32, max: u32 },
    ZeroSlotTime,
    InvalidTdmaSlot { slot_index: u16, slots_per_frame: u16 },
    InvalidErrorThreshold(f64),
    ZeroPendingCapacity,
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::ZeroSendWindow => write!(f, "[ConfigError]: send window must not be 0"),
            ConfigError::SendWindowTooLarge(w) => write!(
                f,
                "[ConfigError]: send window {} exceeds maximum of {}",
                w, MAX_SEND_WINDOW
            ),
            ConfigError::ZeroQueueCapacity => {
                write!(f, "[ConfigError]: queue capacity must not be 0")
            }
            ConfigError::ZeroPayloadSize => {
                write!(f, "[ConfigError]: max payload size must not be 0")
            }
            ConfigError::InvalidContentionWindow { min, max } => write!(
                f,
                "[ConfigError]: contention window [{}, {}] is invalid",
                min, max
            ),
            ConfigError::ZeroSlotTime => write!(f, "[ConfigError]: slot time must not be 0"),
            ConfigError::InvalidTdmaSlot {
                slot_index,
                slots_per_frame,
            } => write!(
                f,
                "[ConfigError]: slot {} does not exist in a frame of {} slots",
                slot_index, slots_per_frame
            ),
            ConfigError::InvalidErrorThreshold(t) => write!(
                f,
                "[ConfigError]: error rate threshold {} is not inside (0, 1]",
                t
            ),
            ConfigError::ZeroPendingCapacity => {
                write!(f, "[ConfigError]: pending copy capacity must not be 0")
            }
            ConfigError::Parse(s) => write!(f, "[ConfigError]: {}", s),
        }
    }
}

/// Which acknowledgement scheme the receiver side speaks and the sender side
/// evaluates. Basic ACK/NACK is always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum AckPolicy {
    #[default]
    Basic,
    Continuous,
    Block,
    ContinuousAndBlock,
}

impl AckPolicy {
    pub fn continuous_ack(&self) -> bool {
        matches!(self, AckPolicy::Continuous | AckPolicy::ContinuousAndBlock)
    }

    pub fn block_ack(&self) -> bool {
        matches!(self, AckPolicy::Block | AckPolicy::ContinuousAndBlock)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArqConfig {
    pub max_retries: u8,
    pub send_window: u16,
    /// How long the MAC waits for an immediate ACK before counting the
    /// attempt as failed.
    #[serde(deserialize_with = "deserialize_duration")]
    pub basic_timeout: Duration,
    /// ACK-await timer after which an unacknowledged frame is retransmitted.
    #[serde(deserialize_with = "deserialize_duration")]
    pub long_timeout: Duration,
    /// Aggregation period for block ACKs.
    #[serde(deserialize_with = "deserialize_duration")]
    pub block_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub nack_timeout: Duration,
    pub ack_policy: AckPolicy,
    pub nack_send: bool,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            max_retries: 7,
            send_window: 32,
            basic_timeout: Duration::from_micros(1_000),
            long_timeout: Duration::from_millis(20),
            block_timeout: Duration::from_millis(5),
            nack_timeout: Duration::from_millis(3),
            ack_policy: AckPolicy::default(),
            nack_send: false,
        }
    }
}

impl ArqConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_window == 0 {
            return Err(ConfigError::ZeroSendWindow);
        }
        if self.send_window > MAX_SEND_WINDOW {
            return Err(ConfigError::SendWindowTooLarge(self.send_window));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CsmaConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub slot_time: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub sifs: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub difs: Duration,
    pub cw_min: u32,
    pub cw_max: u32,
}

impl Default for CsmaConfig {
    fn default() -> Self {
        Self {
            slot_time: Duration::from_micros(20),
            sifs: Duration::from_micros(10),
            difs: Duration::from_micros(50),
            cw_min: 15,
            cw_max: 1023,
        }
    }
}

impl CsmaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_time.is_zero() {
            return Err(ConfigError::ZeroSlotTime);
        }
        if self.cw_min > self.cw_max {
            return Err(ConfigError::InvalidContentionWindow {
                min: self.cw_min,
                max: self.cw_max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub enum AccessMode {
    #[default]
    Csma,
    Tdma {
        slot_index: u16,
        slots_per_frame: u16,
        #[serde(deserialize_with = "deserialize_duration")]
        slot_duration: Duration,
    },
}

impl AccessMode {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            AccessMode::Csma => Ok(()),
            AccessMode::Tdma {
                slot_index,
                slots_per_frame,
                slot_duration,
            } => {
                if slot_index >= slots_per_frame {
                    return Err(ConfigError::InvalidTdmaSlot {
                        slot_index: *slot_index,
                        slots_per_frame: *slots_per_frame,
                    });
                }
                if slot_duration.is_zero() {
                    return Err(ConfigError::ZeroSlotTime);
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CombiningConfig {
    /// Copies with a link error rate above this value are not worth keeping.
    pub max_usable_error_rate: f64,
    pub max_pending: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub pending_lifetime: Duration,
}

impl Default for CombiningConfig {
    fn default() -> Self {
        Self {
            max_usable_error_rate: 0.5,
            max_pending: 32,
            pending_lifetime: Duration::from_millis(100),
        }
    }
}

impl CombiningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.max_usable_error_rate;
        if !(t > 0.0 && t <= 1.0) {
            return Err(ConfigError::InvalidErrorThreshold(t));
        }
        if self.max_pending == 0 {
            return Err(ConfigError::ZeroPendingCapacity);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: NodeID,
    /// Whether this node overhears and forwards traffic of others.
    pub relay: bool,
    pub queue_capacity: usize,
    #[serde(deserialize_with = "deserialize_size")]
    pub max_payload_size: usize,
    pub rng_seed: u64,
    pub arq: ArqConfig,
    pub csma: CsmaConfig,
    pub access: AccessMode,
    pub combining: CombiningConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: NodeID::new('A'),
            relay: false,
            queue_capacity: 64,
            max_payload_size: 1500,
            rng_seed: 0,
            arq: ArqConfig::default(),
            csma: CsmaConfig::default(),
            access: AccessMode::default(),
            combining: CombiningConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(id: NodeID) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig =
            toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.max_payload_size == 0 {
            return Err(ConfigError::ZeroPayloadSize);
        }
        self.arq.validate()?;
        self.csma.validate()?;
        self.access.validate()?;
        self.combining.validate()
    }
}
