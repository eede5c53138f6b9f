use coopmac_config::NodeID;
use serde::{Deserialize, Serialize};

use super::{AckInfo, FrameKey, FrameType, MacHeader, Payload, PhyHeader};
use crate::seq::SeqNum;

#[derive(Debug)]
pub enum FrameError {
    Encode(bincode::Error),
    Decode(bincode::Error),
    MissingAckInfo,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "[FrameError]: could not encode frame: {}", e),
            Self::Decode(e) => write!(f, "[FrameError]: could not decode frame: {}", e),
            Self::MissingAckInfo => write!(f, "[FrameError]: ACK frame without ACK info"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Frame {
    mac: MacHeader,
    phy: PhyHeader,
    payload: Payload,
}

impl Frame {
    pub fn mac(&self) -> &MacHeader {
        &self.mac
    }
    pub fn phy(&self) -> &PhyHeader {
        &self.phy
    }
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
    pub fn frame_type(&self) -> FrameType {
        self.mac.frame_type
    }
    pub fn source(&self) -> NodeID {
        self.mac.source
    }
    pub fn destination(&self) -> NodeID {
        self.mac.destination
    }
    pub fn seq(&self) -> SeqNum {
        self.mac.seq
    }
    pub fn sender(&self) -> NodeID {
        self.phy.sender
    }
    pub fn key(&self) -> FrameKey {
        self.mac.key()
    }

    pub fn ack_info(&self) -> Result<&AckInfo, FrameError> {
        self.phy.ack.as_ref().ok_or(FrameError::MissingAckInfo)
    }

    /// A copy of this frame as re-sent by `sender`, headers otherwise untouched.
    pub fn relayed_by(&self, sender: NodeID) -> Frame {
        let mut frame = self.clone();
        frame.phy.sender = sender;
        frame
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn deserialize_from(bytes: &[u8]) -> Result<Frame, FrameError> {
        bincode::deserialize(bytes).map_err(FrameError::Decode)
    }

    pub fn serialize_into(&self) -> Result<Vec<u8>, FrameError> {
        bincode::serialize(self).map_err(FrameError::Encode)
    }
}

#[derive(Default)]
pub struct FrameBuilder {
    mac: MacHeader,
    phy: PhyHeader,
    payload: Payload,
}

impl FrameBuilder {
    pub fn new(frame_type: FrameType) -> Self {
        FrameBuilder {
            mac: MacHeader {
                frame_type,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn data() -> Self {
        Self::new(FrameType::Data)
    }

    pub fn ack(info: AckInfo) -> Self {
        let mut builder = Self::new(FrameType::Ack);
        builder.phy.ack = Some(info);
        builder
    }

    pub fn source(mut self, source: NodeID) -> Self {
        self.mac.source = source;
        self
    }

    pub fn destination(mut self, destination: NodeID) -> Self {
        self.mac.destination = destination;
        self
    }

    pub fn seq(mut self, seq: SeqNum) -> Self {
        self.mac.seq = seq;
        self
    }

    pub fn sender(mut self, sender: NodeID) -> Self {
        self.phy.sender = sender;
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.phy.retry = retry;
        self
    }

    pub fn generation(mut self, generation: u8) -> Self {
        self.phy.generation = generation;
        self
    }

    pub fn send_window(mut self, send_window: u16) -> Self {
        self.phy.send_window = send_window;
        self
    }

    pub fn ack_modes(mut self, continuous: bool, block: bool) -> Self {
        self.phy.continuous_ack_enabled = continuous;
        self.phy.block_ack_enabled = block;
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload = Payload::zeroed(size);
        self
    }

    pub fn build(self) -> Frame {
        Frame {
            mac: self.mac,
            phy: self.phy,
            payload: self.payload,
        }
    }
}
