pub mod frame;
pub mod header;
pub mod payload;

pub use frame::{Frame, FrameBuilder, FrameError};
pub use header::{
    AckInfo, AckResolution, BlockAckBitmap, FrameKey, FrameType, MacHeader, PhyHeader,
    BLOCK_ACK_SIZE,
};
pub use payload::Payload;
