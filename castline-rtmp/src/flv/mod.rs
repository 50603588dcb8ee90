pub mod define;
pub mod errors;
pub mod muxer;

pub use muxer::{FlvMuxer, FlvTag, MediaKind};
