//! RTMP ingest codec.
//!
//! Server-side handshake, chunk stream (un)packetizing, AMF0 command
//! decoding, control/command response writers and FLV tag muxing.

pub mod amf0;
pub mod bytesio;
pub mod chunk;
pub mod flv;
pub mod handshake;
pub mod messages;
pub mod netconnection;
