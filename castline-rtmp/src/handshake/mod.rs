pub mod define;
pub mod errors;
pub mod handshake_server;

pub use handshake_server::{accept, HandshakeServer};
