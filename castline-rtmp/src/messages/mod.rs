pub mod define;
pub mod errors;
pub mod parser;

pub use define::RtmpMessage;
pub use parser::MessageParser;
