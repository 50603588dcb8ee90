pub mod define;
pub mod errors;
pub mod writer;

pub use writer::ResponseWriter;
