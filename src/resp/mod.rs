pub mod parser;
pub mod types;
pub mod writer;

pub use parser::parse;
pub use types::RespValue;
pub use writer::{encode_command_str, encode_named_command};
