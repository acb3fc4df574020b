pub mod event_models;
pub mod exchange;
pub mod parser;
pub mod reader;

pub use event_models::*;
pub use exchange::ExchangeParser;
pub use parser::parse_line;
pub use reader::{LogTailer, TailPoll};
