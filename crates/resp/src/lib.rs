//! # RESP - Redis Serialization Protocol Library
//!
//! A RESP2 parser and encoder built for client connections that read from a
//! fragmented byte stream.
//!
//! ## Features
//!
//! - **Streaming parsing**: `RespParser` keeps partially decoded arrays
//!   between reads and only consumes complete tokens
//! - **Zero-copy bulk strings**: payloads are split off the read buffer as
//!   `Bytes`
//! - **Explicit outcomes**: incomplete input is a result, not an error
//! - **Direct command encoding**: commands are written as bulk-string arrays
//!   without building intermediate values
//!
//! ## Example
//!
//! ```rust
//! use resp::RespValue;
//! use bytes::BytesMut;
//!
//! // Parse a response
//! let mut buf = BytesMut::from(&b"+OK\r\n"[..]);
//! let response = resp::parse(&mut buf).unwrap();
//! assert_eq!(response.as_str(), Some("OK"));
//! ```

mod encode;
mod error;
mod parser;
mod types;
mod utils;

pub use encode::RespEncoder;
pub use encode::encode_command;
pub use error::EncodeError;
pub use error::ParseError;
pub use error::RespError;
pub use parser::RespParseResult;
pub use parser::RespParser;
pub use parser::parse;
pub use parser::parse_slice;
pub use types::RespValue;
pub use utils::MAX_DEPTH;
