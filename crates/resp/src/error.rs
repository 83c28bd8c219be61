//! Error types for RESP parsing and encoding.

use thiserror::Error;

/// Main error type for RESP operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RespError {
	/// Error during parsing
	#[error("Parse error: {0}")]
	Parse(#[from] ParseError),

	/// Error during encoding
	#[error("Encode error: {0}")]
	Encode(#[from] EncodeError),
}

/// Errors that can occur during RESP parsing.
///
/// `Incomplete` is only produced by the one-shot [`crate::parse`] helper.
/// The streaming APIs report missing bytes through
/// [`crate::RespParseResult::Incomplete`] instead, since running out of
/// buffered data is not a fault.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
	/// Not enough buffered bytes for a complete value
	#[error("Incomplete input")]
	Incomplete,

	/// The first byte of a value is not a RESP2 type marker
	#[error("Invalid leading byte: 0x{0:02X}")]
	InvalidLeadingByte(u8),

	/// A CR or LF inside a line-oriented value
	#[error("Invalid symbol in line: 0x{0:02X}")]
	InvalidSymbol(u8),

	/// A length or integer that is not a base-10 signed integer
	#[error("Non-numeric value: {0:?}")]
	NonNumericValue(String),

	/// Bulk string length below -1
	#[error("Invalid bulk string size: {0}")]
	InvalidBulkStringSize(i64),

	/// Array count below -1
	#[error("Invalid array size: {0}")]
	InvalidArraySize(i64),

	/// Bulk payload not followed by CRLF at the declared offset
	#[error("Bulk string size does not match its terminator")]
	SizeMismatch,

	/// Arrays nested deeper than [`crate::MAX_DEPTH`]
	#[error("Arrays nested deeper than {0} levels")]
	NestingTooDeep(usize),
}

/// Errors that can occur during RESP encoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
	/// Value cannot be represented on the wire
	#[error("Invalid value: {0}")]
	InvalidValue(String),
}
