//! Utility functions and constants for RESP protocol.

use crate::error::ParseError;

/// CRLF line ending
pub const CRLF: &[u8] = b"\r\n";

/// Type markers for RESP2
pub const SIMPLE_STRING: u8 = b'+';
pub const ERROR: u8 = b'-';
pub const INTEGER: u8 = b':';
pub const BULK_STRING: u8 = b'$';
pub const ARRAY: u8 = b'*';

/// Largest bulk payload accepted from the wire (matches the default
/// `proto-max-bulk-len` of Redis).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound for capacity reserved up front from a declared array count.
pub const MAX_PREALLOC: usize = 1024;

/// Deepest array nesting accepted from the wire. Values are built and
/// dropped recursively, so unbounded nesting would exhaust the stack.
pub const MAX_DEPTH: usize = 512;

/// Find the first line in `buf`.
///
/// Returns the line content (without CRLF) and the number of bytes the line
/// occupies including its terminator, or `None` if the terminator has not
/// arrived yet. The first CR or LF in the buffer must be the start of a
/// CRLF pair; anything else is a forbidden symbol inside the line.
#[inline]
pub fn find_line(buf: &[u8]) -> Result<Option<(&[u8], usize)>, ParseError> {
	match memchr::memchr2(b'\r', b'\n', buf) {
		None => Ok(None),
		Some(pos) if buf[pos] == b'\n' => Err(ParseError::InvalidSymbol(b'\n')),
		Some(pos) => match buf.get(pos + 1) {
			None => Ok(None),
			Some(b'\n') => Ok(Some((&buf[..pos], pos + 2))),
			Some(_) => Err(ParseError::InvalidSymbol(b'\r')),
		},
	}
}

/// Parse a base-10 signed integer: an optional `-` followed by ASCII digits.
#[inline]
pub fn parse_integer(buf: &[u8]) -> Result<i64, ParseError> {
	let non_numeric = || ParseError::NonNumericValue(String::from_utf8_lossy(buf).into_owned());

	let (negative, digits) = match buf.split_first() {
		Some((b'-', rest)) => (true, rest),
		_ => (false, buf),
	};
	if digits.is_empty() {
		return Err(non_numeric());
	}

	let mut value: i64 = 0;
	for &byte in digits {
		if !byte.is_ascii_digit() {
			return Err(non_numeric());
		}
		let digit = (byte - b'0') as i64;
		// Accumulate towards the sign so that i64::MIN parses without overflow.
		value = value
			.checked_mul(10)
			.and_then(|v| {
				if negative {
					v.checked_sub(digit)
				} else {
					v.checked_add(digit)
				}
			})
			.ok_or_else(non_numeric)?;
	}
	Ok(value)
}

/// Check whether a line-oriented payload can be written as-is.
#[inline]
pub fn is_valid_line(buf: &[u8]) -> bool {
	memchr::memchr2(b'\r', b'\n', buf).is_none()
}
