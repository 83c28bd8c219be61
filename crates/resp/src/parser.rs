//! RESP2 parser: a stateless translator over byte slices and a streaming
//! parser that keeps partial arrays across reads.

use std::ops::Range;

use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;

use crate::error::ParseError;
use crate::error::RespError;
use crate::types::RespValue;
use crate::utils::*;

/// Result of a parsing attempt.
#[derive(Debug)]
pub enum RespParseResult {
	/// A complete RESP value was parsed.
	Complete(RespValue),
	/// The buffer does not contain enough data to parse a complete value.
	Incomplete,
	/// An error occurred during parsing.
	Error(RespError),
}

/// One lexical unit at the start of a buffer.
#[derive(Debug)]
enum Token {
	/// A finished scalar (or null / empty aggregate)
	Value(RespValue),
	/// Bulk payload located at this byte range of the buffer
	Bulk(Range<usize>),
	/// Start of an array with this many elements
	ArrayHeader(usize),
}

/// Read one token at the start of `buf`.
///
/// Returns the token and the number of bytes it spans. Nothing is consumed;
/// `Ok(None)` means the token is not fully buffered yet.
fn next_token(buf: &[u8]) -> Result<Option<(Token, usize)>, ParseError> {
	let Some(&marker) = buf.first() else {
		return Ok(None);
	};
	if !matches!(
		marker,
		SIMPLE_STRING | ERROR | INTEGER | BULK_STRING | ARRAY
	) {
		return Err(ParseError::InvalidLeadingByte(marker));
	}

	let Some((line, line_len)) = find_line(&buf[1..])? else {
		return Ok(None);
	};
	let header_len = 1 + line_len;

	let token = match marker {
		SIMPLE_STRING => Token::Value(RespValue::SimpleString(Bytes::copy_from_slice(line))),
		ERROR => Token::Value(RespValue::Error(Bytes::copy_from_slice(line))),
		INTEGER => Token::Value(RespValue::Integer(parse_integer(line)?)),
		BULK_STRING => {
			let length = parse_integer(line)?;
			if length == -1 {
				return Ok(Some((Token::Value(RespValue::Null), header_len)));
			}
			if !(0..=MAX_BULK_LEN).contains(&length) {
				return Err(ParseError::InvalidBulkStringSize(length));
			}

			let payload = header_len..header_len + length as usize;
			let total = payload.end + CRLF.len();
			if buf.len() < total {
				return Ok(None);
			}
			if &buf[payload.end..total] != CRLF {
				return Err(ParseError::SizeMismatch);
			}
			return Ok(Some((Token::Bulk(payload), total)));
		}
		ARRAY => match parse_integer(line)? {
			-1 => Token::Value(RespValue::NullArray),
			0 => Token::Value(RespValue::Array(Vec::new())),
			n if n < -1 => return Err(ParseError::InvalidArraySize(n)),
			n => Token::ArrayHeader(n as usize),
		},
		_ => unreachable!("type marker checked above"),
	};
	Ok(Some((token, header_len)))
}

/// Parse one complete value from the start of `buf` without consuming it.
///
/// This is the pure translator: `Ok(Some((value, consumed)))` on success,
/// `Ok(None)` when more bytes are needed, `Err` on malformed input. Arrays
/// are parsed recursively, at most [`MAX_DEPTH`] levels deep; an incomplete
/// element makes the whole value incomplete.
pub fn parse_slice(buf: &[u8]) -> Result<Option<(RespValue, usize)>, ParseError> {
	parse_nested(buf, 0)
}

fn parse_nested(buf: &[u8], depth: usize) -> Result<Option<(RespValue, usize)>, ParseError> {
	let Some((token, mut consumed)) = next_token(buf)? else {
		return Ok(None);
	};

	match token {
		Token::Value(value) => Ok(Some((value, consumed))),
		Token::Bulk(payload) => Ok(Some((
			RespValue::BulkString(Bytes::copy_from_slice(&buf[payload])),
			consumed,
		))),
		Token::ArrayHeader(count) => {
			if depth >= MAX_DEPTH {
				return Err(ParseError::NestingTooDeep(MAX_DEPTH));
			}
			let mut elements = Vec::with_capacity(count.min(MAX_PREALLOC));
			for _ in 0..count {
				let Some((element, used)) = parse_nested(&buf[consumed..], depth + 1)? else {
					return Ok(None);
				};
				elements.push(element);
				consumed += used;
			}
			Ok(Some((RespValue::Array(elements), consumed)))
		}
	}
}

/// A stateful RESP parser that supports streaming.
///
/// Bytes are consumed from the caller's buffer one complete token at a
/// time. Array elements that are already decoded are kept on an internal
/// frame stack, so a value split across many reads is never re-parsed from
/// its start. After a parse error the parser stays failed and reports the
/// same error on every further call.
#[derive(Debug, Default)]
pub struct RespParser {
	frames: Vec<Frame>,
	failed: Option<RespError>,
}

#[derive(Debug)]
struct Frame {
	expected: usize,
	elements: Vec<RespValue>,
}

impl RespParser {
	pub fn new() -> Self {
		Self::default()
	}

	/// Parse a RESP value from a mutable BytesMut buffer.
	///
	/// If successful, consumes the parsed bytes and returns
	/// `RespParseResult::Complete(value)`. If incomplete, returns
	/// `RespParseResult::Incomplete`; bytes of an unfinished token stay in
	/// the buffer. If an error occurs, returns `RespParseResult::Error(error)`.
	pub fn parse(&mut self, buf: &mut BytesMut) -> RespParseResult {
		if let Some(e) = &self.failed {
			return RespParseResult::Error(e.clone());
		}

		loop {
			let (token, consumed) = match next_token(buf) {
				Ok(Some(found)) => found,
				Ok(None) => return RespParseResult::Incomplete,
				Err(e) => return self.fail(e),
			};

			let value = match token {
				Token::Value(value) => {
					buf.advance(consumed);
					value
				}
				Token::Bulk(payload) => {
					buf.advance(payload.start);
					let data = buf.split_to(payload.len()).freeze();
					buf.advance(consumed - payload.end);
					RespValue::BulkString(data)
				}
				Token::ArrayHeader(count) => {
					if self.frames.len() >= MAX_DEPTH {
						return self.fail(ParseError::NestingTooDeep(MAX_DEPTH));
					}
					buf.advance(consumed);
					self.frames.push(Frame {
						expected: count,
						elements: Vec::with_capacity(count.min(MAX_PREALLOC)),
					});
					continue;
				}
			};

			if let Some(root) = self.absorb(value) {
				return RespParseResult::Complete(root);
			}
		}
	}

	fn fail(&mut self, e: ParseError) -> RespParseResult {
		let e = RespError::Parse(e);
		self.frames.clear();
		self.failed = Some(e.clone());
		RespParseResult::Error(e)
	}

	/// Whether no partially decoded value is held.
	pub fn is_idle(&self) -> bool {
		self.frames.is_empty()
	}

	/// Whether a parse error has been reported.
	pub fn is_failed(&self) -> bool {
		self.failed.is_some()
	}

	// Push a finished value into the innermost open array, closing every
	// array it completes. Returns the root value once the stack is empty.
	fn absorb(&mut self, mut value: RespValue) -> Option<RespValue> {
		loop {
			let Some(frame) = self.frames.last_mut() else {
				return Some(value);
			};
			frame.elements.push(value);
			if frame.elements.len() < frame.expected {
				return None;
			}
			value = RespValue::Array(std::mem::take(&mut frame.elements));
			self.frames.pop();
		}
	}
}

/// Convenience function for one-off parsing.
///
/// Consumes the bytes of the value on success. On `ParseError::Incomplete`
/// the buffer is left untouched so it can be retried once more data has
/// been appended. If streaming is needed, use `RespParser` directly.
pub fn parse(buf: &mut BytesMut) -> Result<RespValue, ParseError> {
	match parse_slice(buf)? {
		Some((value, consumed)) => {
			buf.advance(consumed);
			Ok(value)
		}
		None => Err(ParseError::Incomplete),
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[test]
	fn test_parse_simple_string() {
		let mut buf = BytesMut::from(&b"+OK\r\n"[..]);
		let value = parse(&mut buf).unwrap();
		assert_eq!(value, RespValue::SimpleString(Bytes::from("OK")));
		assert!(buf.is_empty());
	}

	#[test]
	fn test_parse_error() {
		let mut buf = BytesMut::from(&b"-ERR unknown command\r\n"[..]);
		let value = parse(&mut buf).unwrap();
		assert_eq!(value, RespValue::Error(Bytes::from("ERR unknown command")));
	}

	#[test]
	fn test_parse_integer() {
		let mut buf = BytesMut::from(&b":-1000\r\n"[..]);
		let value = parse(&mut buf).unwrap();
		assert_eq!(value, RespValue::Integer(-1000));
	}

	#[test]
	fn test_parse_bulk_string_with_crlf_payload() {
		let mut buf = BytesMut::from(&b"$4\r\na\r\nb\r\n"[..]);
		let value = parse(&mut buf).unwrap();
		assert_eq!(value, RespValue::BulkString(Bytes::from_static(b"a\r\nb")));
	}

	#[test]
	fn test_parse_array() {
		let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"[..]);
		let value = parse(&mut buf).unwrap();
		assert_eq!(
			value,
			RespValue::Array(vec![
				RespValue::BulkString(Bytes::from("foo")),
				RespValue::BulkString(Bytes::from("bar")),
			])
		);
	}

	#[test]
	fn test_incomplete_leaves_buffer_untouched() {
		let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
		assert_eq!(parse(&mut buf), Err(ParseError::Incomplete));
		assert_eq!(&buf[..], b"*2\r\n$3\r\nfoo\r\n$3\r\nba");
	}

	#[rstest]
	#[case(b"")]
	#[case(b"+")]
	#[case(b"+OK")]
	#[case(b"+OK\r")]
	#[case(b":12")]
	#[case(b"$5\r\nhel")]
	#[case(b"$5\r\nhello")]
	#[case(b"$5\r\nhello\r")]
	#[case(b"*1\r\n")]
	#[case(b"*2\r\n:1\r\n")]
	fn test_parse_slice_incomplete(#[case] input: &[u8]) {
		assert_eq!(parse_slice(input), Ok(None));
	}

	#[rstest]
	#[case(b"@foo\r\n", ParseError::InvalidLeadingByte(b'@'))]
	#[case(b"+O\nK\r\n", ParseError::InvalidSymbol(b'\n'))]
	#[case(b"-E\rR\r\n", ParseError::InvalidSymbol(b'\r'))]
	#[case(b":12x\r\n", ParseError::NonNumericValue("12x".into()))]
	#[case(b"$abc\r\n", ParseError::NonNumericValue("abc".into()))]
	#[case(b"$-2\r\nxx\r\n", ParseError::InvalidBulkStringSize(-2))]
	#[case(b"$3\r\nfoobar\r\n", ParseError::SizeMismatch)]
	#[case(b"*-5\r\n", ParseError::InvalidArraySize(-5))]
	#[case(b"*1\r\n!\r\n", ParseError::InvalidLeadingByte(b'!'))]
	fn test_parse_slice_malformed(#[case] input: &[u8], #[case] expected: ParseError) {
		assert_eq!(parse_slice(input), Err(expected));
	}

	fn nested(depth: usize) -> Vec<u8> {
		let mut input = b"*1\r\n".repeat(depth);
		input.extend_from_slice(b":1\r\n");
		input
	}

	#[rstest]
	#[case(1, true)]
	#[case(MAX_DEPTH, true)]
	#[case(MAX_DEPTH + 1, false)]
	#[case(100_000, false)]
	fn test_nesting_limit(#[case] depth: usize, #[case] accepted: bool) {
		let input = nested(depth);

		let sliced = parse_slice(&input);
		let mut parser = RespParser::new();
		let mut buf = BytesMut::from(&input[..]);
		let streamed = parser.parse(&mut buf);

		if accepted {
			assert!(matches!(sliced, Ok(Some((_, n))) if n == input.len()));
			assert!(matches!(streamed, RespParseResult::Complete(_)));
		} else {
			assert_eq!(sliced, Err(ParseError::NestingTooDeep(MAX_DEPTH)));
			assert!(matches!(
				streamed,
				RespParseResult::Error(RespError::Parse(ParseError::NestingTooDeep(MAX_DEPTH)))
			));
			assert!(parser.is_failed());
		}
	}

	#[test]
	fn test_parser_keeps_siblings_across_calls() {
		let mut parser = RespParser::new();
		let mut buf = BytesMut::from(&b"*3\r\n:1\r\n$3\r\nfo"[..]);

		assert!(matches!(parser.parse(&mut buf), RespParseResult::Incomplete));
		// The header and the first element are consumed; only the partial
		// bulk string remains buffered.
		assert_eq!(&buf[..], b"$3\r\nfo");
		assert!(!parser.is_idle());

		buf.extend_from_slice(b"o\r\n+end\r\n");
		match parser.parse(&mut buf) {
			RespParseResult::Complete(value) => assert_eq!(
				value,
				RespValue::array(vec![
					RespValue::integer(1),
					RespValue::bulk_string("foo"),
					RespValue::simple_string("end"),
				])
			),
			other => panic!("Expected Complete, got {:?}", other),
		}
		assert!(parser.is_idle());
		assert!(buf.is_empty());
	}

	#[test]
	fn test_parser_stays_failed() {
		let mut parser = RespParser::new();
		let mut buf = BytesMut::from(&b"@bad\r\n"[..]);
		assert!(matches!(parser.parse(&mut buf), RespParseResult::Error(_)));
		assert!(parser.is_failed());

		let mut fresh = BytesMut::from(&b"+OK\r\n"[..]);
		assert!(matches!(
			parser.parse(&mut fresh),
			RespParseResult::Error(RespError::Parse(ParseError::InvalidLeadingByte(b'@')))
		));
	}
}
