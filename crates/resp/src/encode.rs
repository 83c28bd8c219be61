use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use crate::RespValue;
use crate::error::EncodeError;
use crate::utils::*;

/// Trait for encoding RESP values.
pub trait RespEncoder {
	fn encode_to(&self, buf: &mut BytesMut) -> Result<(), EncodeError>;

	fn encode(&self) -> Result<Bytes, EncodeError> {
		let mut buf = BytesMut::new();
		self.encode_to(&mut buf)?;
		Ok(buf.freeze())
	}
}

impl RespEncoder for RespValue {
	fn encode_to(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
		match self {
			RespValue::SimpleString(s) => encode_line(buf, SIMPLE_STRING, s)?,
			RespValue::Error(e) => encode_line(buf, ERROR, e)?,
			RespValue::Integer(i) => encode_integer(buf, *i),
			RespValue::BulkString(s) => encode_bulk_string(buf, s),
			RespValue::Array(arr) => encode_array(buf, arr)?,
			RespValue::Null => encode_null(buf, BULK_STRING),
			RespValue::NullArray => encode_null(buf, ARRAY),
		}
		Ok(())
	}
}

/// Write a command as an array of bulk strings straight into `buf`.
///
/// `name` is the command keyword, `args` its arguments. No intermediate
/// [`RespValue`] is built.
pub fn encode_command<A: AsRef<[u8]>>(buf: &mut BytesMut, name: &[u8], args: &[A]) {
	encode_length(buf, ARRAY, args.len() + 1);
	encode_bulk_string(buf, name);
	for arg in args {
		encode_bulk_string(buf, arg.as_ref());
	}
}

#[inline]
fn encode_line(buf: &mut BytesMut, marker: u8, s: &[u8]) -> Result<(), EncodeError> {
	if !is_valid_line(s) {
		return Err(EncodeError::InvalidValue(format!(
			"line value may not contain CR or LF: {:?}",
			String::from_utf8_lossy(s)
		)));
	}
	buf.put_u8(marker);
	buf.put_slice(s);
	buf.put_slice(CRLF);
	Ok(())
}

#[inline]
fn encode_integer(buf: &mut BytesMut, i: i64) {
	buf.put_u8(INTEGER);
	buf.put_slice(i.to_string().as_bytes());
	buf.put_slice(CRLF);
}

#[inline]
fn encode_length(buf: &mut BytesMut, marker: u8, length: usize) {
	buf.put_u8(marker);
	buf.put_slice(length.to_string().as_bytes());
	buf.put_slice(CRLF);
}

#[inline]
fn encode_bulk_string(buf: &mut BytesMut, s: &[u8]) {
	encode_length(buf, BULK_STRING, s.len());
	buf.put_slice(s);
	buf.put_slice(CRLF);
}

fn encode_array(buf: &mut BytesMut, arr: &[RespValue]) -> Result<(), EncodeError> {
	encode_length(buf, ARRAY, arr.len());
	for value in arr {
		value.encode_to(buf)?;
	}
	Ok(())
}

#[inline]
fn encode_null(buf: &mut BytesMut, marker: u8) {
	buf.put_u8(marker);
	buf.put_slice(b"-1");
	buf.put_slice(CRLF);
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[test]
	fn test_encode_simple_string() {
		let val = RespValue::SimpleString(Bytes::from_static(b"OK"));
		let encoded = val.encode().unwrap();
		assert_eq!(encoded, b"+OK\r\n".as_slice());
	}

	#[test]
	fn test_encode_error() {
		let val = RespValue::Error(Bytes::from_static(b"ERR"));
		let encoded = val.encode().unwrap();
		assert_eq!(encoded, b"-ERR\r\n".as_slice());
	}

	#[rstest]
	#[case(RespValue::simple_string("O\r\nK"))]
	#[case(RespValue::error("line\nbreak"))]
	#[case(RespValue::array(vec![RespValue::simple_string("a\rb")]))]
	fn test_encode_rejects_line_breaks(#[case] val: RespValue) {
		assert!(matches!(val.encode(), Err(EncodeError::InvalidValue(_))));
	}

	#[rstest]
	#[case(100, b":100\r\n")]
	#[case(-100, b":-100\r\n")]
	#[case(0, b":0\r\n")]
	fn test_encode_integer(#[case] input: i64, #[case] expected: &[u8]) {
		let val = RespValue::Integer(input);
		let encoded = val.encode().unwrap();
		assert_eq!(encoded, expected);
	}

	#[test]
	fn test_encode_bulk_string() {
		let val = RespValue::BulkString(Bytes::from_static(b"hello"));
		let encoded = val.encode().unwrap();
		assert_eq!(encoded, b"$5\r\nhello\r\n".as_slice());
	}

	#[test]
	fn test_encode_bulk_string_empty() {
		let val = RespValue::BulkString(Bytes::new());
		let encoded = val.encode().unwrap();
		assert_eq!(encoded, b"$0\r\n\r\n".as_slice());
	}

	#[test]
	fn test_encode_array() {
		let val = RespValue::Array(vec![
			RespValue::SimpleString(Bytes::from_static(b"hello")),
			RespValue::Integer(42),
		]);
		let encoded = val.encode().unwrap();
		assert_eq!(encoded, b"*2\r\n+hello\r\n:42\r\n".as_slice());
	}

	#[test]
	fn test_encode_array_empty() {
		let val = RespValue::Array(vec![]);
		let encoded = val.encode().unwrap();
		assert_eq!(encoded, b"*0\r\n".as_slice());
	}

	#[test]
	fn test_encode_nulls() {
		assert_eq!(RespValue::Null.encode().unwrap(), b"$-1\r\n".as_slice());
		assert_eq!(RespValue::NullArray.encode().unwrap(), b"*-1\r\n".as_slice());
	}

	#[test]
	fn test_encode_command() {
		let mut buf = BytesMut::new();
		encode_command(&mut buf, b"SET", &[&b"key"[..], &b"value"[..]]);
		assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
	}

	#[test]
	fn test_encode_command_without_args() {
		let mut buf = BytesMut::new();
		encode_command::<Bytes>(&mut buf, b"QUIT", &[]);
		assert_eq!(&buf[..], b"*1\r\n$4\r\nQUIT\r\n");
	}
}
