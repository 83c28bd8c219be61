use bytes::Bytes;
use bytes::BytesMut;
use resp::ParseError;
use resp::RespEncoder;
use resp::RespError;
use resp::RespParseResult;
use resp::RespParser;
use resp::RespValue;
use rstest::rstest;

/// Feed `chunks` one at a time and collect every value the parser emits.
fn feed(chunks: &[&[u8]]) -> Vec<RespValue> {
	let mut parser = RespParser::new();
	let mut buf = BytesMut::new();
	let mut out = Vec::new();

	for chunk in chunks {
		buf.extend_from_slice(chunk);
		loop {
			match parser.parse(&mut buf) {
				RespParseResult::Complete(value) => out.push(value),
				RespParseResult::Incomplete => break,
				RespParseResult::Error(e) => panic!("unexpected parse error: {e}"),
			}
		}
	}
	assert!(buf.is_empty(), "leftover bytes: {:?}", buf);
	assert!(parser.is_idle());
	out
}

fn nested_sample() -> RespValue {
	RespValue::array(vec![
		RespValue::integer(-7),
		RespValue::array(vec![
			RespValue::bulk_string("inner"),
			RespValue::array(vec![
				RespValue::Null,
				RespValue::bulk_string(Bytes::from_static(b"bin\r\n\x00")),
				RespValue::array(vec![RespValue::integer(3), RespValue::NullArray]),
			]),
			RespValue::Array(vec![]),
		]),
		RespValue::simple_string("OK"),
		RespValue::error("ERR nope"),
	])
}

#[test]
fn test_legacy_parse_incomplete() {
	let mut buf = BytesMut::new();
	buf.extend_from_slice(b"+HEL");

	let result = resp::parse(&mut buf);
	assert!(matches!(result, Err(ParseError::Incomplete)));

	// Try again with full data
	buf.extend_from_slice(b"LO\r\n");
	let result = resp::parse(&mut buf);
	match result {
		Ok(RespValue::SimpleString(s)) => assert_eq!(s, "HELLO"),
		_ => panic!("Expected SimpleString(HELLO), got {:?}", result),
	}
}

#[test]
fn test_streaming_parse_success() {
	let mut parser = RespParser::new();
	let mut buf = BytesMut::new();

	buf.extend_from_slice(b"+HEL");
	let result = parser.parse(&mut buf);
	assert!(matches!(result, RespParseResult::Incomplete));

	// Partial line is not consumed
	assert_eq!(&buf[..], b"+HEL");

	buf.extend_from_slice(b"LO\r\n");
	let result = parser.parse(&mut buf);
	if let RespParseResult::Complete(RespValue::SimpleString(s)) = result {
		assert_eq!(s, "HELLO");
	} else {
		panic!("Expected Complete(SimpleString), got {:?}", result);
	}
}

#[test]
fn test_every_split_point_yields_same_value() {
	let value = nested_sample();
	let encoded = value.encode().unwrap();

	for split in 0..=encoded.len() {
		let (head, tail) = encoded.split_at(split);
		assert_eq!(feed(&[head, tail]), vec![value.clone()], "split at {split}");
	}
}

#[test]
fn test_byte_at_a_time() {
	let value = nested_sample();
	let encoded = value.encode().unwrap();
	let chunks: Vec<&[u8]> = encoded.chunks(1).collect();
	assert_eq!(feed(&chunks), vec![value]);
}

#[test]
fn test_three_way_split() {
	let value = nested_sample();
	let encoded = value.encode().unwrap();
	let len = encoded.len();

	for first in (0..len).step_by(3) {
		for second in (first..len).step_by(5) {
			let chunks = [&encoded[..first], &encoded[first..second], &encoded[second..]];
			assert_eq!(feed(&chunks), vec![value.clone()], "splits {first}/{second}");
		}
	}
}

#[test]
fn test_multiple_values_in_one_chunk() {
	let values = feed(&[b"+OK\r\n:1\r\n$-1\r\n*-1\r\n*0\r\n$0\r\n\r\n".as_slice()]);
	assert_eq!(
		values,
		vec![
			RespValue::simple_string("OK"),
			RespValue::integer(1),
			RespValue::Null,
			RespValue::NullArray,
			RespValue::Array(vec![]),
			RespValue::BulkString(Bytes::new()),
		]
	);
}

#[test]
fn test_fragmented_pipeline() {
	let values = feed(&[
		b"+O".as_slice(),
		b"K\r\n:1".as_slice(),
		b"00".as_slice(),
		b"0\r\n*2\r\n$3\r\nSE".as_slice(),
		b"T\r\n$3\r\nk".as_slice(),
		b"ey\r\n".as_slice(),
	]);
	assert_eq!(
		values,
		vec![
			RespValue::simple_string("OK"),
			RespValue::integer(1000),
			RespValue::array(vec![RespValue::bulk_string("SET"), RespValue::bulk_string("key")]),
		]
	);
}

#[rstest]
#[case(b"$-2\r\nxx\r\n", ParseError::InvalidBulkStringSize(-2))]
#[case(b":12x\r\n", ParseError::NonNumericValue("12x".into()))]
#[case(b"@oops\r\n", ParseError::InvalidLeadingByte(b'@'))]
#[case(b"$2\r\nabc\r\n", ParseError::SizeMismatch)]
#[case(b"+a\nb\r\n", ParseError::InvalidSymbol(b'\n'))]
fn test_streaming_malformed(#[case] input: &[u8], #[case] expected: ParseError) {
	let mut parser = RespParser::new();
	let mut buf = BytesMut::from(input);
	match parser.parse(&mut buf) {
		RespParseResult::Error(RespError::Parse(e)) => assert_eq!(e, expected),
		other => panic!("Expected {:?}, got {:?}", expected, other),
	}
}

#[test]
fn test_error_after_valid_values() {
	let mut parser = RespParser::new();
	let mut buf = BytesMut::from(&b"*2\r\n:1\r\n:2\r\n*2\r\n:3\r\n?\r\n"[..]);

	assert!(matches!(
		parser.parse(&mut buf),
		RespParseResult::Complete(RespValue::Array(_))
	));
	assert!(matches!(
		parser.parse(&mut buf),
		RespParseResult::Error(RespError::Parse(ParseError::InvalidLeadingByte(b'?')))
	));
}
