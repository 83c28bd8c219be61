use bytes::BytesMut;
use resp::RespParseResult;
use resp::RespParser;

fn main() {
	println!("--- RESP Streaming Parse Example ---");

	// Replies of a pipelined PING / INCR / LRANGE / SUBSCRIBE session,
	// split at arbitrary points the way a socket might deliver them.
	let data_chunks = vec![
		b"+PO".as_slice(),
		b"NG\r\n:4".as_slice(),
		b"2\r\n*2\r\n$1\r\na\r\n$".as_slice(),
		b"-1\r\n*3\r\n$9\r\nsubscr".as_slice(),
		b"ibe\r\n$4\r\nnews\r\n:1".as_slice(),
		b"\r\n".as_slice(),
	];

	let mut parser = RespParser::new();
	let mut buffer = BytesMut::new();

	for (i, chunk) in data_chunks.iter().enumerate() {
		println!("\n[Stream] Received Chunk {}: {:?}", i, String::from_utf8_lossy(chunk));

		buffer.extend_from_slice(chunk);

		loop {
			match parser.parse(&mut buffer) {
				RespParseResult::Complete(value) => {
					println!("[Parser] Complete: {:?}", value);
				}
				RespParseResult::Incomplete => {
					println!("[Parser] Incomplete, waiting for more data...");
					break;
				}
				RespParseResult::Error(e) => {
					eprintln!("[Parser] Error: {:?}", e);
					return;
				}
			}
		}
	}
}
