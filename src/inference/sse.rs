/// Accumulates raw SSE bytes and yields complete event blocks.
///
/// Bytes are only decoded once a whole block is buffered, so a multi-byte
/// character split across network chunks survives intact.
pub struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.windows(2).any(|pair| pair == b"\r\n") {
            let mut normalized = Vec::with_capacity(self.buffer.len());
            let mut bytes = self.buffer.iter().copied().peekable();
            while let Some(byte) = bytes.next() {
                if byte == b'\r' && bytes.peek() == Some(&b'\n') {
                    continue;
                }
                normalized.push(byte);
            }
            self.buffer = normalized;
        }
    }

    pub fn next_event_block(&mut self) -> Option<String> {
        let boundary = self.buffer.windows(2).position(|pair| pair == b"\n\n")?;
        let event_block: Vec<u8> = self.buffer.drain(..boundary + 2).collect();
        Some(String::from_utf8_lossy(&event_block).into_owned())
    }

    /// Whatever is left once the connection closes
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest).into_owned();
        (!rest.trim().is_empty()).then_some(rest)
    }
}

impl Default for SseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_data_lines(event_block: &str) -> Vec<&str> {
    event_block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_split_across_chunks() {
        let mut buffer = SseBuffer::new();
        buffer.push_chunk(b"data: {\"a\":1}\r");
        assert!(buffer.next_event_block().is_none());

        buffer.push_chunk(b"\n\r\ndata: {\"b\":2}");
        let block = buffer.next_event_block().unwrap();
        assert_eq!(parse_data_lines(&block), vec!["{\"a\":1}"]);

        let rest = buffer.finish().unwrap();
        assert_eq!(parse_data_lines(&rest), vec!["{\"b\":2}"]);
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let bytes = "data: {\"t\":\"€\"}\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xE2).unwrap() + 1;

        let mut buffer = SseBuffer::new();
        buffer.push_chunk(&bytes[..split]);
        assert!(buffer.next_event_block().is_none());
        buffer.push_chunk(&bytes[split..]);

        let block = buffer.next_event_block().unwrap();
        assert_eq!(parse_data_lines(&block), vec!["{\"t\":\"€\"}"]);
        assert!(!block.contains('\u{FFFD}'));
    }
}
