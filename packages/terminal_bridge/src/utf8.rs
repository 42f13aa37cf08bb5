/// Streaming UTF-8 decoder for exec output.
///
/// Raw reads from the remote TTY can split a multi-byte character across
/// chunks. The trailing incomplete sequence is held back until the next chunk
/// so a JSON frame never carries a replacement character for a split char.
#[derive(Debug, Default)]
pub(crate) struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return everything that decodes completely so far.
    /// Invalid bytes become U+FFFD.
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;

        loop {
            let rest = &self.pending[start..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            start += valid_up_to;
                            break;
                        }
                        Some(len) => {
                            out.push('\u{FFFD}');
                            start += valid_up_to + len;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flush held-back bytes at end of stream.
    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
