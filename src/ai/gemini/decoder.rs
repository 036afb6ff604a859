//! Incremental UTF-8 decoding of a streaming response body.

/// Turns raw body chunks into text, holding back an incomplete multi-byte
/// sequence at the end of a chunk until the next one arrives.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `chunk` prefixed by any bytes held back from the previous call.
    ///
    /// Invalid sequences become U+FFFD. With `is_final` set, a held-back tail
    /// is flushed as well.
    pub fn decode(&mut self, chunk: &[u8], is_final: bool) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        if is_final {
            return String::from_utf8_lossy(&bytes).into_owned();
        }

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Whether bytes are being held back for the next chunk.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
