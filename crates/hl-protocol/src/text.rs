//! Incremental UTF-8 decoding for outbound text frames
//!
//! PTY and log reads land on arbitrary byte boundaries, so a multi-byte
//! character can be split across two reads. [`Utf8Decoder`] holds back an
//! incomplete trailing sequence until the next chunk arrives and replaces
//! genuinely invalid bytes with U+FFFD, so a session is never dropped over
//! encoding noise.

/// Longest prefix of a UTF-8 sequence that can still be incomplete
const MAX_PENDING: usize = 3;

/// Stateful bytes-to-text decoder
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, carrying an incomplete tail over to the next call
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));

                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid_up_to + len..];
                        }
                        None => {
                            let tail = &rest[valid_up_to..];
                            debug_assert!(tail.len() <= MAX_PENDING);
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is still held back, replacing it if incomplete
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&pending).into_owned())
    }

    /// Number of bytes waiting for the rest of their character
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
