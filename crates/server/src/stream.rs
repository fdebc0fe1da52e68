//! In-memory task output and incremental readers over it

use std::sync::Mutex;

/// Append-only output text of one task.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: Mutex<String>,
}

impl OutputBuffer {
    pub fn append(&self, fragment: &str) {
        self.lock().push_str(fragment);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contents(&self) -> String {
        self.lock().clone()
    }

    /// Everything appended at or after byte `offset`.
    fn read_from(&self, offset: usize) -> (String, usize) {
        let text = self.lock();
        let start = offset.min(text.len());
        (text[start..].to_string(), text.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        // A panic while appending leaves the string valid; keep serving it.
        self.text.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reads only what was appended since the previous read.
#[derive(Debug, Default, Clone)]
pub struct OutputCursor {
    offset: usize,
}

impl OutputCursor {
    /// `None` when nothing new was written.
    pub fn read(&mut self, buffer: &OutputBuffer) -> Option<String> {
        let (fragment, end) = buffer.read_from(self.offset);
        self.offset = end;
        if fragment.is_empty() {
            None
        } else {
            Some(fragment)
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Incremental UTF-8 decoder for byte streams split at arbitrary points.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much as possible; an incomplete trailing sequence is kept
    /// for the next call and invalid bytes become U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let input = std::mem::take(&mut self.carry);
        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads_only_new_fragments() {
        let buffer = OutputBuffer::default();
        let mut cursor = OutputCursor::default();
        assert_eq!(cursor.read(&buffer), None);

        buffer.append("hello ");
        assert_eq!(cursor.read(&buffer).as_deref(), Some("hello "));
        assert_eq!(cursor.read(&buffer), None);

        buffer.append("world");
        assert_eq!(cursor.read(&buffer).as_deref(), Some("world"));
        assert_eq!(cursor.offset(), 11);
    }

    #[test]
    fn independent_cursors_see_everything() {
        let buffer = OutputBuffer::default();
        buffer.append("abc");
        let mut early = OutputCursor::default();
        assert_eq!(early.read(&buffer).as_deref(), Some("abc"));
        buffer.append("def");

        let mut late = OutputCursor::default();
        assert_eq!(late.read(&buffer).as_deref(), Some("abcdef"));
        assert_eq!(early.read(&buffer).as_deref(), Some("def"));
    }

    #[test]
    fn decoder_joins_split_multibyte_chars() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo ✓".as_bytes();
        let (a, b) = bytes.split_at(2);
        let mut text = decoder.decode(a);
        text.push_str(&decoder.decode(b));
        assert_eq!(text, "héllo ✓");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }
}
