//! JSON field extractor (§4.4): consumes a JSON token stream and emits only
//! the string value of a named top-level field. Written as an explicit
//! byte-level state machine (Design Note §9: "avoid regex or generic JSON
//! decoders on partial input"), back-buffering only the trailing
//! `keyLen−1` bytes across feeds.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scanning,
    SawKey,
    SawColon,
    InString,
}

/// Incrementally scans fed bytes for `"<key>": "<value>"` and emits the
/// value's characters (with escapes resolved) as they arrive.
pub struct JsonFieldExtractor {
    key: String,
    state: State,
    /// Back-buffer of at most `key.len() - 1` trailing bytes, carried across
    /// feeds so a key split across two chunks is still recognized.
    back_buffer: Vec<u8>,
    escape_pending: bool,
    /// Buffer-whole-value mode: accumulate and emit once on string close
    /// instead of streaming each character.
    buffer_whole_value: bool,
    value_buffer: String,
}

impl JsonFieldExtractor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: State::Scanning,
            back_buffer: Vec::new(),
            escape_pending: false,
            buffer_whole_value: false,
            value_buffer: String::new(),
        }
    }

    pub fn buffered(mut self) -> Self {
        self.buffer_whole_value = true;
        self
    }

    /// Feed the next chunk of raw JSON text. Returns the value fragments
    /// that should be emitted to the consumer in this call (empty unless
    /// the key's value is currently being scanned, or — in buffered mode —
    /// until the value's closing quote is seen).
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut emitted = Vec::new();
        let mut window: Vec<u8> = std::mem::take(&mut self.back_buffer);
        window.extend_from_slice(chunk.as_bytes());

        let quoted_key = format!("\"{}\"", self.key);
        let key_bytes = quoted_key.as_bytes();
        let mut i = 0usize;

        while i < window.len() {
            match self.state {
                State::Scanning => {
                    if window[i..].starts_with(key_bytes) {
                        self.state = State::SawKey;
                        i += key_bytes.len();
                        continue;
                    }
                    i += 1;
                }
                State::SawKey => {
                    if window[i] == b':' {
                        self.state = State::SawColon;
                    }
                    i += 1;
                }
                State::SawColon => {
                    match window[i] {
                        b'"' => {
                            self.state = State::InString;
                        }
                        b' ' | b'\t' | b'\n' | b'\r' => {}
                        _ => self.state = State::Scanning,
                    }
                    i += 1;
                }
                State::InString => {
                    let byte = window[i];
                    if self.escape_pending {
                        let resolved = match byte {
                            b'n' => Some('\n'),
                            b't' => Some('\t'),
                            b'"' => Some('"'),
                            b'\\' => Some('\\'),
                            b'/' => Some('/'),
                            _ => None,
                        };
                        if let Some(c) = resolved {
                            self.push_char(c, &mut emitted);
                        }
                        self.escape_pending = false;
                        i += 1;
                        continue;
                    }
                    match byte {
                        b'\\' => {
                            self.escape_pending = true;
                            i += 1;
                        }
                        b'"' => {
                            self.state = State::Scanning;
                            if self.buffer_whole_value {
                                emitted.push(std::mem::take(&mut self.value_buffer));
                            }
                            i += 1;
                        }
                        _ => {
                            self.push_char(byte as char, &mut emitted);
                            i += 1;
                        }
                    }
                }
            }
        }

        // Back-buffer only the trailing key.len()-1 bytes so a split key is
        // still matched on the next feed, as long as we're idly scanning.
        if self.state == State::Scanning {
            let keep = key_bytes.len().saturating_sub(1);
            let start = window.len().saturating_sub(keep);
            self.back_buffer = window[start..].to_vec();
        }

        emitted
    }

    fn push_char(&mut self, c: char, emitted: &mut Vec<String>) {
        if self.buffer_whole_value {
            self.value_buffer.push(c);
        } else {
            emitted.push(c.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_streamed_value_char_by_char() {
        let mut ex = JsonFieldExtractor::new("title");
        let mut out = String::new();
        for chunk in [r#"{"title":"#, r#" "hel"#, r#"lo"#, r#"""}"#] {
            for s in ex.feed(chunk) {
                out.push_str(&s);
            }
        }
        assert_eq!(out, "hello");
    }

    #[test]
    fn resolves_escapes() {
        let mut ex = JsonFieldExtractor::new("k");
        let mut out = String::new();
        for s in ex.feed(r#"{"k": "line1\nline2\"quoted\""}"#) {
            out.push_str(&s);
        }
        assert_eq!(out, "line1\nline2\"quoted\"");
    }

    #[test]
    fn buffered_mode_emits_once_on_close() {
        let mut ex = JsonFieldExtractor::new("title").buffered();
        assert!(ex.feed(r#"{"title": "par"#).is_empty());
        let out = ex.feed(r#"tial"}"#);
        assert_eq!(out, vec!["partial".to_string()]);
    }

    #[test]
    fn ignores_other_keys() {
        let mut ex = JsonFieldExtractor::new("target");
        let out = ex.feed(r#"{"other": "noise", "target": "hit"}"#);
        assert_eq!(out.join(""), "hit");
    }

    #[test]
    fn key_split_across_feeds_is_still_matched() {
        let mut ex = JsonFieldExtractor::new("title");
        assert!(ex.feed(r#"{"tit"#).is_empty());
        let out = ex.feed(r#"le": "ok"}"#);
        assert_eq!(out.join(""), "ok");
    }
}
