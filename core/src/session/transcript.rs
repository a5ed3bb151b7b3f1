pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const DEFAULT_MAX_TRANSCRIPT_LEN: usize = 9000;

const ACK_MARKER: &str = "<span class=\"ack\">ACK</span>";
const NAK_MARKER: &str = "<span class=\"nak\">NAK</span>";
const BAD_COMMAND_MARKER: &str = "<span class=\"nak\">Bad Command</span>";

/// Text form of raw link bytes: ASCII as-is, anything else escaped.
pub fn display_text(bytes: &[u8]) -> String {
    if bytes.is_ascii() {
        bytes.iter().map(|byte| char::from(*byte)).collect()
    } else {
        format!("b\"{}\"", bytes.escape_ascii())
    }
}

/// Console text capped at `max_len` bytes, trimmed from the front. Control
/// codes are kept raw and only turned into markers by [`Transcript::render`].
#[derive(Debug, Clone)]
pub struct Transcript {
    text: String,
    max_len: usize,
}

impl Transcript {
    pub fn new(max_len: usize) -> Self {
        Self {
            text: String::new(),
            max_len: max_len.max(1),
        }
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        let text = display_text(bytes);
        self.append(&text);
    }

    pub fn append(&mut self, text: &str) {
        self.text.push_str(text);
        self.truncate_front();
    }

    /// Appends `message` on its own line.
    pub fn notice(&mut self, message: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(message);
        self.text.push('\n');
        self.truncate_front();
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn raw(&self) -> &str {
        &self.text
    }

    pub fn render(&self) -> String {
        let ack = char::from(ACK);
        let nak = char::from(NAK);
        let mut rendered = String::with_capacity(self.text.len());
        let mut saw_nak = false;
        for ch in self.text.chars() {
            if ch == ack {
                rendered.push_str(ACK_MARKER);
            } else if ch == nak {
                saw_nak = true;
                rendered.push_str(NAK_MARKER);
            } else {
                rendered.push(ch);
            }
        }
        if saw_nak {
            rendered.push_str(BAD_COMMAND_MARKER);
        }
        rendered
    }

    fn truncate_front(&mut self) {
        if self.text.len() <= self.max_len {
            return;
        }
        let mut cut = self.text.len() - self.max_len;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSCRIPT_LEN)
    }
}
