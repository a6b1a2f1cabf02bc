//! Single-line text field with a character cursor

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextField {
    value: String,
    cursor: usize, // in chars, not bytes
}

impl TextField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn char_count(&self) -> usize {
        self.value.chars().count()
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.value, self.cursor);
        self.value.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.value, self.cursor);
            self.value.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.char_count() {
            let byte_pos = char_to_byte_index(&self.value, self.cursor);
            self.value.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.char_count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.char_count();
    }

    /// Hand over the contents and reset to empty
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.value)
    }

    /// Visible slice for a box `width` chars wide, scrolled to keep the cursor
    /// in view. Returns the text and the cursor's column within it.
    pub fn visible(&self, width: usize) -> (String, usize) {
        let scroll_offset = if width == 0 {
            0
        } else if self.cursor >= width {
            self.cursor - width + 1
        } else {
            0
        };

        let text = self.value.chars().skip(scroll_offset).take(width).collect();
        (text, self.cursor - scroll_offset)
    }

    /// Masked rendering for secrets: stars, with the last four characters shown
    pub fn masked(&self) -> String {
        let len = self.char_count();
        if len <= 4 {
            "*".repeat(len)
        } else {
            let masked_len = len - 4;
            let last_four: String = self.value.chars().skip(masked_len).collect();
            format!("{}{}", "*".repeat(masked_len.min(20)), last_four)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(text: &str) -> TextField {
        let mut field = TextField::new();
        text.chars().for_each(|c| field.insert(c));
        field
    }

    #[test]
    fn editing_in_the_middle() {
        let mut f = field("helo");
        f.left();
        f.insert('l');
        assert_eq!(f.value(), "hello");
        assert_eq!(f.cursor(), 4);

        f.home();
        f.delete();
        assert_eq!(f.value(), "ello");
        f.end();
        f.backspace();
        assert_eq!(f.value(), "ell");
        f.right();
        assert_eq!(f.cursor(), 3);
    }

    #[test]
    fn multibyte_characters() {
        let mut f = field("xin chào");
        f.left();
        f.left();
        f.backspace();
        assert_eq!(f.value(), "xin cào");
        f.insert('h');
        assert_eq!(f.value(), "xin chào");
    }

    #[test]
    fn take_resets() {
        let mut f = field("Hello");
        assert_eq!(f.take(), "Hello");
        assert!(f.is_empty());
        assert_eq!(f.cursor(), 0);
    }

    #[test]
    fn visible_scrolls_with_cursor() {
        let f = field("abcdefghij");
        let (text, col) = f.visible(4);
        assert_eq!(text, "hij");
        assert_eq!(col, 3);

        let mut f = f;
        f.home();
        assert_eq!(f.visible(4), ("abcd".to_string(), 0));
    }

    #[test]
    fn masking_keeps_last_four() {
        assert_eq!(field("").masked(), "");
        assert_eq!(field("abc").masked(), "***");
        assert_eq!(field("sk-12345678").masked(), "*******5678");
    }
}
