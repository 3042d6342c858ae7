// ABOUTME: Log view model: bounded text buffer with stick-to-bottom scrolling
// New content follows the tail only while the viewer has not scrolled away from it

use crate::logs::tail::LogUpdate;

#[derive(Debug, Clone)]
pub struct LogView {
    content: String,
    max_bytes: usize,
    viewport_rows: usize,
    scroll_offset: usize,
    stick_to_bottom: bool,
    error: Option<String>,
    ended: bool,
}

impl LogView {
    pub fn new(max_bytes: usize, viewport_rows: usize) -> Self {
        Self {
            content: String::new(),
            max_bytes: max_bytes.max(1),
            viewport_rows: viewport_rows.max(1),
            scroll_offset: 0,
            stick_to_bottom: true,
            error: None,
            ended: false,
        }
    }

    pub fn apply(&mut self, update: &LogUpdate) {
        match update {
            LogUpdate::Replace(text) => self.replace(text),
            LogUpdate::Append(chunk) => self.append(chunk),
            LogUpdate::Failed(error) => self.error = Some(error.to_string()),
            LogUpdate::Ended => self.ended = true,
        }
    }

    pub fn replace(&mut self, text: &str) {
        self.content.clear();
        self.content.push_str(text);
        self.error = None;
        self.settle();
    }

    pub fn append(&mut self, chunk: &str) {
        self.content.push_str(chunk);
        self.error = None;
        self.settle();
    }

    fn settle(&mut self) {
        self.trim_front();
        if self.stick_to_bottom {
            self.scroll_offset = self.max_offset();
        } else {
            self.scroll_offset = self.scroll_offset.min(self.max_offset());
        }
    }

    /// Drop whole lines from the front until the buffer fits
    fn trim_front(&mut self) {
        if self.content.len() <= self.max_bytes {
            return;
        }
        let mut excess = self.content.len() - self.max_bytes;
        while !self.content.is_char_boundary(excess) {
            excess += 1;
        }
        let cut = if self.content[..excess].ends_with('\n') {
            excess
        } else {
            match self.content[excess..].find('\n') {
                Some(newline) => excess + newline + 1,
                // A single oversized line keeps its tail
                None => excess,
            }
        };
        let dropped_lines = self.content[..cut].matches('\n').count();
        self.content.drain(..cut);
        self.scroll_offset = self.scroll_offset.saturating_sub(dropped_lines);
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }

    fn max_offset(&self) -> usize {
        self.line_count().saturating_sub(self.viewport_rows)
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn is_stuck_to_bottom(&self) -> bool {
        self.stick_to_bottom
    }

    pub fn set_viewport_rows(&mut self, rows: usize) {
        self.viewport_rows = rows.max(1);
        self.settle();
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
        self.stick_to_bottom = self.scroll_offset >= self.max_offset();
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = (self.scroll_offset + lines).min(self.max_offset());
        self.stick_to_bottom = self.scroll_offset >= self.max_offset();
    }

    pub fn scroll_to_bottom(&mut self) {
        self.stick_to_bottom = true;
        self.scroll_offset = self.max_offset();
    }

    pub fn visible_lines(&self) -> Vec<&str> {
        self.content
            .lines()
            .skip(self.scroll_offset)
            .take(self.viewport_rows)
            .collect()
    }
}
