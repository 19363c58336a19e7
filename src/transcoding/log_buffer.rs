//! Bounded tail of encoder output.

use std::collections::VecDeque;

/// Keeps the most recent lines whose total size fits in `max_bytes`.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    max_bytes: usize,
    dropped: usize,
}

impl LogBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            max_bytes: max_bytes.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: &str) {
        let mut line = line.to_string();
        if line.len() + 1 > self.max_bytes {
            let mut end = self.max_bytes.saturating_sub(1);
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }

        self.bytes += line.len() + 1;
        self.lines.push_back(line);

        while self.bytes > self.max_bytes {
            match self.lines.pop_front() {
                Some(old) => {
                    self.bytes -= old.len() + 1;
                    self.dropped += 1;
                }
                None => break,
            }
        }
    }

    /// Lines evicted so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.bytes + 48);
        if self.dropped > 0 {
            out.push_str(&format!(
                "[... {} earlier lines truncated ...]\n",
                self.dropped
            ));
        }
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}
