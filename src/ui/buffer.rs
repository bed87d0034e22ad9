use std::collections::VecDeque;

use crate::ui::logs::ConsoleLine;

/// Per-service console accumulator. Appends only; the oldest chunk is
/// evicted once `capacity` is reached.
#[derive(Debug)]
pub struct ConsoleBuffer {
    lines: VecDeque<ConsoleLine>,
    capacity: usize,
}

impl ConsoleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: ConsoleLine) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Chunks in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &ConsoleLine> {
        self.lines.iter()
    }

    /// The whole buffer as timestamped text, one chunk per line.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for line in self.iter() {
            text.push_str(&line.render());
            text.push('\n');
        }
        text
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn make_line(text: &str, ts: DateTime<Utc>) -> ConsoleLine {
        ConsoleLine {
            timestamp: ts,
            service: "svc".to_string(),
            text: text.to_string(),
            is_stderr: false,
            level: None,
        }
    }

    #[test]
    fn buffer_capacity_eviction() {
        let mut buf = ConsoleBuffer::new(3);
        let now = Utc::now();
        for text in ["a", "b", "c", "d"] {
            buf.push(make_line(text, now));
        }
        assert_eq!(buf.len(), 3);
        let texts: Vec<&str> = buf.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c", "d"]);
    }

    #[test]
    fn render_joins_chunks_in_order() {
        let mut buf = ConsoleBuffer::new(10);
        assert!(buf.is_empty());
        assert_eq!(buf.render(), "");

        buf.push(make_line("first", Utc::now()));
        buf.push(ConsoleLine::new("svc", "second".into(), true));

        let text = buf.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("[ERROR] second"));
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut buf = ConsoleBuffer::new(4);
        buf.push(make_line("old run", Utc::now()));
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.render(), "");
    }

    #[test]
    fn zero_capacity_still_keeps_latest_chunk() {
        let mut buf = ConsoleBuffer::new(0);
        buf.push(make_line("a", Utc::now()));
        buf.push(make_line("b", Utc::now()));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.iter().next().map(|l| l.text.as_str()), Some("b"));
    }
}
