//! Single-line progress bar for the fetch phase

use crossterm::{
    cursor::MoveToColumn,
    execute,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};

/// Number of cells in the bar
const BAR_WIDTH: usize = 20;

/// Longest message shown next to the bar
const MAX_MESSAGE_CHARS: usize = 50;

/// Progress bar redrawn in place on stderr
#[derive(Debug)]
pub struct ProgressBar {
    total: usize,
    current: usize,
    enabled: bool,
}

impl ProgressBar {
    pub fn new(total: usize, enabled: bool) -> Self {
        Self {
            total,
            current: 0,
            enabled: enabled && total > 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Move to `current` and redraw
    pub fn update(&mut self, current: usize, message: &str) {
        self.current = current.min(self.total);
        if !self.enabled {
            return;
        }

        let line = self.render(message);
        let mut stderr = io::stderr();
        // Progress output is best effort
        let _ = execute!(
            stderr,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(&line)
        );
        if self.current == self.total {
            let _ = writeln!(stderr);
        }
    }

    pub fn inc(&mut self, message: &str) {
        self.update(self.current + 1, message);
    }

    /// `[████░░░░] NN% message`
    pub fn render(&self, message: &str) -> String {
        let percent = if self.total == 0 {
            100
        } else {
            (self.current * 100 + self.total / 2) / self.total
        };
        let filled = (percent * BAR_WIDTH + 50) / 100;
        let message: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        format!(
            "[{}{}] {}% {}",
            "█".repeat(filled),
            "░".repeat(BAR_WIDTH - filled),
            percent,
            message
        )
    }
}
