use chrono::{DateTime, Local, Utc};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::orchestrator::state::StateChange;

// ---------------------------------------------------------------------------
// LogLevel, detected from console text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ASP.NET console logging uses "info:", "warn:", "fail:", "crit:", "dbug:", "trce:".
static LOG_LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(trace|trce|debug|dbug|info|warn(?:ing)?|error|fail|crit(?:ical)?)\b"#)
        .unwrap()
});

/// Detect log level from a line of text.
pub fn detect_log_level(text: &str) -> Option<LogLevel> {
    LOG_LEVEL_RE.find(text).and_then(|m| {
        let s = m.as_str().to_lowercase();
        match s.as_str() {
            "trace" | "trce" => Some(LogLevel::Trace),
            "debug" | "dbug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" | "fail" | "crit" | "critical" => Some(LogLevel::Error),
            _ => None,
        }
    })
}

// ---------------------------------------------------------------------------
// ConsoleLine
// ---------------------------------------------------------------------------

/// One chunk of captured service output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub text: String,
    pub is_stderr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

impl ConsoleLine {
    pub fn new(service: &str, text: String, is_stderr: bool) -> Self {
        let level = detect_log_level(&text);
        Self {
            timestamp: Utc::now(),
            service: service.to_string(),
            text,
            is_stderr,
            level,
        }
    }

    /// Render as `[HH:MM:SS] text`, with an `[ERROR]` marker for stderr chunks.
    pub fn render(&self) -> String {
        let clock = self.timestamp.with_timezone(&Local).format("%H:%M:%S");
        if self.is_stderr {
            format!("[{}] [ERROR] {}", clock, self.text)
        } else {
            format!("[{}] {}", clock, self.text)
        }
    }
}

// ---------------------------------------------------------------------------
// ConsoleWriter: colored terminal output
// ---------------------------------------------------------------------------

/// Which services the writer echoes.
pub enum Follow {
    /// Every service's output.
    All,
    /// Only services whose console is currently shown, tracked from the
    /// supervisor's state stream.
    Visible(broadcast::Receiver<StateChange>),
}

pub struct ConsoleWriter {
    lines: broadcast::Receiver<ConsoleLine>,
    follow: Follow,
    visible: BTreeSet<String>,
    max_name_len: usize,
    use_color: bool,
}

/// Color palette for service names (using owo-colors).
const SERVICE_COLORS: &[fn(&str) -> String] = &[
    |s| format!("{}", s.cyan()),
    |s| format!("{}", s.yellow()),
    |s| format!("{}", s.green()),
    |s| format!("{}", s.magenta()),
    |s| format!("{}", s.blue()),
    |s| format!("{}", s.red()),
];

fn format_level(level: &LogLevel, use_color: bool) -> String {
    if !use_color {
        return format!("{:>5} ", level.as_str());
    }
    match level {
        LogLevel::Trace => format!("{} ", level.as_str().dimmed()),
        LogLevel::Debug => format!("{} ", level.as_str().blue()),
        LogLevel::Info => format!("{} ", level.as_str().green()),
        LogLevel::Warn => format!("{} ", level.as_str().yellow()),
        LogLevel::Error => format!("{} ", level.as_str().red()),
    }
}

impl ConsoleWriter {
    pub fn new(
        lines: broadcast::Receiver<ConsoleLine>,
        follow: Follow,
        initially_visible: BTreeSet<String>,
        max_name_len: usize,
    ) -> Self {
        Self {
            lines,
            follow,
            visible: initially_visible,
            max_name_len,
            use_color: std::io::stdout().is_terminal(),
        }
    }

    pub async fn run(mut self) {
        let mut color_map: BTreeMap<String, usize> = BTreeMap::new();
        let mut next_color = 0usize;

        loop {
            let line = match &mut self.follow {
                Follow::All => match self.lines.recv().await {
                    Ok(line) => line,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                Follow::Visible(states) => {
                    tokio::select! {
                        change = states.recv() => {
                            match change {
                                Ok(change) => {
                                    if change.state.console_visible {
                                        self.visible.insert(change.state.name);
                                    } else {
                                        self.visible.remove(&change.state.name);
                                    }
                                }
                                Err(RecvError::Lagged(_)) => {}
                                Err(RecvError::Closed) => break,
                            }
                            continue;
                        }
                        line = self.lines.recv() => match line {
                            Ok(line) if self.visible.contains(&line.service) => line,
                            Ok(_) | Err(RecvError::Lagged(_)) => continue,
                            Err(RecvError::Closed) => break,
                        },
                    }
                }
            };

            let color_idx = *color_map.entry(line.service.clone()).or_insert_with(|| {
                let idx = next_color;
                next_color = (next_color + 1) % SERVICE_COLORS.len();
                idx
            });
            println!("{}", self.format_line(&line, color_idx));
        }
    }

    fn format_line(&self, line: &ConsoleLine, color_idx: usize) -> String {
        let mut buf = String::new();

        if self.use_color {
            let colored_name = SERVICE_COLORS[color_idx % SERVICE_COLORS.len()](&line.service);
            let padding = self.max_name_len.saturating_sub(line.service.len());
            buf.push_str(&" ".repeat(padding));
            buf.push_str(&colored_name);
            buf.push_str(&format!(" {} ", "|".dimmed()));
        } else {
            buf.push_str(&format!(
                "{:>width$} | ",
                line.service,
                width = self.max_name_len,
            ));
        }

        if let Some(ref level) = line.level {
            buf.push_str(&format_level(level, self.use_color));
        }

        if self.use_color && line.is_stderr {
            buf.push_str(&format!("{}", line.text.red()));
        } else {
            buf.push_str(&line.text);
        }
        buf
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
