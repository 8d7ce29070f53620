//! Color theming for CLI output.
//!
//! One semantic palette shared by `owo_colors` (terminal text) and
//! `comfy_table` (report tables). Colors are disabled by `--no-color` or
//! the `NO_COLOR` environment variable, after which every helper returns
//! unstyled text.

use crate::scheduler::JobStatus;
use owo_colors::{OwoColorize, Style};
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable all colors globally. Call early in `main`.
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

/// Semantic color categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    /// Shader source file names
    Source,
    /// Entry point names
    EntryPoint,
    Platform,
    Succeeded,
    Failed,
    NotStarted,
    /// Secondary text such as thread ids
    Muted,
}

impl From<JobStatus> for Semantic {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Succeeded => Self::Succeeded,
            JobStatus::Failed => Self::Failed,
            JobStatus::NotStarted => Self::NotStarted,
        }
    }
}

/// comfy_table color for a category, `None` when colors are off.
pub fn table_color(semantic: Semantic) -> Option<comfy_table::Color> {
    if !colors_enabled() {
        return None;
    }
    Some(match semantic {
        Semantic::Source => comfy_table::Color::Cyan,
        Semantic::EntryPoint => comfy_table::Color::Reset,
        Semantic::Platform => comfy_table::Color::Magenta,
        Semantic::Succeeded => comfy_table::Color::Green,
        Semantic::Failed => comfy_table::Color::Red,
        Semantic::NotStarted => comfy_table::Color::Yellow,
        Semantic::Muted => comfy_table::Color::DarkGrey,
    })
}

pub trait ThemedCell {
    fn themed(self, semantic: Semantic) -> Self;
}

impl ThemedCell for comfy_table::Cell {
    fn themed(self, semantic: Semantic) -> Self {
        match table_color(semantic) {
            Some(color) => self.fg(color),
            None => self,
        }
    }
}

/// Semantic styling for terminal text.
pub trait Themed: std::fmt::Display {
    fn paint(&self, style: Style) -> String {
        if colors_enabled() {
            self.to_string().style(style).to_string()
        } else {
            self.to_string()
        }
    }

    fn source_name(&self) -> String {
        self.paint(Style::new().cyan())
    }

    fn platform(&self) -> String {
        self.paint(Style::new().magenta())
    }

    fn success(&self) -> String {
        self.paint(Style::new().green().bold())
    }

    fn failure(&self) -> String {
        self.paint(Style::new().red().bold())
    }

    fn warning(&self) -> String {
        self.paint(Style::new().yellow())
    }

    /// "error:" headers
    fn error_style(&self) -> String {
        self.paint(Style::new().red().bold())
    }

    fn label(&self) -> String {
        self.paint(Style::new().yellow())
    }

    fn count(&self) -> String {
        self.paint(Style::new().cyan())
    }

    fn status_style(&self, status: JobStatus) -> String {
        match status {
            JobStatus::Succeeded => self.paint(Style::new().green()),
            JobStatus::Failed => self.failure(),
            JobStatus::NotStarted => self.warning(),
        }
    }
}

impl Themed for String {}
impl Themed for &str {}
impl Themed for str {}
impl Themed for usize {}
impl Themed for u32 {}
