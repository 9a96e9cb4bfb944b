//! Terminal rendering for schedule and sync results, using owo_colors.

use guichet_core::calendar::{CalendarEntry, CalendarTarget};
use guichet_core::reconcile::{FailedMutation, ReconcileReport};
use guichet_core::schedule::Event;
use owo_colors::OwoColorize;

/// Extension trait for TUI rendering with colors.
pub trait Render {
    fn render(&self) -> String;
}

impl Render for Event {
    fn render(&self) -> String {
        let time = if self.is_all_day {
            self.start.format("%a %d %b").to_string()
        } else {
            format!(
                "{} - {}",
                self.start.format("%a %d %b %H:%M"),
                self.end.format("%H:%M")
            )
        };

        let mut line = format!("{} {}", time.dimmed(), self.title);
        if !self.location.is_empty() {
            line.push_str(&format!(" {}", format!("@ {}", self.location).dimmed()));
        }
        if !self.course_code.is_empty() {
            line.push_str(&format!(" {}", format!("[{}]", self.course_code).cyan()));
        }
        line
    }
}

impl Render for CalendarTarget {
    fn render(&self) -> String {
        format!("📅 {}", self.name)
    }
}

impl Render for CalendarEntry {
    fn render(&self) -> String {
        if self.primary {
            format!("📅 {} {}", self.summary, "(primary)".dimmed())
        } else {
            format!("📅 {}", self.summary)
        }
    }
}

impl Render for FailedMutation {
    fn render(&self) -> String {
        format!("   {} {} {}: {}", "!".red(), self.kind, self.target, self.error.to_string().red())
    }
}

impl Render for ReconcileReport {
    fn render(&self) -> String {
        let mut lines = vec![format!(
            "Deleted {} {}, created {} {}",
            self.deleted,
            pluralize("event", self.deleted),
            self.created,
            pluralize("event", self.created)
        )];

        if self.already_gone > 0 {
            lines.push(
                format!("({} already gone)", self.already_gone)
                    .dimmed()
                    .to_string(),
            );
        }

        if !self.failures.is_empty() {
            lines.push(
                format!(
                    "{} {} failed:",
                    self.failures.len(),
                    pluralize("change", self.failures.len())
                )
                .red()
                .to_string(),
            );
            lines.extend(self.failures.iter().map(Render::render));
        }

        lines.join("\n")
    }
}

fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}
