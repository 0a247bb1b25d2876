//! Human-readable output.
//!
//! Changed keys are printed one per line with a status marker, followed by
//! a summary line:
//!
//! ```text
//! A blog/new.html
//! M index.html
//! D old.css
//! 120 files: 117 unchanged, 0 touched, 1 added, 1 modified, 1 removed (3 hashed, 47.1 KiB)
//! ```

use std::io::{self, Write};

use yansi::{Color, Paint};

use crate::cache::{FileRecord, MigrationReport};
use crate::detect::{Outcome, ScanReport};

use super::{format_bytes, format_mtime};

/// Plain-text formatter.
#[derive(Debug, Clone, Copy)]
pub struct TextOutput {
    color: bool,
}

impl TextOutput {
    /// `color` enables ANSI colors.
    #[must_use]
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.fg(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn outcome_color(outcome: Outcome) -> Color {
        match outcome {
            Outcome::Added => Color::Green,
            Outcome::Modified => Color::Yellow,
            Outcome::Removed => Color::Red,
            Outcome::Touched => Color::Cyan,
            Outcome::Unchanged => Color::Primary,
        }
    }

    /// Changed keys, errors, then the summary line.
    ///
    /// # Errors
    ///
    /// Returns any error from the writer.
    pub fn write_report<W: Write>(&self, report: &ScanReport, writer: &mut W) -> io::Result<()> {
        for (key, outcome) in report.changes() {
            let marker = outcome.marker().to_string();
            writeln!(
                writer,
                "{} {}",
                self.paint(&marker, Self::outcome_color(outcome)),
                key
            )?;
        }

        for error in &report.errors {
            writeln!(
                writer,
                "{} {}: {}",
                self.paint("!", Color::Red),
                error.path,
                error.message
            )?;
        }

        let mut summary = format!(
            "{} files: {} unchanged, {} touched, {} added, {} modified, {} removed ({} hashed, {})",
            report.walked,
            report.unchanged,
            report.touched.len(),
            report.added.len(),
            report.modified.len(),
            report.removed.len(),
            report.hashed,
            format_bytes(report.bytes_hashed),
        );
        if !report.errors.is_empty() {
            summary.push_str(&format!(", {} errors", report.errors.len()));
        }
        if report.dry_run {
            summary.push_str(" [dry run]");
        }
        if report.interrupted {
            summary.push_str(" [interrupted]");
        }
        writeln!(writer, "{}", summary)
    }

    /// One line per record: mtime, size, short checksum, key.
    ///
    /// # Errors
    ///
    /// Returns any error from the writer.
    pub fn write_records<W: Write>(&self, records: &[FileRecord], writer: &mut W) -> io::Result<()> {
        for record in records {
            let hex = record.checksum.to_hex();
            let short = hex.get(..16).unwrap_or(&hex);
            writeln!(
                writer,
                "{}  {:>12}  {}  {}",
                format_mtime(record.modified_since_epoch_sec),
                record.size,
                self.paint(short, Color::Blue),
                record.path
            )?;
        }
        Ok(())
    }

    /// One line describing a migration run.
    ///
    /// # Errors
    ///
    /// Returns any error from the writer.
    pub fn write_migration<W: Write>(&self, report: &MigrationReport, writer: &mut W) -> io::Result<()> {
        if report.is_noop() {
            writeln!(writer, "Cache store already at version {}", report.to)
        } else {
            let steps: Vec<String> = report.applied.iter().map(u32::to_string).collect();
            writeln!(
                writer,
                "Migrated cache store from version {} to {} (applied {})",
                report.from,
                self.paint(&report.to.to_string(), Color::Green),
                steps.join(", ")
            )
        }
    }
}
