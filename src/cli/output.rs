//! Colored output helpers for CLI
//!
//! Every line the copilot-server binary prints goes through [`Output`] so
//! `--no-color` gives plain, grep-friendly text.

use owo_colors::{OwoColorize, Style};

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
enum Status {
    Ok,
    Info,
    Warn,
    Error,
    Created,
    Skipped,
}

impl Status {
    /// Bracketed tag used when color is off
    fn tag(self) -> &'static str {
        match self {
            Status::Ok => "[OK]",
            Status::Info => "[INFO]",
            Status::Warn => "[WARN]",
            Status::Error => "[ERROR]",
            Status::Created => "[CREATED]",
            Status::Skipped => "[SKIPPED]",
        }
    }

    fn glyph(self) -> &'static str {
        match self {
            Status::Ok | Status::Created => "✓",
            Status::Info => "•",
            Status::Warn => "⚠",
            Status::Error => "✗",
            Status::Skipped => "○",
        }
    }

    fn style(self) -> Style {
        match self {
            Status::Ok | Status::Created => Style::new().green().bold(),
            Status::Info => Style::new().blue(),
            Status::Warn | Status::Skipped => Style::new().yellow(),
            Status::Error => Style::new().red().bold(),
        }
    }
}

impl Output {
    pub fn new() -> Self {
        Self { colored: true }
    }

    pub fn no_color() -> Self {
        Self { colored: false }
    }

    fn status_line(&self, status: Status, message: &str) -> String {
        if !self.colored {
            return format!("  {} {}", status.tag(), message);
        }
        let body = match status {
            Status::Ok | Status::Warn | Status::Error => {
                message.style(status.style()).to_string()
            }
            _ => message.to_string(),
        };
        format!("  {} {}", status.glyph().style(status.style()), body)
    }

    /// One-line product banner
    pub fn banner(&self) {
        let version = format!("v{}", env!("CARGO_PKG_VERSION"));
        if self.colored {
            println!("\n  {} {}\n", "ERP Copilot".bright_cyan().bold(), version.dimmed());
        } else {
            println!("\n  ERP Copilot {}\n", version);
        }
    }

    pub fn success(&self, message: &str) {
        println!("{}", self.status_line(Status::Ok, message));
    }

    pub fn info(&self, message: &str) {
        println!("{}", self.status_line(Status::Info, message));
    }

    pub fn warning(&self, message: &str) {
        println!("{}", self.status_line(Status::Warn, message));
    }

    /// Errors go to stderr
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.status_line(Status::Error, message));
    }

    pub fn created(&self, file_type: &str, path: &str) {
        let message = if self.colored {
            format!("{} {}", file_type.dimmed(), path.bright_white())
        } else {
            format!("{} {}", file_type, path)
        };
        println!("{}", self.status_line(Status::Created, &message));
    }

    pub fn skipped(&self, path: &str, reason: &str) {
        let message = if self.colored {
            format!("{} {}", path.dimmed(), format!("({})", reason).yellow())
        } else {
            format!("{} ({})", path, reason)
        };
        println!("{}", self.status_line(Status::Skipped, &message));
    }

    pub fn header(&self, title: &str) {
        let title = if self.colored {
            title.bright_white().bold().underline().to_string()
        } else {
            format!("=== {} ===", title)
        };
        println!("\n  {}", title);
    }

    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    pub fn list_item(&self, item: &str) {
        let bullet = if self.colored {
            "•".blue().to_string()
        } else {
            "-".to_string()
        };
        println!("    {} {}", bullet, item);
    }

    pub fn hint(&self, message: &str) {
        let text = if self.colored {
            message.dimmed().italic().to_string()
        } else {
            format!("[TIP] {}", message)
        };
        println!("\n  {}", text);
    }

    /// A shell command the operator can copy
    pub fn command(&self, cmd: &str) {
        let line = format!("$ {}", cmd);
        if self.colored {
            println!("     {}", line.bright_cyan());
        } else {
            println!("     {}", line);
        }
    }

    /// Table header padded to `widths`; the last column is never padded
    pub fn table_header(&self, columns: &[&str], widths: &[usize]) {
        let header = pad_row(columns, widths);
        let rule_len = header.chars().count().max(1);
        if self.colored {
            println!("    {}", header.bright_white().bold());
            println!("    {}", "─".repeat(rule_len).dimmed());
        } else {
            println!("    {}\n    {}", header, "-".repeat(rule_len));
        }
    }

    pub fn table_row(&self, values: &[&str], widths: &[usize]) {
        println!("    {}", pad_row(values, widths));
    }

    pub fn newline(&self) {
        println!();
    }
}

fn pad_row(values: &[&str], widths: &[usize]) -> String {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| match widths.get(i) {
            Some(w) if i + 1 < values.len() => format!("{:<w$}", v, w = *w),
            _ => v.to_string(),
        })
        .collect::<Vec<_>>()
        .join("  ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_modes() {
        assert!(Output::new().colored);
        assert!(Output::default().colored);
        assert!(!Output::no_color().colored);
    }

    #[test]
    fn test_plain_status_lines_use_tags() {
        let output = Output::no_color();
        assert_eq!(output.status_line(Status::Ok, "done"), "  [OK] done");
        assert_eq!(
            output.status_line(Status::Warn, "no action agent"),
            "  [WARN] no action agent"
        );
        assert_eq!(output.status_line(Status::Error, "boom"), "  [ERROR] boom");
    }

    #[test]
    fn test_colored_status_lines_use_glyphs() {
        let line = Output::new().status_line(Status::Ok, "done");
        assert!(line.contains("✓"));
        assert!(!line.contains("[OK]"));
    }

    #[test]
    fn test_pad_row() {
        assert_eq!(pad_row(&["id", "domain", "x"], &[6, 8, 4]), "id      domain    x");
        assert_eq!(pad_row(&["only"], &[10]), "only");
        assert_eq!(pad_row(&[], &[]), "");
    }

    #[test]
    fn test_output_methods_no_panic() {
        for output in [Output::no_color(), Output::new()] {
            output.banner();
            output.success("ok");
            output.info("info");
            output.warning("warn");
            output.error("err");
            output.created("file", "copilot.toml");
            output.skipped("copilot.toml", "exists");
            output.header("Header");
            output.kv("key", "value");
            output.list_item("item");
            output.hint("hint");
            output.command("copilot-server check");
            output.table_header(&["Agent", "Domain"], &[12, 10]);
            output.table_row(&["query-1", "query"], &[12, 10]);
            output.newline();
        }
    }
}
