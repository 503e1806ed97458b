//! Colored output helpers for CLI
//!
//! Status lines go to stdout, errors to stderr. With colors off every line
//! carries a bracketed tag instead of a symbol so output stays greppable.

use owo_colors::OwoColorize;

use crate::types::DocumentHit;

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

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    fn status_line(&self, symbol: String, tag: &str, message: String) -> String {
        if self.colored {
            format!("  {} {}", symbol, message)
        } else {
            format!("  [{}] {}", tag, message)
        }
    }

    pub fn success(&self, message: &str) {
        println!(
            "{}",
            self.status_line(
                "✓".green().bold().to_string(),
                "OK",
                message.green().to_string()
            )
        );
    }

    pub fn info(&self, message: &str) {
        println!(
            "{}",
            self.status_line("•".blue().to_string(), "INFO", message.to_string())
        );
    }

    pub fn warning(&self, message: &str) {
        println!(
            "{}",
            self.status_line(
                "⚠".yellow().bold().to_string(),
                "WARN",
                message.yellow().to_string()
            )
        );
    }

    /// Errors go to stderr
    pub fn error(&self, message: &str) {
        let line = if self.colored {
            self.status_line("✗".red().bold().to_string(), "ERROR", message.red().to_string())
        } else {
            self.status_line(String::new(), "ERROR", message.to_string())
        };
        eprintln!("{}", line);
    }

    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Indented `key: value` line under a header
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {:<20} {}", format!("{}:", key).dimmed(), value.bright_white());
        } else {
            println!("    {:<20} {}", format!("{}:", key), value);
        }
    }

    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// One ranked search hit with its highlight underneath
    pub fn hit(&self, rank: usize, hit: &DocumentHit) {
        let score = format!("{:.3}", hit.score);
        if self.colored {
            println!(
                "  {} {} {} {}",
                format!("{:>2}.", rank).dimmed(),
                score.bright_cyan(),
                hit.title.bright_white().bold(),
                format!("(doc {})", hit.doc_id).dimmed()
            );
            println!("      {}", hit.highlight.italic());
        } else {
            println!("  {:>2}. {} {} (doc {})", rank, score, hit.title, hit.doc_id);
            println!("      {}", hit.highlight);
        }
    }

    pub fn newline(&self) {
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_default() {
        assert!(Output::default().colored);
        assert!(!Output::no_color().colored);
    }

    #[test]
    fn test_plain_status_line_uses_tag() {
        let output = Output::no_color();
        let line = output.status_line("✓".to_string(), "OK", "Indexed".to_string());
        assert_eq!(line, "  [OK] Indexed");
    }

    #[test]
    fn test_output_methods_no_panic() {
        let hit = DocumentHit {
            doc_id: 3,
            title: "Caching notes".to_string(),
            score: 0.8123,
            chunk_id: 12,
            highlight: "Entries expire after one hour.".to_string(),
        };

        for output in [Output::no_color(), Output::new()] {
            output.success("test success");
            output.info("test info");
            output.warning("test warning");
            output.error("test error");
            output.header("Test Header");
            output.kv("key", "value");
            output.hint("hint message");
            output.hit(1, &hit);
            output.newline();
        }
    }
}
