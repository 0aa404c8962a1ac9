use serde::Serialize;

pub trait OutputFormatter {
    fn format_text(&self) -> String;
    fn format_json(&self, pretty: bool) -> crate::Result<String>;
}

pub fn print_output<T: OutputFormatter>(
    data: &T,
    as_json: bool,
    json_pretty: bool,
) -> crate::Result<()> {
    let output = if as_json {
        data.format_json(json_pretty)?
    } else {
        data.format_text()
    };

    println!("{}", output);
    Ok(())
}

pub fn to_json<T: Serialize>(data: &T, pretty: bool) -> crate::Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(data)?)
    } else {
        Ok(serde_json::to_string(data)?)
    }
}

/// Terminal helpers for the human-readable scan summary.
pub mod text {
    use colored::Colorize;

    pub fn heading(title: &str) -> String {
        format!("{}\n{}", title.bold(), "─".repeat(title.chars().count()))
    }

    pub fn field(label: &str, value: &str) -> String {
        let label = format!("{:<10}", format!("{}:", label));
        format!("  {} {}", label.bold(), value)
    }

    /// A count line. Non-zero counts flagged as `alert` are printed in red.
    pub fn count(label: &str, n: usize, alert: bool) -> String {
        let value = if alert && n > 0 {
            n.to_string().red().bold().to_string()
        } else {
            n.to_string()
        };
        field(label, &value)
    }

    pub fn flagged(msg: &str) -> String {
        format!("{} {}", "⚠".yellow().bold(), msg)
    }

    pub fn done(msg: &str) -> String {
        format!("{} {}", "✓".green().bold(), msg)
    }

    pub fn item(msg: &str) -> String {
        format!("    - {}", msg)
    }

    /// Shortens long URLs on a char boundary.
    pub fn shorten(s: &str, max_chars: usize) -> String {
        if s.chars().count() <= max_chars {
            return s.to_string();
        }
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }

    pub fn elapsed(ms: u64) -> String {
        match ms {
            0..=999 => format!("{}ms", ms),
            _ => format!("{:.2}s", ms as f64 / 1000.0),
        }
    }
}
