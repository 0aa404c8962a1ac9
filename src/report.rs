use crate::monitor::{ResourceCounts, ResourceLog};
use crate::output::{self, OutputFormatter};
use crate::Result;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// What a finished scan hands back to the caller after the log has been written.
#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub url: Option<String>,
    pub log_file: PathBuf,
    pub counts: ResourceCounts,
    pub blocked_urls: Vec<String>,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub log: ResourceLog,
}

impl OutputFormatter for ScanReport {
    fn format_text(&self) -> String {
        use crate::output::text;

        let mut lines = vec![
            text::heading("Scan Complete"),
            text::field("URL", self.url.as_deref().unwrap_or("(none)")),
            text::count("Resources", self.counts.total, false),
            text::count("Completed", self.counts.completed, false),
            text::count("Failed", self.counts.failed, false),
            text::count("Pending", self.counts.pending, true),
            text::count("Blocked", self.counts.blocked, true),
            text::field("Duration", &text::elapsed(self.elapsed_ms)),
        ];

        if !self.blocked_urls.is_empty() {
            lines.push(String::new());
            lines.push(text::flagged("Requests into private networks were aborted:"));
            lines.extend(self.blocked_urls.iter().map(|url| text::item(&text::shorten(url, 100))));
        }

        lines.push(String::new());
        lines.push(text::done(&format!("Log written to {}", self.log_file.display())));
        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> Result<String> {
        output::to_json(self, pretty)
    }
}
