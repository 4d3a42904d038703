//! Progress display for chunked FastTransfer loops.

use indicatif::{ProgressBar, ProgressStyle};

/// Progress of a GetBuffer/PutBuffer loop, counted in steps
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Create a tracker; the total is filled in from the first response
    #[must_use]
    pub fn new(label: &str, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };

        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len} steps")
        {
            bar.set_style(style.progress_chars("#>-"));
        }

        bar.set_message(label.to_string());

        Self { bar }
    }

    /// Record one GetBuffer or PutBuffer response
    pub fn update(&self, in_progress: u16, total: u16) {
        self.bar.set_length(u64::from(total));
        self.bar.set_position(u64::from(in_progress));
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(0x8000), "32.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_hidden_progress_tracks_steps() {
        let progress = TransferProgress::new("copy", true);
        progress.update(3, 7);
        assert_eq!(progress.bar.length(), Some(7));
        assert_eq!(progress.bar.position(), 3);
        progress.finish_with_message("done".to_string());
    }
}
