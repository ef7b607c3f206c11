//! Utility functions and helpers for mongobucket
//!
//! - Time and duration formatting
//! - Byte size formatting and parsing

/// Time utilities
pub mod time {
    use std::time::Duration;

    /// Format duration as human-readable string
    ///
    /// # Arguments
    /// * `duration` - Duration to format
    ///
    /// # Returns
    /// * `String` - Formatted duration (e.g., "1h 30m 45s")
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let millis = duration.subsec_millis();

        if secs == 0 {
            return format!("{}ms", millis);
        }

        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        let mut parts = Vec::new();

        if hours > 0 {
            parts.push(format!("{}h", hours));
        }
        if minutes > 0 {
            parts.push(format!("{}m", minutes));
        }
        if seconds > 0 || parts.is_empty() {
            parts.push(format!("{}s", seconds));
        }

        parts.join(" ")
    }
}

/// Conversion utilities
pub mod convert {
    /// Format bytes as human-readable size
    ///
    /// # Arguments
    /// * `bytes` - Number of bytes
    ///
    /// # Returns
    /// * `String` - Formatted size (e.g., "1.50 MB")
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Parse human-readable size to bytes
    ///
    /// Accepts a plain number of bytes or a number with a B/KB/MB/GB/TB suffix.
    pub fn parse_bytes(s: &str) -> Option<u64> {
        let s = s.trim().to_uppercase();
        let (num_str, unit) = if let Some(n) = s.strip_suffix("TB") {
            (n, 1024u64.pow(4))
        } else if let Some(n) = s.strip_suffix("GB") {
            (n, 1024u64.pow(3))
        } else if let Some(n) = s.strip_suffix("MB") {
            (n, 1024u64.pow(2))
        } else if let Some(n) = s.strip_suffix("KB") {
            (n, 1024u64)
        } else if let Some(n) = s.strip_suffix('B') {
            (n, 1)
        } else {
            return s.parse().ok();
        };

        num_str
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| *n >= 0.0)
            .map(|n| (n * unit as f64) as u64)
    }
}
