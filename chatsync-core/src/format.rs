//! Display helpers

use chrono::DateTime;

/// Render a millisecond timestamp as `dd/MM/yyyy hh:mm AM` (UTC)
///
/// `None` if the timestamp is out of chrono's range.
pub fn format_timestamp(timestamp_ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|time| time.format("%d/%m/%Y %I:%M %p").to_string())
}

/// One-line chat list entry: name, time, and the latest message
pub fn preview_line(preview: &crate::ChatPreview) -> String {
    let time = format_timestamp(preview.timestamp).unwrap_or_default();
    if preview.last_message.is_empty() {
        format!("{:<16} {}", preview.other_username, time)
    } else {
        format!(
            "{:<16} {}  {}",
            preview.other_username, time, preview.last_message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatPreview;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0).as_deref(), Some("01/01/1970 12:00 AM"));
        // 2024-03-05 15:07:00 UTC
        assert_eq!(
            format_timestamp(1_709_651_220_000).as_deref(),
            Some("05/03/2024 03:07 PM")
        );
        assert_eq!(format_timestamp(i64::MAX), None);
    }

    #[test]
    fn test_preview_line() {
        let preview = ChatPreview {
            chat_id: "c1".into(),
            other_user_id: "u2".into(),
            other_username: "bob".into(),
            last_message: "hi".into(),
            timestamp: 0,
        };
        assert_eq!(preview_line(&preview), "bob              01/01/1970 12:00 AM  hi");
    }
}
