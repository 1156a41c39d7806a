use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;

/// Fixed-width so that lexical order of the stored text equals time order.
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_log_time(value: &NaiveDateTime) -> String {
    value.format(LOG_TIME_FORMAT).to_string()
}

pub fn parse_log_time(value: &str, field: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .with_context(|| format!("failed to parse {field} '{value}'"))
}

pub fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

/// Treats blank strings as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn log_time_text_sorts_like_time() {
        let early = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(format_log_time(&early) < format_log_time(&late));
        assert_eq!(format_log_time(&early), "2024-03-05 09:05:00.000");
    }

    #[test]
    fn parses_with_and_without_fraction() {
        let plain = parse_log_time("2024-03-05 14:30:00", "log_time").unwrap();
        let fractional = parse_log_time("2024-03-05T14:30:00.250", "log_time").unwrap();
        assert_eq!(
            (fractional - plain).num_milliseconds(),
            250
        );
        assert!(parse_log_time("yesterday", "log_time").is_err());
    }

    #[test]
    fn non_empty_trims_blanks() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" 0917 ".into())), Some("0917".into()));
        assert_eq!(non_empty(None), None);
    }
}
