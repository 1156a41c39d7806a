//! Message templating for access notifications.
//!
//! Tokens are written in braces, e.g. `{PERSONNEL.LASTNAME}`. Date and time
//! tokens take an optional custom pattern: `{LOGDATE=DATEFORMAT:yyyy-MM-dd}`,
//! `{LOGTIME=TIMEFORMAT:HH:mm}`. Patterns use the familiar `yyyy`/`MM`/`dd`/
//! `HH`/`mm` letters rather than strftime. Unknown tokens are left as written.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::models::LogEntry;

pub const DEFAULT_DATE_FORMAT: &str = "yyyy-MM-dd";
pub const DEFAULT_TIME_FORMAT: &str = "HH:mm:ss";

pub fn render(template: &str, entry: &LogEntry) -> String {
    let mut output = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];

        let Some(close) = after_open.find('}') else {
            output.push_str(&rest[open..]);
            return output;
        };

        let token = &after_open[..close];
        match expand_token(token, entry) {
            Some(value) => output.push_str(&value),
            None => {
                output.push('{');
                output.push_str(token);
                output.push('}');
            }
        }
        rest = &after_open[close + 1..];
    }

    output.push_str(rest);
    output
}

/// "OUT" wins over "IN" so that e.g. "CHECK-OUT" is not read as "IN".
pub fn direction(event_kind: &str) -> &'static str {
    let upper = event_kind.to_uppercase();
    if upper.contains("OUT") {
        "OUT"
    } else if upper.contains("IN") {
        "IN"
    } else {
        "IN/OUT"
    }
}

fn expand_token(token: &str, entry: &LogEntry) -> Option<String> {
    let (name, argument) = match token.split_once('=') {
        Some((name, argument)) => (name.trim(), Some(argument)),
        None => (token.trim(), None),
    };

    match name.to_uppercase().as_str() {
        "PERSONNEL.LASTNAME" => Some(entry.last_name.clone()),
        "PERSONNEL.FIRSTNAME" => Some(entry.first_name.clone()),
        "PERSONNEL.NAME" => Some(entry.display_name()),
        "IN OR OUT" => Some(direction(&entry.event_kind).to_string()),
        "DEVICE.NAME" => Some(entry.device_name.clone()),
        "EVENT.TEXT" => Some(entry.event_text.clone().unwrap_or_default()),
        "LOGDATE" => Some(format_timestamp(
            &entry.timestamp,
            pattern_argument(argument, "DATEFORMAT").unwrap_or(DEFAULT_DATE_FORMAT),
        )),
        "LOGTIME" => Some(format_timestamp(
            &entry.timestamp,
            pattern_argument(argument, "TIMEFORMAT").unwrap_or(DEFAULT_TIME_FORMAT),
        )),
        _ => None,
    }
}

/// Extracts `<fmt>` from `DATEFORMAT:<fmt>`. Empty patterns count as absent.
fn pattern_argument<'a>(argument: Option<&'a str>, keyword: &str) -> Option<&'a str> {
    let argument = argument?;
    let (label, pattern) = argument.split_once(':')?;
    let label = label.trim();
    if !label.eq_ignore_ascii_case(keyword)
        && !label.eq_ignore_ascii_case("DATEFORMAT")
        && !label.eq_ignore_ascii_case("TIMEFORMAT")
    {
        return None;
    }
    Some(pattern).filter(|pattern| !pattern.trim().is_empty())
}

/// Formats `value` with a `yyyy-MM-dd HH:mm`-style pattern. Letters outside
/// the pattern alphabet, and text in single or double quotes, are copied.
pub fn format_timestamp(value: &NaiveDateTime, pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut output = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' || c == '"' {
            let end = chars[i + 1..]
                .iter()
                .position(|&q| q == c)
                .map(|offset| i + 1 + offset)
                .unwrap_or(chars.len());
            output.extend(&chars[i + 1..end]);
            i = end + 1;
            continue;
        }

        if c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                output.push(escaped);
            }
            i += 2;
            continue;
        }

        let run = chars[i..].iter().take_while(|&&other| other == c).count();
        match c {
            'y' => match run {
                1 => output.push_str(&(value.year() % 100).to_string()),
                2 => output.push_str(&format!("{:02}", value.year() % 100)),
                _ => output.push_str(&format!("{:0width$}", value.year(), width = run)),
            },
            'M' => match run {
                1 => output.push_str(&value.month().to_string()),
                2 => output.push_str(&format!("{:02}", value.month())),
                3 => output.push_str(&value.format("%b").to_string()),
                _ => output.push_str(&value.format("%B").to_string()),
            },
            'd' => match run {
                1 => output.push_str(&value.day().to_string()),
                2 => output.push_str(&format!("{:02}", value.day())),
                3 => output.push_str(&value.format("%a").to_string()),
                _ => output.push_str(&value.format("%A").to_string()),
            },
            'H' => push_number(&mut output, value.hour(), run),
            'h' => push_number(&mut output, value.hour12().1, run),
            'm' => push_number(&mut output, value.minute(), run),
            's' => push_number(&mut output, value.second(), run),
            'f' | 'F' => {
                let digits = run.min(9);
                let nanos = value.nanosecond() % 1_000_000_000;
                let scaled = nanos / 10u32.pow(9 - digits as u32);
                output.push_str(&format!("{:0width$}", scaled, width = digits));
            }
            't' => {
                let marker = if value.hour12().0 { "PM" } else { "AM" };
                output.push_str(if run == 1 { &marker[..1] } else { marker });
            }
            _ => output.extend(std::iter::repeat(c).take(run)),
        }
        i += run;
    }

    output
}

fn push_number(output: &mut String, value: u32, run: usize) {
    if run >= 2 {
        output.push_str(&format!("{value:02}"));
    } else {
        output.push_str(&value.to_string());
    }
}
