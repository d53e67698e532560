//! XMLTV timestamp parsing

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse an XMLTV timestamp such as `20231215120000 +0100`.
///
/// The date part may be truncated to minutes (`YYYYMMDDHHMM`). An explicit
/// offset wins; otherwise the timestamp is read as local time in `default_tz`.
pub fn parse_xmltv_datetime(value: &str, default_tz: &Tz) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let digits_len = value.chars().take_while(|c| c.is_ascii_digit()).count();
    let (digits, rest) = value.split_at(digits_len);

    let naive = parse_naive(digits)?;
    let offset = rest.trim();

    if offset.is_empty() {
        // DST transitions make some local times ambiguous; take the earlier one
        return default_tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
    }

    let fixed = parse_offset(offset)?;
    fixed
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_naive(digits: &str) -> Option<NaiveDateTime> {
    let digits = match digits.len() {
        12 => format!("{digits}00"),
        len if len >= 14 => digits[..14].to_string(),
        _ => return None,
    };

    let year: i32 = digits[0..4].parse().ok()?;
    let month: u32 = digits[4..6].parse().ok()?;
    let day: u32 = digits[6..8].parse().ok()?;
    let hour: u32 = digits[8..10].parse().ok()?;
    let minute: u32 = digits[10..12].parse().ok()?;
    let second: u32 = digits[12..14].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Parse `+HHMM`, `-HH:MM`, `Z`, `UTC` or `GMT`.
fn parse_offset(offset: &str) -> Option<FixedOffset> {
    if matches!(offset.to_ascii_uppercase().as_str(), "Z" | "UTC" | "GMT") {
        return FixedOffset::east_opt(0);
    }

    let (sign, body) = match offset.as_bytes().first()? {
        b'+' => (1, &offset[1..]),
        b'-' => (-1, &offset[1..]),
        _ => return None,
    };
    let body: String = body.chars().filter(|c| *c != ':').collect();
    if body.len() != 4 || !body.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = body[0..2].parse().ok()?;
    let minutes: i32 = body[2..4].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
