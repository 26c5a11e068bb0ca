//! Provides parsing and formatting helpers for byte sizes and durations.
//!
//! Sizes and durations appear in the config (e.g. the memory budget of a group or the timeout
//! used when talking to peers) as well as in log messages and statistics.
use std::fmt::Write;
use std::time::Duration;

/// Formats a duration given in microseconds.
///
/// The unit (ranging from microseconds to seconds) is picked so that the output remains short.
/// Use [format_short_duration](format_short_duration) to obtain a String directly.
pub fn format_micros(micros: u64, f: &mut dyn std::fmt::Write) -> std::fmt::Result {
    match micros {
        0..=999 => write!(f, "{} us", micros),
        1_000..=9_999 => write!(f, "{:.2} ms", micros as f64 / 1_000.),
        10_000..=99_999 => write!(f, "{:.1} ms", micros as f64 / 1_000.),
        100_000..=999_999 => write!(f, "{} ms", micros / 1_000),
        1_000_000..=9_999_999 => write!(f, "{:.2} s", micros as f64 / 1_000_000.),
        10_000_000..=99_999_999 => write!(f, "{:.1} s", micros as f64 / 1_000_000.),
        _ => write!(f, "{} s", micros / 1_000_000),
    }
}

/// Formats a duration given in microseconds into a String.
///
/// # Examples
///
/// ```
/// # use geecache::fmt::format_short_duration;
/// assert_eq!(format_short_duration(100), "100 us");
/// assert_eq!(format_short_duration(8_192), "8.19 ms");
/// assert_eq!(format_short_duration(32_768), "32.8 ms");
/// assert_eq!(format_short_duration(128_123), "128 ms");
/// assert_eq!(format_short_duration(1_128_123), "1.13 s");
/// assert_eq!(format_short_duration(10_128_123), "10.1 s");
/// assert_eq!(format_short_duration(101_000_000), "101 s");
/// ```
pub fn format_short_duration(duration_in_micros: u64) -> String {
    let mut result = String::new();
    let _ = format_micros(duration_in_micros, &mut result);
    result
}

/// Formats a size given in bytes.
///
/// The unit (ranging from bytes to pebibytes) is picked so that the output remains short.
/// Use [format_size](format_size) to obtain a String directly.
pub fn format_bytes(size_in_bytes: usize, f: &mut dyn std::fmt::Write) -> std::fmt::Result {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    match size_in_bytes {
        1 => return write!(f, "1 byte"),
        0..=1023 => return write!(f, "{} bytes", size_in_bytes),
        _ => (),
    }

    let mut unit = 0;
    let mut size = size_in_bytes as f64 / 1024.;
    while size > 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size <= 10. {
        write!(f, "{:.2} {}", size, UNITS[unit])
    } else if size <= 100. {
        write!(f, "{:.1} {}", size, UNITS[unit])
    } else {
        write!(f, "{:.0} {}", size, UNITS[unit])
    }
}

/// Formats a size given in bytes into a String.
///
/// # Examples
///
/// ```
/// # use geecache::fmt::format_size;
/// assert_eq!(format_size(0), "0 bytes");
/// assert_eq!(format_size(1), "1 byte");
/// assert_eq!(format_size(100), "100 bytes");
/// assert_eq!(format_size(2048), "2.00 KiB");
/// assert_eq!(format_size(87_340), "85.3 KiB");
/// assert_eq!(format_size(873_400), "853 KiB");
/// assert_eq!(format_size(8_734_000), "8.33 MiB");
/// assert_eq!(format_size(8_734_000_000), "8.13 GiB");
/// assert_eq!(format_size(873_400_000_000_000_000), "776 PiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    let mut result = String::new();
    let _ = format_bytes(size_in_bytes, &mut result);

    result
}

/// Parses a size like "2k" or "64 MB".
///
/// The following suffixes are supported (case insensitive, an optional trailing **b** is
/// ignored):
/// * **k**: KiB (1024 bytes)
/// * **m**: MiB
/// * **g**: GiB
/// * **t**: TiB
///
/// # Examples
///
/// ```
/// # use geecache::fmt::parse_size;
/// assert_eq!(parse_size("100").unwrap(), 100);
/// assert_eq!(parse_size("100b").unwrap(), 100);
/// assert_eq!(parse_size("2k").unwrap(), 2048);
/// assert_eq!(parse_size("64 MB").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(parse_size("4 G").unwrap(), 4 * 1024 * 1024 * 1024);
///
/// // Unknown suffixes, decimal or negative numbers are rejected...
/// assert!(parse_size("3 Y").is_err());
/// assert!(parse_size("1.2g").is_err());
/// assert!(parse_size("-1").is_err());
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *([kKmMgGtT]?)[bB]? *$").unwrap();
    }

    let captures = NUMBER_AND_SUFFIX.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a size. \
             Expected a positive number and optionally 'k', 'm', 'g' or 't' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1].parse::<usize>()?;
    let factor: usize = match &captures[2] {
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        "t" | "T" => 1 << 40,
        _ => 1,
    };

    number
        .checked_mul(factor)
        .ok_or_else(|| anyhow::anyhow!("The size '{}' is too large.", str.as_ref()))
}

/// Parses a duration like "500ms" or "5 s".
///
/// The following suffixes are supported:
/// * **ms**: milliseconds (also used if no suffix is given)
/// * **s**: seconds
/// * **m**: minutes
/// * **h**: hours
/// * **d**: days
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use geecache::fmt::parse_duration;
/// assert_eq!(parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("3 M").unwrap(), Duration::from_secs(3 * 60));
/// assert_eq!(parse_duration("2 h").unwrap(), Duration::from_secs(2 * 60 * 60));
/// assert_eq!(parse_duration("1 d").unwrap(), Duration::from_secs(24 * 60 * 60));
///
/// assert!(parse_duration("3 Y").is_err());
/// assert!(parse_duration("1.2s").is_err());
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *(ms|s|m|h|d|MS|S|M|H|D)? *$").unwrap();
    }

    let captures = NUMBER_AND_SUFFIX.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a duration. \
             Expected a positive number and optionally 'ms', 's', 'm', 'h' or 'd' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1].parse::<u64>()?;
    let seconds = |factor: u64| {
        number
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| anyhow::anyhow!("The duration '{}' is too large.", str.as_ref()))
    };

    match captures.get(2).map(|suffix| suffix.as_str()) {
        Some("s") | Some("S") => seconds(1),
        Some("m") | Some("M") => seconds(60),
        Some("h") | Some("H") => seconds(60 * 60),
        Some("d") | Some("D") => seconds(24 * 60 * 60),
        _ => Ok(Duration::from_millis(number)),
    }
}

/// Formats a duration into a string like "1d 3h 17m 2s 12ms".
///
/// Units which are zero are omitted, a zero duration is rendered as "0ms".
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use geecache::fmt::format_duration;
/// assert_eq!(format_duration(Duration::ZERO), "0ms");
/// assert_eq!(format_duration(Duration::from_millis(13)), "13ms");
/// assert_eq!(format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(format_duration(Duration::from_secs(5)), "5s");
/// assert_eq!(format_duration(Duration::from_secs(60 * 61)), "1h 1m");
/// assert_eq!(format_duration(Duration::from_secs(24 * 60 * 60 + 59)), "1d 59s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(u128, &str); 5] = [
        (24 * 60 * 60 * 1000, "d"),
        (60 * 60 * 1000, "h"),
        (60 * 1000, "m"),
        (1000, "s"),
        (1, "ms"),
    ];

    let mut result = String::new();
    let mut value = duration.as_millis();
    for (millis, unit) in UNITS {
        let amount = value / millis;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, unit);
            value %= millis;
        }
    }

    if result.is_empty() {
        result.push_str("0ms");
    }

    result
}
