use std::path::Path;

use crate::{Error, Result};

pub(crate) fn read_trimmed(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();

    let raw = std::fs::read_to_string(path).map_err(|e| Error::unreadable(e, path))?;

    Ok(raw.trim().to_string())
}

pub(crate) fn read_usize(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let raw = read_trimmed(path)?;

    raw.parse().map_err(|e| Error::unparseable(e, path))
}

/// Read a hex-formatted register value, with or without a leading `0x`.
pub(crate) fn read_hex_u64(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let raw = read_trimmed(path)?;
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")).unwrap_or(&raw);

    u64::from_str_radix(digits, 16).map_err(|e| Error::unparseable(e, path))
}

/// Read a kernel cpu list such as `0-3,8`.
pub(crate) fn read_cpu_list(path: impl AsRef<Path>) -> Result<Vec<usize>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| Error::unreadable(e, path))?;

    Ok(parse_cpu_list(&raw))
}

pub(crate) fn parse_cpu_list(raw: &str) -> Vec<usize> {
    let mut cpus = Vec::new();

    for chunk in raw.trim().split(',') {
        let mut bounds = chunk.split('-');

        let first: Option<usize> = bounds.next().and_then(|text| text.trim().parse().ok());
        let second: Option<usize> = bounds.next().and_then(|text| text.trim().parse().ok());

        if bounds.next().is_some() {
            // malformed range, skip it
            continue;
        }

        match (first, second) {
            (Some(cpu), None) => cpus.push(cpu),
            (Some(start), Some(stop)) => cpus.extend(start..=stop),
            _ => continue,
        }
    }

    cpus
}

/// Parse an integer the way `strtol` with base 0 would: an optional sign,
/// then `0x`/`0X` for hex, a leading `0` for octal, decimal otherwise.
/// Trailing garbage fails the parse.
pub(crate) fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim();

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    if digits.is_empty() {
        return None;
    }

    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    let magnitude = i64::from_str_radix(digits, radix).ok()?;

    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_list_parsing() {
        assert_eq!(parse_cpu_list("0-1\r\n"), vec![0, 1]);
        assert_eq!(parse_cpu_list("0-3,8"), vec![0, 1, 2, 3, 8]);
        assert_eq!(parse_cpu_list("5"), vec![5]);
        assert_eq!(parse_cpu_list(""), Vec::<usize>::new());
        assert_eq!(parse_cpu_list("1-2-3,4"), vec![4]);
    }

    #[test]
    fn radix_detection() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("0x41"), Some(0x41));
        assert_eq!(parse_int("0X41"), Some(0x41));
        assert_eq!(parse_int("0xd03"), Some(0xd03));
        assert_eq!(parse_int("017"), Some(0o17));
        assert_eq!(parse_int("0"), Some(0));
        assert_eq!(parse_int("-5"), Some(-5));
        assert_eq!(parse_int("+5"), Some(5));
        assert_eq!(parse_int(" 7 "), Some(7));
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("12abc"), None);
        assert_eq!(parse_int("0x"), None);
    }
}
