//! Display helpers for sizes, durations and counters shown on the page.

use bytesize::ByteSize;

/// Formats a byte count, or "Unknown size" when the extractor didn't report one
pub fn format_bytes(bytes: Option<u64>) -> String {
    match bytes {
        Some(bytes) => ByteSize::b(bytes).to_string(),
        None => "Unknown size".to_string(),
    }
}

/// Formats a transfer rate in bytes per second
pub fn format_speed(bytes_per_sec: Option<f64>) -> String {
    match bytes_per_sec {
        Some(speed) if speed.is_finite() && speed > 0.0 => {
            format!("{}/s", format_bytes(Some(speed as u64)))
        }
        _ => "N/A".to_string(),
    }
}

/// Formats a duration as `1h 02m 03s`, or `02m 03s` under an hour
pub fn format_duration(seconds: Option<f64>) -> String {
    let seconds = match seconds {
        Some(s) if s.is_finite() && s >= 1.0 => s as u64,
        _ => return "N/A".to_string(),
    };

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else {
        format!("{minutes:02}m {seconds:02}s")
    }
}

/// Groups digits by thousands with a space, e.g. `1 234 567`
pub fn format_large_number(number: Option<u64>) -> String {
    let Some(number) = number else {
        return "N/A".to_string();
    };

    let digits = number.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_small_and_unknown() {
        assert_eq!(format_bytes(Some(512)), "512 B");
        assert_eq!(format_bytes(None), "Unknown size");
    }

    #[test]
    fn speed_falls_back_to_na() {
        assert_eq!(format_speed(None), "N/A");
        assert_eq!(format_speed(Some(0.0)), "N/A");
        assert_eq!(format_speed(Some(f64::NAN)), "N/A");
        assert_eq!(format_speed(Some(512.0)), "512 B/s");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(None), "N/A");
        assert_eq!(format_duration(Some(0.0)), "N/A");
        assert_eq!(format_duration(Some(65.0)), "01m 05s");
        assert_eq!(format_duration(Some(3723.4)), "1h 02m 03s");
    }

    #[test]
    fn large_numbers() {
        assert_eq!(format_large_number(None), "N/A");
        assert_eq!(format_large_number(Some(7)), "7");
        assert_eq!(format_large_number(Some(1000)), "1 000");
        assert_eq!(format_large_number(Some(1234567)), "1 234 567");
        assert_eq!(format_large_number(Some(123456)), "123 456");
    }
}
