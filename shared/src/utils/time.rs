//! Time-related utilities

/// Format a nanosecond duration with the largest fitting unit
pub fn format_duration_ns(nanos: u64) -> String {
    const NS_PER_US: u64 = 1_000;
    const NS_PER_MS: u64 = 1_000_000;
    const NS_PER_S: u64 = 1_000_000_000;

    if nanos >= NS_PER_S {
        format!("{:.3}s", nanos as f64 / NS_PER_S as f64)
    } else if nanos >= NS_PER_MS {
        format!("{:.3}ms", nanos as f64 / NS_PER_MS as f64)
    } else if nanos >= NS_PER_US {
        format!("{:.3}µs", nanos as f64 / NS_PER_US as f64)
    } else {
        format!("{}ns", nanos)
    }
}

/// Format a timestamp as `seconds.nanoseconds`, the way perf prints sample times
pub fn format_timestamp(nanos: u64) -> String {
    format!("{}.{:09}", nanos / 1_000_000_000, nanos % 1_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ns(999), "999ns");
        assert_eq!(format_duration_ns(1_500), "1.500µs");
        assert_eq!(format_duration_ns(2_000_000), "2.000ms");
        assert_eq!(format_duration_ns(3_250_000_000), "3.250s");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_000_000_042), "1.000000042");
        assert_eq!(format_timestamp(0), "0.000000000");
    }
}
