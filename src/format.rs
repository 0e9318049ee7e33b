//! Display helpers for durations and speeds.

/// Formats milliseconds as `HH:MM:SS.cc`; negative values render as `--:--:--`.
pub fn format_duration(ms: i64) -> String {
    if ms < 0 {
        return "--:--:--".to_string();
    }
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let centis = (ms % 1000) / 10;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{centis:02}")
}

/// Average speed in km/h; zero for non-positive durations.
pub fn speed_kmh(distance_km: f64, ms: i64) -> f64 {
    if ms <= 0 {
        return 0.0;
    }
    distance_km / (ms as f64 / 3_600_000.0)
}

/// Speed with two decimals.
pub fn format_speed(distance_km: f64, ms: i64) -> String {
    format!("{:.2}", speed_kmh(distance_km, ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration(0), "00:00:00.00");
        assert_eq!(format_duration(3_723_456), "01:02:03.45");
        assert_eq!(format_duration(-1), "--:--:--");
    }

    #[test]
    fn speeds() {
        assert_eq!(format_speed(10.0, 3_600_000), "10.00");
        assert_eq!(format_speed(10.0, 0), "0.00");
        assert_eq!(format_speed(21.1, 5_400_000), "14.07");
    }
}
