//! Wall-clock instrumentation for epoch passes.

use std::time::{Duration, Instant};

use tracing::info;

/// Run `f`, log how long it took under `label`, and pass its value through.
pub fn timed<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let value = f();
    info!("{} took {}", label, format_duration(start.elapsed()));
    value
}

/// `0.8s`, `2m 05s` or `1h 01m`
fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    match total {
        0..=59 => format!("{:.1}s", elapsed.as_secs_f64()),
        60..=3599 => format!("{}m {:02}s", total / 60, total % 60),
        _ => format!("{}h {:02}m", total / 3600, (total % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(30_500)), "30.5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m");
    }

    #[test]
    fn test_timed_passes_value_through() {
        let value = timed("sum", || (1..=4).sum::<u32>());
        assert_eq!(value, 10);
    }
}
