// libs/video-call-cell/src/services/timer.rs
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::models::CallMetrics;

/// Tracks elapsed wall-clock time of an active call for display.
///
/// Starting twice without stopping restarts the clock; the last start wins.
#[derive(Debug, Default)]
pub struct CallTimer {
    started: Option<(Instant, DateTime<Utc>)>,
}

impl CallTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some((Instant::now(), Utc::now()));
    }

    pub fn stop(&mut self) {
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|(instant, _)| instant.elapsed())
    }

    pub fn metrics(&self) -> Option<CallMetrics> {
        self.started.map(|(_, started_at)| CallMetrics { started_at })
    }

    /// Elapsed time formatted `MM:SS`, seconds floored.
    pub fn display(&self) -> Option<String> {
        self.elapsed().map(format_duration)
    }
}

pub fn format_duration(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_pads_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs(5)), "00:05");
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(600)), "10:00");
    }

    #[test]
    fn test_minutes_keep_counting_past_an_hour() {
        assert_eq!(format_duration(Duration::from_secs(3661)), "61:01");
    }

    #[test]
    fn test_seconds_are_floored() {
        assert_eq!(format_duration(Duration::from_millis(1999)), "00:01");
    }

    #[test]
    fn test_stop_clears_the_clock() {
        let mut timer = CallTimer::new();
        timer.start();
        assert!(timer.is_running());
        assert!(timer.metrics().is_some());

        timer.stop();
        assert!(!timer.is_running());
        assert!(timer.elapsed().is_none());
        assert!(timer.display().is_none());
    }

    #[test]
    fn test_last_start_wins() {
        let mut timer = CallTimer::new();
        timer.start();
        let first = timer.metrics().map(|m| m.started_at);
        timer.start();
        let second = timer.metrics().map(|m| m.started_at);
        assert!(second >= first);
        assert!(timer.elapsed().unwrap() < Duration::from_secs(1));
    }
}
