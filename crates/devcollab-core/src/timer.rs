use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POMODORO_MINUTES: i64 = 25;
pub const DEFAULT_BREAK_MINUTES: i64 = 5;
pub const CYCLES_PER_LONG_BREAK: i64 = 4;

/// Pomodoro timer state embedded in projects, tasks and subtasks.
///
/// All time-dependent operations take `now` explicitly so callers decide the
/// clock and tests stay deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PomodoroTimer {
    pub pomodoro_start: Option<DateTime<Utc>>,
    pub total_seconds_spent: i64,
    pub paused_elapsed_seconds: i64,
    pub pomodoro_duration: i64,
    pub break_duration: i64,
    pub is_break: bool,
    pub estimated_pomodoros: i64,
    pub completed_pomodoros: i64,
    pub current_cycle: i64,
}

impl Default for PomodoroTimer {
    fn default() -> Self {
        Self {
            pomodoro_start: None,
            total_seconds_spent: 0,
            paused_elapsed_seconds: 0,
            pomodoro_duration: DEFAULT_POMODORO_MINUTES,
            break_duration: DEFAULT_BREAK_MINUTES,
            is_break: false,
            estimated_pomodoros: 1,
            completed_pomodoros: 0,
            current_cycle: 1,
        }
    }
}

impl PomodoroTimer {
    pub fn with_estimate(estimated_pomodoros: i64) -> Self {
        Self {
            estimated_pomodoros,
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.pomodoro_start.is_some()
    }

    /// Seconds in the current session, including any paused portion.
    pub fn elapsed(&self, now: DateTime<Utc>) -> i64 {
        match self.pomodoro_start {
            Some(start) => (now - start).num_seconds().max(0),
            None => self.paused_elapsed_seconds,
        }
    }

    /// Start or resume a work session.
    pub fn start(&mut self, now: DateTime<Utc>) {
        let start = if self.paused_elapsed_seconds > 0 {
            now - chrono::Duration::seconds(self.paused_elapsed_seconds)
        } else {
            now
        };
        self.pomodoro_start = Some(start);
        self.is_break = false;
    }

    /// Freeze the running session. No-op when idle.
    pub fn pause(&mut self, now: DateTime<Utc>) {
        if let Some(start) = self.pomodoro_start.take() {
            self.paused_elapsed_seconds = (now - start).num_seconds().max(0);
        }
    }

    /// End the session and bank its time.
    ///
    /// Returns the elapsed seconds when a running session ended. A paused
    /// session is banked too but yields `None`.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<i64> {
        if let Some(start) = self.pomodoro_start.take() {
            let elapsed = (now - start).num_seconds().max(0);
            self.total_seconds_spent += elapsed;
            self.paused_elapsed_seconds = 0;
            return Some(elapsed);
        }
        if self.paused_elapsed_seconds > 0 {
            self.total_seconds_spent += self.paused_elapsed_seconds;
            self.paused_elapsed_seconds = 0;
        }
        None
    }

    /// End the session and bank whole minutes (at least one).
    ///
    /// Returns the banked minutes, or `None` when no session was running.
    pub fn stop_rounded(&mut self, now: DateTime<Utc>) -> Option<i64> {
        let start = self.pomodoro_start.take()?;
        let minutes = rounded_minutes((now - start).num_seconds().max(0));
        self.total_seconds_spent += minutes * 60;
        self.paused_elapsed_seconds = 0;
        Some(minutes)
    }

    /// Whether a session of `elapsed` seconds earns a completed Pomodoro.
    pub fn counts_as_pomodoro(elapsed: i64) -> bool {
        elapsed > 1
    }

    /// Advance through cycles 1..=4, wrapping back to 1.
    pub fn increment_cycle(&mut self) {
        if self.current_cycle >= CYCLES_PER_LONG_BREAK {
            self.current_cycle = 1;
        } else {
            self.current_cycle += 1;
        }
    }

    pub fn needs_long_break(&self) -> bool {
        self.current_cycle > CYCLES_PER_LONG_BREAK
    }

    pub fn completion_percentage(&self) -> i64 {
        if self.estimated_pomodoros <= 0 {
            return 0;
        }
        (self.completed_pomodoros * 100 / self.estimated_pomodoros).min(100)
    }
}

/// Whole minutes charged for a session: one minute up to 60 s, then rounded up.
pub fn rounded_minutes(elapsed_seconds: i64) -> i64 {
    if elapsed_seconds <= 60 {
        1
    } else {
        (elapsed_seconds + 59) / 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn defaults() {
        let timer = PomodoroTimer::default();
        assert_eq!(timer.pomodoro_duration, 25);
        assert_eq!(timer.break_duration, 5);
        assert_eq!(timer.estimated_pomodoros, 1);
        assert_eq!(timer.current_cycle, 1);
        assert!(!timer.is_running());
    }

    #[test]
    fn start_then_stop_banks_elapsed() {
        let mut timer = PomodoroTimer::default();
        timer.start(t0());
        assert!(timer.is_running());
        let elapsed = timer.stop(t0() + Duration::seconds(90));
        assert_eq!(elapsed, Some(90));
        assert_eq!(timer.total_seconds_spent, 90);
        assert!(!timer.is_running());
    }

    #[test]
    fn pause_and_resume_back_dates_start() {
        let mut timer = PomodoroTimer::default();
        timer.start(t0());
        timer.pause(t0() + Duration::seconds(120));
        assert_eq!(timer.paused_elapsed_seconds, 120);
        assert!(!timer.is_running());

        let resume_at = t0() + Duration::seconds(600);
        timer.start(resume_at);
        assert_eq!(timer.pomodoro_start, Some(resume_at - Duration::seconds(120)));

        let elapsed = timer.stop(resume_at + Duration::seconds(30));
        assert_eq!(elapsed, Some(150));
        assert_eq!(timer.paused_elapsed_seconds, 0);
    }

    #[test]
    fn stop_while_paused_banks_paused_time() {
        let mut timer = PomodoroTimer::default();
        timer.start(t0());
        timer.pause(t0() + Duration::seconds(45));
        assert_eq!(timer.stop(t0() + Duration::seconds(500)), None);
        assert_eq!(timer.total_seconds_spent, 45);
        assert_eq!(timer.paused_elapsed_seconds, 0);
    }

    #[test]
    fn pause_when_idle_is_noop() {
        let mut timer = PomodoroTimer::default();
        timer.pause(t0());
        assert_eq!(timer.paused_elapsed_seconds, 0);
    }

    #[test]
    fn start_clears_break() {
        let mut timer = PomodoroTimer {
            is_break: true,
            ..Default::default()
        };
        timer.start(t0());
        assert!(!timer.is_break);
    }

    #[test]
    fn rounded_stop_charges_at_least_a_minute() {
        let mut timer = PomodoroTimer {
            total_seconds_spent: 30,
            ..Default::default()
        };
        timer.start(t0());
        assert_eq!(timer.stop_rounded(t0() + Duration::seconds(5)), Some(1));
        assert_eq!(timer.total_seconds_spent, 90);

        timer.start(t0());
        assert_eq!(timer.stop_rounded(t0() + Duration::seconds(61)), Some(2));
        assert_eq!(timer.total_seconds_spent, 210);
    }

    #[test]
    fn rounded_stop_when_idle_is_none() {
        let mut timer = PomodoroTimer::default();
        assert_eq!(timer.stop_rounded(t0()), None);
    }

    #[test]
    fn rounded_minutes_boundaries() {
        assert_eq!(rounded_minutes(0), 1);
        assert_eq!(rounded_minutes(60), 1);
        assert_eq!(rounded_minutes(61), 2);
        assert_eq!(rounded_minutes(120), 2);
        assert_eq!(rounded_minutes(121), 3);
    }

    #[test]
    fn short_sessions_do_not_count() {
        assert!(!PomodoroTimer::counts_as_pomodoro(0));
        assert!(!PomodoroTimer::counts_as_pomodoro(1));
        assert!(PomodoroTimer::counts_as_pomodoro(2));
    }

    #[test]
    fn cycle_wraps_after_four() {
        let mut timer = PomodoroTimer::default();
        let seen: Vec<i64> = (0..5)
            .map(|_| {
                timer.increment_cycle();
                timer.current_cycle
            })
            .collect();
        assert_eq!(seen, vec![2, 3, 4, 1, 2]);
    }

    #[test]
    fn long_break_only_past_fourth_cycle() {
        let mut timer = PomodoroTimer::default();
        timer.current_cycle = 4;
        assert!(!timer.needs_long_break());
        timer.current_cycle = 5;
        assert!(timer.needs_long_break());
    }

    #[test]
    fn completion_percentage_is_capped() {
        let mut timer = PomodoroTimer::with_estimate(4);
        timer.completed_pomodoros = 1;
        assert_eq!(timer.completion_percentage(), 25);
        timer.completed_pomodoros = 9;
        assert_eq!(timer.completion_percentage(), 100);
        timer.estimated_pomodoros = 0;
        assert_eq!(timer.completion_percentage(), 0);
    }
}
