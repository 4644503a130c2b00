//! Timer job schedules and the per-job overlap guard.
//!
//! Schedules are a closed set of cron-style expressions in UTC with a
//! pure `next_after` function; the async runner in the service layer owns
//! the actual task closures and the clock.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::Serialize;

use crate::clock;

/// A cron-style firing rule, UTC throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSchedule {
    EveryMinute,
    /// Once an hour at the given minute.
    Hourly { minute: i64 },
    /// Once a day at the given time.
    Daily { hour: i64, minute: i64 },
    /// Once a week on the given weekday.
    Weekly {
        weekday: Weekday,
        hour: i64,
        minute: i64,
    },
    /// Once a month on the given day (1..=28 to exist in every month).
    Monthly { day: i64, hour: i64, minute: i64 },
}

impl JobSchedule {
    /// The first firing instant strictly after `now`.
    pub fn next_after(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let day = clock::day_start(now);
        match self {
            Self::EveryMinute => {
                let minute_start = day + Duration::minutes((now - day).num_minutes());
                minute_start + Duration::minutes(1)
            }
            Self::Hourly { minute } => {
                let hour_start = day + Duration::hours((now - day).num_hours());
                let candidate = hour_start + Duration::minutes(minute);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            Self::Daily { hour, minute } => {
                let candidate = day + Duration::hours(hour) + Duration::minutes(minute);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            Self::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let week_start =
                    day - Duration::days(i64::from(now.weekday().num_days_from_monday()));
                let candidate = week_start
                    + Duration::days(i64::from(weekday.num_days_from_monday()))
                    + Duration::hours(hour)
                    + Duration::minutes(minute);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(7)
                }
            }
            Self::Monthly { day: dom, hour, minute } => {
                let month_start = day - Duration::days(i64::from(now.day()) - 1);
                let in_month = |start: DateTime<Utc>| {
                    start + Duration::days(dom - 1)
                        + Duration::hours(hour)
                        + Duration::minutes(minute)
                };
                let candidate = in_month(month_start);
                if candidate > now {
                    candidate
                } else {
                    let probe = month_start + Duration::days(32);
                    let next_month_start =
                        clock::day_start(probe) - Duration::days(i64::from(probe.day()) - 1);
                    in_month(next_month_start)
                }
            }
        }
    }
}

/// Per-job bookkeeping: next due time, overlap guard, last outcome.
#[derive(Debug, Clone)]
struct JobState {
    schedule: JobSchedule,
    next_due: DateTime<Utc>,
    running: bool,
    last_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Snapshot row for the system-status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub running: bool,
    pub next_due: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Fixed registry of named timer jobs. The registry never runs anything
/// itself; it answers "what is due" and enforces that no job overlaps its
/// own previous run.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobState>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard job table: crop readiness every minute, reward and
    /// contest cadences at their daily/weekly/monthly boundaries, expiry
    /// hourly, stats/cleanup/backup overnight.
    pub fn standard(now: DateTime<Utc>) -> Self {
        let mut registry = Self::new();
        registry.register("crop-monitor", JobSchedule::EveryMinute, now);
        registry.register("vip-rewards", JobSchedule::Daily { hour: 0, minute: 1 }, now);
        registry.register(
            "daily-contest",
            JobSchedule::Daily { hour: 0, minute: 0 },
            now,
        );
        registry.register(
            "weekly-contest",
            JobSchedule::Weekly {
                weekday: Weekday::Mon,
                hour: 0,
                minute: 0,
            },
            now,
        );
        registry.register(
            "monthly-contest",
            JobSchedule::Monthly {
                day: 1,
                hour: 0,
                minute: 0,
            },
            now,
        );
        registry.register(
            "contest-winners",
            JobSchedule::Daily {
                hour: 23,
                minute: 30,
            },
            now,
        );
        registry.register("vip-expiry", JobSchedule::Hourly { minute: 0 }, now);
        registry.register(
            "daily-stats",
            JobSchedule::Daily {
                hour: 23,
                minute: 59,
            },
            now,
        );
        registry.register("cleanup", JobSchedule::Daily { hour: 2, minute: 0 }, now);
        registry.register("backup", JobSchedule::Daily { hour: 3, minute: 0 }, now);
        registry
    }

    pub fn register(&mut self, name: &str, schedule: JobSchedule, now: DateTime<Utc>) {
        self.jobs.insert(
            name.to_string(),
            JobState {
                schedule,
                next_due: schedule.next_after(now),
                running: false,
                last_run: None,
                last_error: None,
            },
        );
    }

    /// Names of jobs due at `now`, excluding any still running from a
    /// previous tick.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|(_, state)| !state.running && state.next_due <= now)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Claim a job for execution. Returns false when the job is unknown
    /// or already running, in which case the caller must skip it.
    pub fn begin(&mut self, name: &str) -> bool {
        match self.jobs.get_mut(name) {
            Some(state) if !state.running => {
                state.running = true;
                true
            }
            _ => false,
        }
    }

    /// Record a finished run and schedule the next one. Failures are kept
    /// for the status surface; the job simply fires again at its next
    /// boundary.
    pub fn finish(&mut self, name: &str, now: DateTime<Utc>, result: Result<(), String>) {
        if let Some(state) = self.jobs.get_mut(name) {
            state.running = false;
            state.last_run = Some(now);
            state.last_error = result.err();
            state.next_due = state.schedule.next_after(now);
        }
    }

    pub fn status(&self) -> Vec<JobStatus> {
        self.jobs
            .iter()
            .map(|(name, state)| JobStatus {
                name: name.clone(),
                running: state.running,
                next_due: state.next_due,
                last_run: state.last_run,
                last_error: state.last_error.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn every_minute_fires_on_the_next_minute() {
        let schedule = JobSchedule::EveryMinute;
        assert_eq!(
            schedule.next_after(at(2024, 6, 5, 9, 0, 30)),
            at(2024, 6, 5, 9, 1, 0)
        );
        assert_eq!(
            schedule.next_after(at(2024, 6, 5, 23, 59, 1)),
            at(2024, 6, 6, 0, 0, 0)
        );
    }

    #[test]
    fn hourly_rolls_past_its_minute() {
        let schedule = JobSchedule::Hourly { minute: 0 };
        assert_eq!(
            schedule.next_after(at(2024, 6, 5, 9, 0, 0)),
            at(2024, 6, 5, 10, 0, 0)
        );
        let offset = JobSchedule::Hourly { minute: 30 };
        assert_eq!(
            offset.next_after(at(2024, 6, 5, 9, 10, 0)),
            at(2024, 6, 5, 9, 30, 0)
        );
    }

    #[test]
    fn daily_fires_tomorrow_once_passed() {
        let schedule = JobSchedule::Daily {
            hour: 23,
            minute: 30,
        };
        assert_eq!(
            schedule.next_after(at(2024, 6, 5, 9, 0, 0)),
            at(2024, 6, 5, 23, 30, 0)
        );
        assert_eq!(
            schedule.next_after(at(2024, 6, 5, 23, 30, 0)),
            at(2024, 6, 6, 23, 30, 0)
        );
    }

    #[test]
    fn weekly_targets_monday_midnight() {
        let schedule = JobSchedule::Weekly {
            weekday: Weekday::Mon,
            hour: 0,
            minute: 0,
        };
        // Wednesday June 5 -> Monday June 10.
        assert_eq!(
            schedule.next_after(at(2024, 6, 5, 9, 0, 0)),
            at(2024, 6, 10, 0, 0, 0)
        );
        // Monday midnight itself is not strictly after.
        assert_eq!(
            schedule.next_after(at(2024, 6, 10, 0, 0, 0)),
            at(2024, 6, 17, 0, 0, 0)
        );
    }

    #[test]
    fn monthly_crosses_the_month_boundary() {
        let schedule = JobSchedule::Monthly {
            day: 1,
            hour: 0,
            minute: 0,
        };
        assert_eq!(
            schedule.next_after(at(2024, 6, 5, 9, 0, 0)),
            at(2024, 7, 1, 0, 0, 0)
        );
        assert_eq!(
            schedule.next_after(at(2024, 12, 31, 23, 59, 59)),
            at(2025, 1, 1, 0, 0, 0)
        );
    }

    #[test]
    fn registry_guards_against_overlapping_runs() {
        let now = at(2024, 6, 5, 9, 0, 30);
        let mut registry = JobRegistry::new();
        registry.register("sweep", JobSchedule::EveryMinute, now);

        let due_at = at(2024, 6, 5, 9, 1, 0);
        assert_eq!(registry.due_jobs(due_at), vec!["sweep".to_string()]);
        assert!(registry.begin("sweep"));
        // Still running: not due again, cannot be claimed twice.
        assert!(registry.due_jobs(at(2024, 6, 5, 9, 2, 0)).is_empty());
        assert!(!registry.begin("sweep"));

        registry.finish("sweep", at(2024, 6, 5, 9, 2, 10), Err("boom".to_string()));
        let status = registry.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].last_error.as_deref(), Some("boom"));
        assert_eq!(status[0].next_due, at(2024, 6, 5, 9, 3, 0));
    }

    #[test]
    fn standard_registry_has_the_full_job_table() {
        let registry = JobRegistry::standard(at(2024, 6, 5, 9, 0, 0));
        let names: Vec<String> = registry
            .status()
            .into_iter()
            .map(|status| status.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "backup",
                "cleanup",
                "contest-winners",
                "crop-monitor",
                "daily-contest",
                "daily-stats",
                "monthly-contest",
                "vip-expiry",
                "vip-rewards",
                "weekly-contest",
            ]
        );
    }
}
