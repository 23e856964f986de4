//! Periodic task runner for scheduled organize passes.
//!
//! Jobs run on a single background thread that wakes once per tick and runs
//! every job whose time has come. A job that overruns delays the ones after it.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid time of day '{0}': expected HH:MM")]
    InvalidTime(String),

    #[error("Interval must be positive and within range")]
    InvalidInterval,

    #[error("Failed to start scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Task = Box<dyn FnMut() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Every(ChronoDuration),
    DailyAt(NaiveTime),
}

impl Schedule {
    /// `None` when the next run falls outside the representable date range.
    fn next_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match *self {
            Schedule::Every(interval) => now.checked_add_signed(interval),
            Schedule::DailyAt(time) => {
                let today = now.date().and_time(time);
                if today > now {
                    Some(today)
                } else {
                    today.checked_add_signed(ChronoDuration::days(1))
                }
            }
        }
    }
}

struct Job {
    schedule: Schedule,
    next_run: NaiveDateTime,
    task: Task,
}

/// Runs interval and daily jobs on a background thread.
pub struct TaskScheduler {
    jobs: Arc<Mutex<Vec<Job>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    tick: Duration,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::with_tick(DEFAULT_TICK)
    }

    /// Creates a scheduler that checks for due jobs every `tick`.
    pub fn with_tick(tick: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            tick,
        }
    }

    /// Runs `task` every `interval`, first after one interval has passed.
    pub fn add_interval_task(&self, interval: Duration, task: Task) -> Result<(), SchedulerError> {
        let interval =
            ChronoDuration::from_std(interval).map_err(|_| SchedulerError::InvalidInterval)?;
        if interval <= ChronoDuration::zero() {
            return Err(SchedulerError::InvalidInterval);
        }
        self.push(Schedule::Every(interval), task)
    }

    /// Runs `task` every day at `time_of_day` (local `HH:MM`).
    pub fn add_daily_task(&self, time_of_day: &str, task: Task) -> Result<(), SchedulerError> {
        let time = NaiveTime::parse_from_str(time_of_day, "%H:%M")
            .map_err(|_| SchedulerError::InvalidTime(time_of_day.to_string()))?;
        self.push(Schedule::DailyAt(time), task)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts the background thread. Does nothing if already running.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.worker.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let jobs = self.jobs.clone();
        let running = self.running.clone();
        let tick = self.tick;
        let worker = thread::Builder::new()
            .name("tidydesk-scheduler".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    run_due(&jobs, Local::now().naive_local());
                    thread::sleep(tick);
                }
            })?;

        self.worker = Some(worker);
        tracing::info!("[scheduler] started with {} jobs", self.job_count());
        Ok(())
    }

    /// Stops the background thread and waits for it. Does nothing when stopped.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        if worker.join().is_err() {
            tracing::error!("[scheduler] worker thread panicked");
        }
        tracing::info!("[scheduler] stopped");
    }

    /// Runs every job due at `now`, returning how many ran.
    pub fn run_pending(&self, now: NaiveDateTime) -> usize {
        run_due(&self.jobs, now)
    }

    fn push(&self, schedule: Schedule, task: Task) -> Result<(), SchedulerError> {
        let next_run = schedule
            .next_after(Local::now().naive_local())
            .ok_or(SchedulerError::InvalidInterval)?;
        tracing::debug!("[scheduler] job {schedule:?} first runs at {next_run}");
        self.jobs.lock().push(Job {
            schedule,
            next_run,
            task,
        });
        Ok(())
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_due(jobs: &Mutex<Vec<Job>>, now: NaiveDateTime) -> usize {
    let mut jobs = jobs.lock();
    let mut ran = 0;
    for job in jobs.iter_mut().filter(|job| job.next_run <= now) {
        (job.task)();
        // out of range: the job never comes due again
        job.next_run = job
            .schedule
            .next_after(now)
            .unwrap_or(NaiveDateTime::MAX);
        ran += 1;
    }
    ran
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_interval_task_runs_when_due() {
        let scheduler = TaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .add_interval_task(Duration::from_secs(60), counting_task(&counter))
            .unwrap();

        let now = Local::now().naive_local();
        assert_eq!(scheduler.run_pending(now), 0);
        assert_eq!(scheduler.run_pending(now + ChronoDuration::seconds(61)), 1);
        // rescheduled one interval after the run
        assert_eq!(scheduler.run_pending(now + ChronoDuration::seconds(62)), 0);
        assert_eq!(scheduler.run_pending(now + ChronoDuration::seconds(122)), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_daily_next_run() {
        let time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let schedule = Schedule::DailyAt(time);
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();

        let before = date.and_hms_opt(8, 0, 0).unwrap();
        assert_eq!(schedule.next_after(before), Some(date.and_time(time)));

        let after = date.and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(after),
            Some(date.succ_opt().unwrap().and_time(time))
        );
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let scheduler = TaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(matches!(
            scheduler.add_daily_task("25:99", counting_task(&counter)),
            Err(SchedulerError::InvalidTime(_))
        ));
        assert!(matches!(
            scheduler.add_interval_task(Duration::ZERO, counting_task(&counter)),
            Err(SchedulerError::InvalidInterval)
        ));
        assert_eq!(scheduler.job_count(), 0);
    }

    #[test]
    fn test_interval_past_calendar_range_rejected() {
        let scheduler = TaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        // fits in a TimeDelta but not in a NaiveDateTime
        let result = scheduler.add_interval_task(
            Duration::from_secs(60 * 1_000_000_000_000),
            counting_task(&counter),
        );

        assert!(matches!(result, Err(SchedulerError::InvalidInterval)));
        assert_eq!(scheduler.job_count(), 0);
    }

    #[test]
    fn test_overflowing_reschedule_parks_job() {
        let now = Local::now().naive_local();
        let jobs = Mutex::new(vec![Job {
            schedule: Schedule::Every(ChronoDuration::days(1)),
            next_run: now,
            task: Box::new(|| {}),
        }]);

        assert_eq!(run_due(&jobs, NaiveDateTime::MAX), 1);
        assert_eq!(jobs.lock()[0].next_run, NaiveDateTime::MAX);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut scheduler = TaskScheduler::with_tick(Duration::from_millis(10));
        scheduler.stop();

        scheduler.start().unwrap();
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_background_thread_runs_jobs() {
        let mut scheduler = TaskScheduler::with_tick(Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .add_interval_task(Duration::from_millis(20), counting_task(&counter))
            .unwrap();

        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        scheduler.stop();

        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
