//! Progress reporting on stderr, matching C git's progress.c behavior.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Receives progress events from a long-running pack operation.
///
/// The operation polls [`is_cancelled`](ProgressMonitor::is_cancelled)
/// between units of work; once it returns true the operation aborts with a
/// cancellation error and cleans up its temporary artifacts.
pub trait ProgressMonitor {
    /// Announce how many tasks the operation will run, at most.
    fn start(&mut self, total_tasks: usize) {
        let _ = total_tasks;
    }

    /// Begin a task with an optional total unit count.
    fn begin_task(&mut self, title: &str, total: Option<u64>);

    /// Report `count` additional units of completed work.
    fn update(&mut self, count: u64);

    /// Finish the current task.
    fn end_task(&mut self);

    /// Observed between units of work; true aborts the operation.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Monitor that swallows every event.
pub struct NoProgress;

impl ProgressMonitor for NoProgress {
    fn begin_task(&mut self, _title: &str, _total: Option<u64>) {}
    fn update(&mut self, _count: u64) {}
    fn end_task(&mut self) {}
}

/// Shared cancellation flag, settable from a signal handler or another
/// thread.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Minimum delay between display refreshes in milliseconds.
const REFRESH_DELAY_MS: u64 = 100;

/// Rate-limited textual progress on stderr.
///
/// Displays updates like:
/// - `Receiving objects: 42` (no total)
/// - `Receiving objects:  50% (42/84)` (with total)
///
/// and finishes each task with a `, done.` line.
pub struct TextProgress {
    task: Option<Task>,
    cancel: CancelFlag,
}

struct Task {
    title: String,
    total: Option<u64>,
    current: u64,
    start_time: Instant,
    last_refresh: Instant,
    last_percent: Option<u32>,
    shown: bool,
}

impl TextProgress {
    pub fn new() -> Self {
        Self::with_cancel(CancelFlag::new())
    }

    /// Create a progress display that observes the given cancellation flag.
    pub fn with_cancel(cancel: CancelFlag) -> Self {
        Self { task: None, cancel }
    }

    fn refresh(task: &mut Task, force: bool) {
        let now = Instant::now();
        if task.shown
            && !force
            && now.duration_since(task.last_refresh).as_millis() < u128::from(REFRESH_DELAY_MS)
        {
            return;
        }

        let line = match task.total {
            Some(total) if total > 0 => {
                let percent = ((task.current as f64 / total as f64) * 100.0) as u32;
                if task.shown && !force && task.last_percent == Some(percent) {
                    return;
                }
                task.last_percent = Some(percent);
                format!(
                    "\r{}: {:3}% ({}/{})",
                    task.title, percent, task.current, total
                )
            }
            _ => format!("\r{}: {}", task.title, task.current),
        };

        task.shown = true;
        task.last_refresh = now;
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{}", line);
        let _ = stderr.flush();
    }
}

impl Default for TextProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressMonitor for TextProgress {
    fn begin_task(&mut self, title: &str, total: Option<u64>) {
        self.end_task();
        let now = Instant::now();
        self.task = Some(Task {
            title: title.to_string(),
            total,
            current: 0,
            start_time: now,
            last_refresh: now,
            last_percent: None,
            shown: false,
        });
    }

    fn update(&mut self, count: u64) {
        if let Some(task) = self.task.as_mut() {
            task.current += count;
            let force = task.total == Some(task.current);
            Self::refresh(task, force);
        }
    }

    fn end_task(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        if !task.shown {
            return;
        }
        Self::refresh(&mut task, true);
        let elapsed = task.start_time.elapsed();
        let elapsed_str = if elapsed.as_secs() > 0 {
            format!(", {:.2}s", elapsed.as_secs_f64())
        } else {
            String::new()
        };
        let mut stderr = io::stderr();
        let _ = writeln!(stderr, "{}, done.", elapsed_str);
        let _ = stderr.flush();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_progress_ignores_everything() {
        let mut p = NoProgress;
        p.start(2);
        p.begin_task("Receiving objects", Some(10));
        p.update(10);
        p.end_task();
        assert!(!p.is_cancelled());
    }

    #[test]
    fn cancel_flag_propagates() {
        let flag = CancelFlag::new();
        let p = TextProgress::with_cancel(flag.clone());
        assert!(!p.is_cancelled());
        flag.cancel();
        assert!(p.is_cancelled());
    }

    #[test]
    fn task_lifecycle_counts() {
        let mut p = TextProgress::new();
        p.begin_task("Resolving deltas", Some(3));
        p.update(1);
        p.update(2);
        assert_eq!(p.task.as_ref().map(|t| t.current), Some(3));
        p.end_task();
        assert!(p.task.is_none());
    }

    #[test]
    fn begin_task_replaces_previous() {
        let mut p = TextProgress::new();
        p.begin_task("first", None);
        p.update(5);
        p.begin_task("second", Some(1));
        assert_eq!(p.task.as_ref().map(|t| t.current), Some(0));
    }
}
