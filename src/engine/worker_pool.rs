use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, RecvTimeoutError, Sender},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const WORKERS_ENV: &str = "TRACKSLEUTH_WORKERS";

/// What came back for one job.
pub(crate) enum JobOutcome<R> {
    Finished(R),
    /// The job panicked; the payload message when it was a string.
    Panicked(String),
    /// The job ran past its deadline and was abandoned.
    TimedOut,
}

/// How a pool run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolExit {
    /// Every job reported back, finished or not.
    Completed,
    /// The result handler asked to stop early.
    Stopped,
}

/// Resolve the worker count: explicit value, then `TRACKSLEUTH_WORKERS`, then
/// one per available core.
pub(crate) fn worker_count_with_override(override_count: u32) -> usize {
    if override_count >= 1 {
        return override_count as usize;
    }
    if let Ok(value) = std::env::var(WORKERS_ENV)
        && let Ok(parsed) = value.trim().parse::<usize>()
        && parsed >= 1
    {
        return parsed;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

struct Running {
    worker: usize,
    started: Instant,
}

struct PoolState<J> {
    queue: VecDeque<(usize, J)>,
    /// Claimed jobs by index.
    running: HashMap<usize, Running>,
    /// Workers whose job was abandoned; they exit once it returns.
    retired: HashSet<usize>,
}

struct Shared<J, W> {
    state: Mutex<PoolState<J>>,
    cancel: AtomicBool,
    work: W,
}

impl<J, W> Shared<J, W> {
    fn state(&self) -> MutexGuard<'_, PoolState<J>> {
        // Jobs never run under the lock, so a poisoned guard still holds consistent state.
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Earliest moment a running job becomes overdue.
    fn next_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.state()
            .running
            .values()
            .map(|running| running.started + timeout)
            .min()
    }

    /// Take every overdue job off the running set and retire its worker.
    fn expire_overdue(&self, timeout: Duration) -> Vec<usize> {
        let now = Instant::now();
        let mut state = self.state();
        let mut overdue: Vec<(usize, usize)> = state
            .running
            .iter()
            .filter(|(_, running)| now.duration_since(running.started) >= timeout)
            .map(|(index, running)| (*index, running.worker))
            .collect();
        overdue.sort_unstable();
        for (index, worker) in &overdue {
            state.running.remove(index);
            state.retired.insert(*worker);
        }
        overdue.into_iter().map(|(index, _)| index).collect()
    }

    /// Drain the queue on the calling thread, without deadlines.
    fn run_inline<R, H>(&self, on_result: &mut H) -> PoolExit
    where
        W: Fn(J) -> R,
        H: FnMut(usize, JobOutcome<R>) -> ControlFlow<()>,
    {
        loop {
            let next = self.state().queue.pop_front();
            let Some((index, job)) = next else {
                return PoolExit::Completed;
            };
            let outcome = match catch_unwind(AssertUnwindSafe(|| (self.work)(job))) {
                Ok(result) => JobOutcome::Finished(result),
                Err(payload) => JobOutcome::Panicked(panic_message(payload.as_ref())),
            };
            if on_result(index, outcome).is_break() {
                return PoolExit::Stopped;
            }
        }
    }
}

/// Run `work` over `jobs` on `workers` threads and hand each outcome, tagged
/// with the job's position in `jobs`, to `on_result` on the calling thread.
///
/// Results arrive in completion order. A job that panics is reported as
/// `Panicked` and the worker keeps going. Each job has its own `timeout`
/// measured from when a worker claimed it: an overdue job is reported as
/// `TimedOut`, its worker is detached and a replacement keeps draining the
/// queue.
pub(crate) fn run_jobs<J, R, W, H>(
    jobs: Vec<J>,
    workers: usize,
    timeout: Duration,
    work: W,
    mut on_result: H,
) -> PoolExit
where
    J: Send + 'static,
    R: Send + 'static,
    W: Fn(J) -> R + Send + Sync + 'static,
    H: FnMut(usize, JobOutcome<R>) -> ControlFlow<()>,
{
    let total = jobs.len();
    if total == 0 {
        return PoolExit::Completed;
    }
    let shared = Arc::new(Shared {
        state: Mutex::new(PoolState {
            queue: jobs.into_iter().enumerate().collect(),
            running: HashMap::new(),
            retired: HashSet::new(),
        }),
        cancel: AtomicBool::new(false),
        work,
    });
    let (tx, rx) = mpsc::channel::<(usize, JobOutcome<R>)>();

    let mut handles: Vec<(usize, JoinHandle<()>)> = Vec::new();
    let mut next_worker = 0;
    for _ in 0..workers.clamp(1, total) {
        if let Some(handle) = spawn_worker(next_worker, &shared, &tx) {
            handles.push((next_worker, handle));
        }
        next_worker += 1;
    }
    if handles.is_empty() {
        // Nothing could be spawned; do the work here.
        return shared.run_inline(&mut on_result);
    }

    let mut remaining = total;
    let mut exit = PoolExit::Completed;
    'collect: while remaining > 0 {
        let wait = shared
            .next_deadline(timeout)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(timeout);
        match rx.recv_timeout(wait) {
            Ok((index, outcome)) => {
                remaining -= 1;
                if on_result(index, outcome).is_break() {
                    exit = PoolExit::Stopped;
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let expired = shared.expire_overdue(timeout);
                let (idle, backlog) = {
                    let state = shared.state();
                    (state.running.is_empty(), !state.queue.is_empty())
                };
                // Queued work that nobody claimed for a whole timeout means no worker is left.
                let stalled = expired.is_empty() && idle && backlog;
                let wanted = match (backlog, stalled) {
                    (false, _) => 0,
                    (true, true) => 1,
                    (true, false) => expired.len(),
                };
                let mut spawned = 0;
                for _ in 0..wanted {
                    if let Some(handle) = spawn_worker(next_worker, &shared, &tx) {
                        handles.push((next_worker, handle));
                        spawned += 1;
                    }
                    next_worker += 1;
                }
                for index in expired {
                    tracing::warn!("Fingerprint job {index} exceeded {timeout:?}; abandoning it");
                    remaining -= 1;
                    if on_result(index, JobOutcome::TimedOut).is_break() {
                        exit = PoolExit::Stopped;
                        break 'collect;
                    }
                }
                if stalled && spawned == 0 {
                    tracing::warn!("No fingerprint worker could be respawned; finishing inline");
                    exit = shared.run_inline(&mut on_result);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.cancel.store(true, Ordering::Relaxed);
    drop(tx);
    let retired = shared.state().retired.clone();
    for (worker, handle) in handles {
        // Abandoned workers are detached; the rest finish their current job and exit.
        if !retired.contains(&worker) {
            let _ = handle.join();
        }
    }
    exit
}

fn spawn_worker<J, R, W>(
    worker: usize,
    shared: &Arc<Shared<J, W>>,
    tx: &Sender<(usize, JobOutcome<R>)>,
) -> Option<JoinHandle<()>>
where
    J: Send + 'static,
    R: Send + 'static,
    W: Fn(J) -> R + Send + Sync + 'static,
{
    let shared = Arc::clone(shared);
    let tx = tx.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("fingerprint-worker-{worker}"))
        .spawn(move || {
            loop {
                if shared.cancel.load(Ordering::Relaxed) {
                    break;
                }
                let next = {
                    let mut state = shared.state();
                    if state.retired.contains(&worker) {
                        None
                    } else {
                        let next = state.queue.pop_front();
                        if let Some((index, _)) = &next {
                            state.running.insert(
                                *index,
                                Running {
                                    worker,
                                    started: Instant::now(),
                                },
                            );
                        }
                        next
                    }
                };
                let Some((index, job)) = next else {
                    break;
                };
                let outcome = match catch_unwind(AssertUnwindSafe(|| (shared.work)(job))) {
                    Ok(result) => JobOutcome::Finished(result),
                    Err(payload) => JobOutcome::Panicked(panic_message(payload.as_ref())),
                };
                // A missing entry means the job was already reported as timed out.
                if shared.state().running.remove(&index).is_none() {
                    break;
                }
                if tx.send((index, outcome)).is_err() {
                    break;
                }
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!("Failed to spawn fingerprint worker: {err}");
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn every_job_reports_once_with_its_index() {
        let mut seen = BTreeMap::new();
        let exit = run_jobs(
            (0..20u32).collect(),
            4,
            Duration::from_secs(5),
            |n| n * 2,
            |index, outcome| {
                if let JobOutcome::Finished(value) = outcome {
                    seen.insert(index, value);
                }
                ControlFlow::Continue(())
            },
        );
        assert_eq!(exit, PoolExit::Completed);
        assert_eq!(seen.len(), 20);
        assert!(seen.iter().all(|(index, value)| *value == *index as u32 * 2));
    }

    #[test]
    fn panicking_job_does_not_stop_the_pool() {
        let mut finished = 0;
        let mut panics = Vec::new();
        let exit = run_jobs(
            vec![1, 2, 3, 4],
            2,
            Duration::from_secs(5),
            |n: i32| {
                if n == 3 {
                    panic!("bad job {n}");
                }
                n
            },
            |_, outcome| {
                match outcome {
                    JobOutcome::Finished(_) => finished += 1,
                    JobOutcome::Panicked(message) => panics.push(message),
                    JobOutcome::TimedOut => panic!("no job should time out"),
                }
                ControlFlow::Continue(())
            },
        );
        assert_eq!(exit, PoolExit::Completed);
        assert_eq!(finished, 3);
        assert_eq!(panics, vec!["bad job 3".to_string()]);
    }

    #[test]
    fn slow_job_times_out_alone_while_the_rest_finish() {
        let started = Instant::now();
        let mut outcomes = BTreeMap::new();
        let exit = run_jobs(
            vec![0u64, 1, 2, 3],
            1,
            Duration::from_millis(50),
            |n| {
                if n == 0 {
                    std::thread::sleep(Duration::from_secs(2));
                }
                n
            },
            |index, outcome| {
                let label = match outcome {
                    JobOutcome::Finished(value) => format!("finished {value}"),
                    JobOutcome::Panicked(message) => format!("panicked {message}"),
                    JobOutcome::TimedOut => "timed out".to_string(),
                };
                outcomes.insert(index, label);
                ControlFlow::Continue(())
            },
        );
        assert_eq!(exit, PoolExit::Completed);
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[&0], "timed out");
        for index in 1..4 {
            assert_eq!(outcomes[&index], format!("finished {index}"));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn deadline_runs_from_when_each_job_starts() {
        let mut finished = 0;
        let exit = run_jobs(
            vec![30u64; 6],
            1,
            Duration::from_millis(120),
            |ms| std::thread::sleep(Duration::from_millis(ms)),
            |_, outcome| {
                if matches!(outcome, JobOutcome::Finished(())) {
                    finished += 1;
                }
                ControlFlow::Continue(())
            },
        );
        assert_eq!(exit, PoolExit::Completed);
        assert_eq!(finished, 6);
    }

    #[test]
    fn handler_can_stop_on_a_timed_out_job() {
        let mut calls = 0;
        let exit = run_jobs(
            vec![0u64],
            1,
            Duration::from_millis(20),
            |_| std::thread::sleep(Duration::from_millis(500)),
            |_, outcome| {
                calls += 1;
                assert!(matches!(outcome, JobOutcome::TimedOut));
                ControlFlow::Break(())
            },
        );
        assert_eq!(exit, PoolExit::Stopped);
        assert_eq!(calls, 1);
    }

    #[test]
    fn handler_can_stop_early() {
        let mut calls = 0;
        let exit = run_jobs(
            (0..50).collect::<Vec<u32>>(),
            1,
            Duration::from_secs(5),
            |n| n,
            |_, _| {
                calls += 1;
                ControlFlow::Break(())
            },
        );
        assert_eq!(exit, PoolExit::Stopped);
        assert_eq!(calls, 1);
    }

    #[test]
    fn explicit_worker_count_wins() {
        assert_eq!(worker_count_with_override(3), 3);
        assert!(worker_count_with_override(0) >= 1);
    }
}
