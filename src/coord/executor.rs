//! Bounded concurrent executor.
//!
//! A fixed pool of `N` worker threads pulls items from a shared bounded
//! queue and runs a [`Doer`] on each one. Every worker owns a
//! [`WorkerSlot`] it can write a progress line into while the handler runs.
//! Finished results go through a second bounded queue (capacity `N`) to a
//! single renderer, which prints them in completion order and, on an
//! interactive terminal, redraws the non-empty slots in between.
//!
//! ```text
//!   items ──► [item queue: N] ──► worker 0..N ──► [result queue: N] ──► renderer ──► out
//!                                   │  slot                              ▲
//!                                   └───────────── progress ────────────┘
//! ```

use std::io::{self, Write};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, trace};

use crate::settings::Threads;

/// Interval between two renderer passes.
pub const RENDER_TICK: Duration = Duration::from_millis(250);

/// Handler run by the executor workers.
///
/// Implementations fold their own failures into the returned line
/// (e.g. `"<id> [error message]"`); the executor never retries.
pub trait Doer<T>: Sync {
    fn run(&self, item: T, slot: &WorkerSlot) -> String;
}

impl<T, F> Doer<T> for F
where
    F: Fn(T, &WorkerSlot) -> String + Sync,
{
    fn run(&self, item: T, slot: &WorkerSlot) -> String {
        self(item, slot)
    }
}

/// Progress line owned by one worker.
#[derive(Debug, Default)]
pub struct WorkerSlot {
    progress: RwLock<String>,
}

impl WorkerSlot {
    pub fn set(&self, progress: impl Into<String>) {
        let mut guard = self.progress.write().unwrap_or_else(|e| e.into_inner());
        *guard = progress.into();
    }

    pub fn clear(&self) {
        self.set(String::new());
    }

    pub fn snapshot(&self) -> String {
        self.progress
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// How the renderer presents work in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Redraw worker slots in place between results.
    Live,
    /// Print final results only.
    Silent,
}

impl ProgressMode {
    /// Inspect stdout and stderr, then decide with [`ProgressMode::choose`].
    pub fn detect(silent: bool) -> Self {
        let interactive =
            console::Term::stdout().is_term() && console::Term::stderr().is_term();
        Self::choose(interactive, silent)
    }

    /// Live progress only when both output streams are terminals and the
    /// user did not ask for silence.
    pub fn choose(interactive: bool, silent: bool) -> Self {
        if interactive && !silent {
            ProgressMode::Live
        } else {
            ProgressMode::Silent
        }
    }
}

/// Counters reported once a run has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub submitted: usize,
    pub printed: usize,
}

/// Runs a [`Doer`] over a stream of items with at most `threads` in flight.
#[derive(Debug, Clone)]
pub struct Coordinator {
    threads: Threads,
    progress: ProgressMode,
    tick: Duration,
}

impl Coordinator {
    /// A zero-sized pool cannot be asked for: [`Threads`] rejects 0 with
    /// [`ConfigError::ZeroThreads`](crate::settings::ConfigError::ZeroThreads)
    /// before any work is scheduled.
    pub fn new(threads: Threads) -> Self {
        Self {
            threads,
            progress: ProgressMode::Silent,
            tick: RENDER_TICK,
        }
    }

    pub fn progress(mut self, mode: ProgressMode) -> Self {
        self.progress = mode;
        self
    }

    #[cfg(test)]
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Process every item and write one line per result to `out`.
    ///
    /// `items` is consumed lazily on the calling thread, so workers start as
    /// soon as the first item is available. Returns after every item has
    /// been handled and every result written.
    pub fn run<T, D, I, W>(&self, doer: &D, items: I, out: &mut W) -> io::Result<RunSummary>
    where
        T: Send,
        D: Doer<T>,
        I: IntoIterator<Item = T>,
        W: Write + Send,
    {
        let n = self.threads.get();
        let (item_tx, item_rx) = bounded::<T>(n);
        let (result_tx, result_rx) = bounded::<String>(n);
        let slots: Vec<WorkerSlot> = (0..n).map(|_| WorkerSlot::default()).collect();
        let mode = self.progress;
        let tick = self.tick;

        debug!(threads = n, ?mode, "starting workers");

        thread::scope(|scope| {
            for (index, slot) in slots.iter().enumerate() {
                let item_rx = item_rx.clone();
                let result_tx = result_tx.clone();
                thread::Builder::new()
                    .name(format!("intelq-worker-{index}"))
                    .spawn_scoped(scope, move || {
                        for item in item_rx.iter() {
                            let result = doer.run(item, slot);
                            slot.clear();
                            trace!(worker = index, "item done");
                            if result_tx.send(result).is_err() {
                                break;
                            }
                        }
                    })?;
            }
            drop(item_rx);
            drop(result_tx);

            let slots = &slots;
            let renderer = scope.spawn(move || render(result_rx, slots, out, mode, tick));

            let mut submitted = 0;
            for item in items {
                // Fails only when every worker is gone (renderer hit a write error).
                if item_tx.send(item).is_err() {
                    break;
                }
                submitted += 1;
            }
            drop(item_tx);

            let printed = match renderer.join() {
                Ok(printed) => printed?,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            debug!(submitted, printed, "run drained");
            Ok(RunSummary { submitted, printed })
        })
    }
}

fn render<W: Write>(
    results: Receiver<String>,
    slots: &[WorkerSlot],
    out: &mut W,
    mode: ProgressMode,
    tick: Duration,
) -> io::Result<usize> {
    match mode {
        ProgressMode::Silent => {
            let mut printed = 0;
            for result in results.iter() {
                write_result(out, &result)?;
                printed += 1;
            }
            out.flush()?;
            Ok(printed)
        }
        ProgressMode::Live => render_live(results, slots, out, tick),
    }
}

fn write_result<W: Write>(out: &mut W, result: &str) -> io::Result<()> {
    // Handlers may return "" when they already produced their own output.
    if result.is_empty() {
        return Ok(());
    }
    writeln!(out, "{result}")
}

fn render_live<W: Write>(
    results: Receiver<String>,
    slots: &[WorkerSlot],
    out: &mut W,
    tick: Duration,
) -> io::Result<usize> {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let mut bars: Vec<Option<ProgressBar>> = vec![None; slots.len()];
    let mut printed = 0;
    let mut last_draw = Instant::now();

    loop {
        match results.recv_timeout(tick) {
            Ok(result) => {
                multi.suspend(|| write_result(out, &result).and_then(|_| out.flush()))?;
                printed += 1;
                if last_draw.elapsed() >= tick {
                    draw_slots(&multi, &style, slots, &mut bars, tick);
                    last_draw = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                draw_slots(&multi, &style, slots, &mut bars, tick);
                last_draw = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for bar in bars.into_iter().flatten() {
        bar.finish_and_clear();
    }
    multi.clear()?;
    Ok(printed)
}

/// Mirror every worker slot onto its spinner; empty slots have no line.
fn draw_slots(
    multi: &MultiProgress,
    style: &ProgressStyle,
    slots: &[WorkerSlot],
    bars: &mut [Option<ProgressBar>],
    tick: Duration,
) {
    for (slot, bar) in slots.iter().zip(bars.iter_mut()) {
        let progress = slot.snapshot();
        if progress.is_empty() {
            if let Some(done) = bar.take() {
                done.finish_and_clear();
                multi.remove(&done);
            }
            continue;
        }
        match bar {
            Some(active) => active.set_message(progress),
            None => {
                let spinner = multi.add(ProgressBar::new_spinner());
                spinner.set_style(style.clone());
                spinner.set_message(progress);
                spinner.enable_steady_tick(tick);
                *bar = Some(spinner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use crate::settings::ConfigError;

    fn pool(threads: usize) -> Coordinator {
        Coordinator::new(Threads::new(threads).unwrap())
    }

    fn lines(out: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(out)
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        let err = Threads::new(0).map(Coordinator::new).unwrap_err();
        assert_eq!(err, ConfigError::ZeroThreads);
    }

    #[test]
    fn never_exceeds_worker_bound() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let calls = AtomicUsize::new(0);

        let doer = |item: usize, slot: &WorkerSlot| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(now <= 3, "{now} handlers running at once");
            peak.fetch_max(now, Ordering::SeqCst);
            calls.fetch_add(1, Ordering::SeqCst);
            slot.set(format!("item {item} working"));
            thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
            format!("item {item}")
        };

        let coordinator = pool(3);
        let mut out = Vec::new();
        let summary = coordinator.run(&doer, 0..100usize, &mut out).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 100);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(
            summary,
            RunSummary {
                submitted: 100,
                printed: 100
            }
        );

        let got: BTreeSet<String> = lines(&out).into_iter().collect();
        let want: BTreeSet<String> = (0..100).map(|i| format!("item {i}")).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn results_follow_completion_order() {
        // Item 0 is slow, item 1 fast: with two workers item 1 prints first.
        let doer = |item: u64, _slot: &WorkerSlot| {
            thread::sleep(Duration::from_millis(if item == 0 { 150 } else { 1 }));
            item.to_string()
        };
        let mut out = Vec::new();
        pool(2).run(&doer, vec![0u64, 1], &mut out)
            .unwrap();
        assert_eq!(lines(&out), vec!["1", "0"]);
    }

    #[test]
    fn starts_before_input_is_exhausted() {
        let (item_tx, item_rx) = mpsc::channel::<&'static str>();
        let (ack_tx, ack_rx) = mpsc::channel::<()>();

        let producer = thread::spawn(move || {
            item_tx.send("first").unwrap();
            let acked = ack_rx.recv_timeout(Duration::from_secs(5)).is_ok();
            item_tx.send("second").unwrap();
            acked
        });

        let doer = |item: &'static str, _slot: &WorkerSlot| {
            if item == "first" {
                let _ = ack_tx.send(());
            }
            item.to_string()
        };

        let mut out = Vec::new();
        let summary = pool(1).run(&doer, item_rx.iter(), &mut out)
            .unwrap();

        assert!(producer.join().unwrap(), "first item waited for full input");
        assert_eq!(summary.submitted, 2);
        assert_eq!(lines(&out), vec!["first", "second"]);
    }

    #[test]
    fn empty_results_are_not_printed() {
        let doer = |item: u8, _slot: &WorkerSlot| {
            if item % 2 == 0 {
                String::new()
            } else {
                format!("odd {item}")
            }
        };
        let mut out = Vec::new();
        let summary = pool(2).run(&doer, 0..4u8, &mut out)
            .unwrap();
        assert_eq!(summary.printed, 4);
        let got: BTreeSet<String> = lines(&out).into_iter().collect();
        let want: BTreeSet<String> = ["odd 1", "odd 3"].into_iter().map(String::from).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn live_mode_drains_everything() {
        let doer = |item: u32, slot: &WorkerSlot| {
            for pct in [25, 50, 75] {
                slot.set(format!("item {item} {pct}%"));
                thread::sleep(Duration::from_millis(3));
            }
            format!("done {item}")
        };
        let mut out = Vec::new();
        let summary = pool(4)
            .progress(ProgressMode::Live)
            .tick(Duration::from_millis(5))
            .run(&doer, 0..20u32, &mut out)
            .unwrap();

        assert_eq!(summary.printed, 20);
        assert_eq!(lines(&out).len(), 20);
    }

    #[test]
    fn progress_mode_choice() {
        let cases = [
            (true, false, ProgressMode::Live),
            (true, true, ProgressMode::Silent),
            (false, false, ProgressMode::Silent),
            (false, true, ProgressMode::Silent),
        ];
        for (interactive, silent, want) in cases {
            assert_eq!(
                ProgressMode::choose(interactive, silent),
                want,
                "interactive={interactive} silent={silent}"
            );
        }
    }

    #[test]
    fn worker_slot_set_and_clear() {
        let slot = WorkerSlot::default();
        assert_eq!(slot.snapshot(), "");
        slot.set("upload 42.0%");
        assert_eq!(slot.snapshot(), "upload 42.0%");
        slot.clear();
        assert_eq!(slot.snapshot(), "");
    }
}
