use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::Result;

const BATCH_SIZE: usize = 20;
const INTER_BATCH_DELAY_MS: u64 = 200;
const MAX_RETRIES: u32 = 10;
const RETRY_INTERVAL_MS: u64 = 60_000;

fn default_batch_size() -> usize {
    BATCH_SIZE
}

fn default_inter_batch_delay_ms() -> u64 {
    INTER_BATCH_DELAY_MS
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_retry_interval_ms() -> u64 {
    RETRY_INTERVAL_MS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchOptions {
    /// Itens simultâneos por onda.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pausa antes de cada onda, inclusive a primeira.
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            batch_size: BATCH_SIZE,
            inter_batch_delay_ms: INTER_BATCH_DELAY_MS,
            max_retries: MAX_RETRIES,
            retry_interval_ms: RETRY_INTERVAL_MS,
        }
    }
}

impl BatchOptions {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            interval: Duration::from_millis(self.retry_interval_ms),
        }
    }
}

/// Constant-interval retry. Pure: it only answers how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// `retry` is 1 for the first retry. `None` means give up.
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if retry <= self.max_retries {
            Some(self.interval)
        } else {
            None
        }
    }
}

/// Result of a single remote call, already classified at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResult<T> {
    Ok(T),
    RateLimited,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<P> {
    pub id: u64,
    pub payload: P,
}

impl<P> WorkItem<P> {
    pub fn new(id: u64, payload: P) -> Self {
        WorkItem { id, payload }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome<T> {
    Succeeded { result: T },
    /// Remote error other than rate limiting. Not retried.
    Failed { error: String },
    /// The request could not be built (e.g. missing start date). Never sent.
    Rejected { error: String },
    /// Still rate limited after every retry.
    Exhausted { retries: u32 },
}

impl<T> ItemOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ItemReport<T> {
    pub id: u64,
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: ItemOutcome<T>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchReport<T> {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<ItemReport<T>>,
}

impl<T> BatchReport<T> {
    fn from_items(batches: usize, items: Vec<ItemReport<T>>) -> Self {
        let succeeded = items.iter().filter(|i| i.outcome.is_success()).count();
        BatchReport {
            batches,
            succeeded,
            failed: items.len() - succeeded,
            items,
        }
    }

    pub fn results(&self) -> impl Iterator<Item = (u64, &T)> {
        self.items.iter().filter_map(|i| match &i.outcome {
            ItemOutcome::Succeeded { result } => Some((i.id, result)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    WaveStarted {
        wave: usize,
        waves: usize,
        size: usize,
        done: usize,
    },
    Attempt {
        id: u64,
        attempt: u32,
    },
    RateLimited {
        id: u64,
        attempt: u32,
        retry_in: Duration,
    },
    Succeeded {
        id: u64,
        attempts: u32,
    },
    Failed {
        id: u64,
        error: String,
    },
    Exhausted {
        id: u64,
        attempts: u32,
    },
    Finished {
        succeeded: usize,
        failed: usize,
    },
}

pub trait Reporter {
    fn report(&self, event: BatchEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: BatchEvent) {
        match event {
            BatchEvent::WaveStarted {
                wave,
                waves,
                size,
                done,
            } => info!(wave, waves, size, done, "starting batch"),
            BatchEvent::Attempt { id, attempt } => debug!(task_id = id, attempt, "sending"),
            BatchEvent::RateLimited {
                id,
                attempt,
                retry_in,
            } => warn!(
                task_id = id,
                attempt,
                retry_in_ms = retry_in.as_millis() as u64,
                "rate limited, retrying"
            ),
            BatchEvent::Succeeded { id, attempts } => debug!(task_id = id, attempts, "done"),
            BatchEvent::Failed { id, error } => error!(task_id = id, %error, "task failed"),
            BatchEvent::Exhausted { id, attempts } => {
                error!(task_id = id, attempts, "still rate limited, giving up")
            }
            BatchEvent::Finished { succeeded, failed } => {
                info!(succeeded, failed, "batch run finished")
            }
        }
    }
}

/// Runs remote mutations in fixed-size waves.
///
/// Waves run one after the other with a pause before each one; the items of a
/// wave run concurrently on the current task and are all joined before the
/// next wave starts. A failing item never aborts the run.
pub struct BatchedMutator<R = TracingReporter> {
    options: BatchOptions,
    reporter: R,
}

impl BatchedMutator<TracingReporter> {
    pub fn new(options: BatchOptions) -> Self {
        Self::with_reporter(options, TracingReporter)
    }
}

impl<R: Reporter> BatchedMutator<R> {
    pub fn with_reporter(options: BatchOptions, reporter: R) -> Self {
        BatchedMutator { options, reporter }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// `prepare` builds the request for an item exactly once; every attempt
    /// (including retries) gets a clone of that same request. `send` must
    /// classify its own errors; a panic inside it is not contained here.
    pub async fn run<P, Q, T, Prep, S, Fut>(
        &self,
        items: Vec<WorkItem<P>>,
        prepare: Prep,
        send: S,
    ) -> BatchReport<T>
    where
        Prep: Fn(&WorkItem<P>) -> Result<Q>,
        S: Fn(u64, Q) -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
        Q: Clone,
    {
        let size = self.options.batch_size.max(1);
        let waves = items.len().div_ceil(size);
        let mut reports: Vec<ItemReport<T>> = Vec::with_capacity(items.len());

        for (i, wave) in items.chunks(size).enumerate() {
            self.reporter.report(BatchEvent::WaveStarted {
                wave: i + 1,
                waves,
                size: wave.len(),
                done: reports.len(),
            });

            tokio::time::sleep(self.options.inter_batch_delay()).await;

            let settled = join_all(wave.iter().map(|item| self.settle(item, &prepare, &send))).await;
            reports.extend(settled);
        }

        let report = BatchReport::from_items(waves, reports);
        self.reporter.report(BatchEvent::Finished {
            succeeded: report.succeeded,
            failed: report.failed,
        });

        report
    }

    async fn settle<P, Q, T, Prep, S, Fut>(
        &self,
        item: &WorkItem<P>,
        prepare: &Prep,
        send: &S,
    ) -> ItemReport<T>
    where
        Prep: Fn(&WorkItem<P>) -> Result<Q>,
        S: Fn(u64, Q) -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
        Q: Clone,
    {
        let id = item.id;

        let request = match prepare(item) {
            Ok(q) => q,
            Err(e) => {
                let error = e.to_string();
                self.reporter.report(BatchEvent::Failed {
                    id,
                    error: error.clone(),
                });
                return ItemReport {
                    id,
                    attempts: 0,
                    outcome: ItemOutcome::Rejected { error },
                };
            }
        };

        let policy = self.options.retry_policy();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.reporter.report(BatchEvent::Attempt { id, attempt });

            match send(id, request.clone()).await {
                RemoteResult::Ok(result) => {
                    self.reporter.report(BatchEvent::Succeeded {
                        id,
                        attempts: attempt,
                    });
                    return ItemReport {
                        id,
                        attempts: attempt,
                        outcome: ItemOutcome::Succeeded { result },
                    };
                }
                RemoteResult::Failed(error) => {
                    self.reporter.report(BatchEvent::Failed {
                        id,
                        error: error.clone(),
                    });
                    return ItemReport {
                        id,
                        attempts: attempt,
                        outcome: ItemOutcome::Failed { error },
                    };
                }
                RemoteResult::RateLimited => match policy.delay(attempt) {
                    Some(delay) => {
                        self.reporter.report(BatchEvent::RateLimited {
                            id,
                            attempt,
                            retry_in: delay,
                        });
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        self.reporter.report(BatchEvent::Exhausted {
                            id,
                            attempts: attempt,
                        });
                        return ItemReport {
                            id,
                            attempts: attempt,
                            outcome: ItemOutcome::Exhausted {
                                retries: attempt - 1,
                            },
                        };
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunrunError;

    use std::cell::Cell;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<BatchEvent>>,
    }

    impl Reporter for Recorder {
        fn report(&self, event: BatchEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<BatchEvent> {
            self.events.lock().unwrap().clone()
        }

        fn wave_sizes(&self) -> Vec<usize> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    BatchEvent::WaveStarted { size, .. } => Some(size),
                    _ => None,
                })
                .collect()
        }
    }

    fn items(ids: std::ops::RangeInclusive<u64>) -> Vec<WorkItem<()>> {
        ids.map(|id| WorkItem::new(id, ())).collect()
    }

    fn options(batch_size: usize, max_retries: u32) -> BatchOptions {
        BatchOptions {
            batch_size,
            inter_batch_delay_ms: 200,
            max_retries,
            retry_interval_ms: 60_000,
        }
    }

    fn no_prepare<P>(_: &WorkItem<P>) -> Result<()> {
        Ok(())
    }

    #[test]
    fn defaults_match_service_limits() {
        let o = BatchOptions::default();
        assert_eq!(o.batch_size, 20);
        assert_eq!(o.inter_batch_delay(), Duration::from_millis(200));
        assert_eq!(o.max_retries, 10);
        assert_eq!(o.retry_interval_ms, 60_000);

        let partial: BatchOptions = serde_json::from_str(r#"{"batch_size": 5}"#).unwrap();
        assert_eq!(partial.batch_size, 5);
        assert_eq!(partial.max_retries, 10);
    }

    #[test]
    fn retry_policy_is_constant_until_exhausted() {
        let p = RetryPolicy {
            max_retries: 3,
            interval: Duration::from_secs(60),
        };
        assert_eq!(p.delay(1), Some(Duration::from_secs(60)));
        assert_eq!(p.delay(3), Some(Duration::from_secs(60)));
        assert_eq!(p.delay(4), None);

        let none = RetryPolicy {
            max_retries: 0,
            interval: Duration::from_secs(1),
        };
        assert_eq!(none.delay(1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn partitions_into_ceil_n_over_size_waves() {
        let mutator = BatchedMutator::with_reporter(options(20, 0), Recorder::default());

        let report = mutator
            .run(items(1..=45), no_prepare, |id, _| async move {
                RemoteResult::Ok(id)
            })
            .await;

        assert_eq!(report.batches, 3);
        assert_eq!(mutator.reporter().wave_sizes(), vec![20, 20, 5]);
        assert_eq!(report.succeeded, 45);
        let ids: Vec<u64> = report.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, (1..=45).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_runs_no_waves() {
        let mutator = BatchedMutator::with_reporter(options(20, 0), Recorder::default());
        let report = mutator
            .run(Vec::<WorkItem<()>>::new(), no_prepare, |id, _| async move {
                RemoteResult::Ok(id)
            })
            .await;

        assert_eq!(report.batches, 0);
        assert!(report.items.is_empty());
        assert!(mutator.reporter().wave_sizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_before_every_wave() {
        let mutator = BatchedMutator::with_reporter(options(10, 0), Recorder::default());
        let start = Instant::now();

        mutator
            .run(items(1..=30), no_prepare, |id, _| async move {
                RemoteResult::Ok(id)
            })
            .await;

        assert!(start.elapsed() >= Duration::from_millis(3 * 200));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limited_item_at_constant_interval() {
        let mutator = BatchedMutator::with_reporter(options(20, 10), Recorder::default());
        let calls: Mutex<Vec<Instant>> = Mutex::new(Vec::new());
        let k = 3;

        let report = mutator
            .run(items(1..=1), no_prepare, |id, _| {
                let calls = &calls;
                async move {
                    let mut c = calls.lock().unwrap();
                    c.push(Instant::now());
                    if c.len() <= k {
                        RemoteResult::RateLimited
                    } else {
                        RemoteResult::Ok(id)
                    }
                }
            })
            .await;

        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), k + 1);
        for pair in calls.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(60));
            assert!(gap < Duration::from_secs(61));
        }

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.items[0].attempts, 4);

        let retries = mutator
            .reporter()
            .events()
            .into_iter()
            .filter(|e| matches!(e, BatchEvent::RateLimited { .. }))
            .count();
        assert_eq!(retries, k);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries_and_still_resolves() {
        let mutator = BatchedMutator::with_reporter(options(20, 4), Recorder::default());
        let calls = Cell::new(0u32);

        let report = mutator
            .run(items(1..=2), no_prepare, |id, _| {
                let calls = &calls;
                async move {
                    calls.set(calls.get() + 1);
                    if id == 1 {
                        RemoteResult::<u64>::RateLimited
                    } else {
                        RemoteResult::Ok(id)
                    }
                }
            })
            .await;

        assert_eq!(calls.get(), 5 + 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.items[0].attempts, 5);
        assert_eq!(report.items[0].outcome, ItemOutcome::Exhausted { retries: 4 });
        assert!(mutator
            .reporter()
            .events()
            .contains(&BatchEvent::Exhausted { id: 1, attempts: 5 }));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_of_one_item_does_not_affect_its_sibling() {
        let mutator = BatchedMutator::with_reporter(options(20, 10), Recorder::default());

        let report = mutator
            .run(items(1..=2), no_prepare, |id, _| async move {
                if id == 1 {
                    RemoteResult::Failed("HTTP 422: invalid stage".to_string())
                } else {
                    RemoteResult::Ok(format!("task {id}"))
                }
            })
            .await;

        assert_eq!(
            report.items[0].outcome,
            ItemOutcome::Failed {
                error: "HTTP 422: invalid stage".to_string()
            }
        );
        assert_eq!(report.items[0].attempts, 1);
        let ok: Vec<(u64, &String)> = report.results().collect();
        assert_eq!(ok, vec![(2, &"task 2".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_wave_starts_after_first_settles() {
        let mutator = BatchedMutator::with_reporter(options(20, 0), Recorder::default());
        let log: Mutex<Vec<(u64, bool)>> = Mutex::new(Vec::new());

        mutator
            .run(items(1..=25), no_prepare, |id, _| {
                let log = &log;
                async move {
                    log.lock().unwrap().push((id, true));
                    // ids maiores terminam antes: a ordem de conclusão não segue a entrada
                    tokio::time::sleep(Duration::from_millis(100 - id)).await;
                    log.lock().unwrap().push((id, false));
                    RemoteResult::Ok(id)
                }
            })
            .await;

        let log = log.into_inner().unwrap();
        assert_eq!(mutator.reporter().wave_sizes(), vec![20, 5]);

        let pos = |id: u64, start: bool| log.iter().position(|e| *e == (id, start)).unwrap();

        let last_end_first_wave = (1..=20).map(|id| pos(id, false)).max().unwrap();
        let first_start_second_wave = (21..=25).map(|id| pos(id, true)).min().unwrap();
        assert!(last_end_first_wave < first_start_second_wave);

        // dentro da onda tudo começa antes de qualquer término
        let last_start_first_wave = (1..=20).map(|id| pos(id, true)).max().unwrap();
        let first_end_first_wave = (1..=20).map(|id| pos(id, false)).min().unwrap();
        assert!(last_start_first_wave < first_end_first_wave);
    }

    #[tokio::test(start_paused = true)]
    async fn request_is_prepared_once_and_reused_on_retry() {
        let mutator = BatchedMutator::with_reporter(options(20, 5), Recorder::default());
        let prepared: Mutex<HashMap<u64, u32>> = Mutex::new(HashMap::new());
        let seen: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let report = mutator
            .run(
                vec![WorkItem::new(1, "a"), WorkItem::new(2, "b")],
                |item| {
                    let mut p = prepared.lock().unwrap();
                    let n = p.entry(item.id).or_insert(0);
                    *n += 1;
                    if item.payload == "b" {
                        return Err(RunrunError::MissingStartDate { id: item.id });
                    }
                    Ok(format!("{}-{}", item.payload, n))
                },
                |_, body: String| {
                    let seen = &seen;
                    async move {
                        let mut s = seen.lock().unwrap();
                        s.push(body.clone());
                        if s.len() < 3 {
                            RemoteResult::RateLimited
                        } else {
                            RemoteResult::Ok(body)
                        }
                    }
                },
            )
            .await;

        assert_eq!(prepared.into_inner().unwrap(), HashMap::from([(1, 1), (2, 1)]));
        assert_eq!(seen.into_inner().unwrap(), vec!["a-1", "a-1", "a-1"]);
        assert_eq!(report.succeeded, 1);
        assert!(matches!(
            report.items[1].outcome,
            ItemOutcome::Rejected { .. }
        ));
        assert_eq!(report.items[1].attempts, 0);
    }

    #[test]
    fn item_report_serializes_flat() {
        let r = ItemReport {
            id: 9,
            attempts: 1,
            outcome: ItemOutcome::Succeeded { result: "ok" },
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v,
            serde_json::json!({ "id": 9, "attempts": 1, "status": "succeeded", "result": "ok" })
        );
    }
}
