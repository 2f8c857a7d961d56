//! Debounced, cancelable render scheduling.
//!
//! One task owns the whole policy: it coalesces bursts of source edits into
//! a single fetch, consults the cache before touching the network, and
//! resolves races between overlapping fetches with a generation counter.
//! Every accepted edit bumps the generation; each fetch is stamped with the
//! generation current when it starts, and a completion may update the
//! visible preview only while its stamp is still current. Superseded fetches
//! are not aborted at the transport level; their results are discarded for
//! display but still written to the cache, which is idempotent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::cache::RenderCache;
use crate::domain::{DiagramSource, ImageFormat};

use super::client::{DiagramRenderer, RenderOutcome};
use super::codec::CodecError;

const TARGET: &str = "application::render::scheduler";

/// Preview state published to the UI.
///
/// `image` is last-known-good: a failure never clears it, only a blank
/// source or a newer displayable result replaces it.
#[derive(Debug, Clone, Default)]
pub struct PreviewSnapshot {
    pub image: Option<String>,
    pub error: Option<String>,
    pub rendering: bool,
    pub generation: u64,
}

/// Handle to the scheduling task.
///
/// Dropping the handle aborts the task; in-flight fetches are dropped with
/// it.
pub struct RenderScheduler {
    events_tx: mpsc::UnboundedSender<String>,
    preview_rx: watch::Receiver<PreviewSnapshot>,
    task: JoinHandle<()>,
}

impl RenderScheduler {
    pub fn spawn<R: DiagramRenderer>(
        renderer: Arc<R>,
        cache: Arc<RenderCache>,
        base_rx: watch::Receiver<String>,
        debounce: Duration,
        format: ImageFormat,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (preview_tx, preview_rx) = watch::channel(PreviewSnapshot::default());

        let task = tokio::spawn(
            SchedulerTask {
                renderer,
                cache,
                base_rx,
                debounce,
                format,
                events_rx,
                preview_tx,
                generation: 0,
                pending: None,
                deadline: None,
                in_flight: JoinSet::new(),
            }
            .run(),
        );

        Self {
            events_tx,
            preview_rx,
            task,
        }
    }

    /// Feed a source edit into the pipeline.
    pub fn source_changed(&self, text: impl Into<String>) {
        let _ = self.events_tx.send(text.into());
    }

    /// Subscribe to preview updates.
    pub fn preview(&self) -> watch::Receiver<PreviewSnapshot> {
        self.preview_rx.clone()
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct FetchSettled {
    generation: u64,
    source: DiagramSource,
    outcome: Result<RenderOutcome, CodecError>,
}

struct SchedulerTask<R> {
    renderer: Arc<R>,
    cache: Arc<RenderCache>,
    base_rx: watch::Receiver<String>,
    debounce: Duration,
    format: ImageFormat,
    events_rx: mpsc::UnboundedReceiver<String>,
    preview_tx: watch::Sender<PreviewSnapshot>,
    generation: u64,
    pending: Option<DiagramSource>,
    deadline: Option<Instant>,
    in_flight: JoinSet<FetchSettled>,
}

impl<R: DiagramRenderer> SchedulerTask<R> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(text) => self.on_source_changed(text),
                    None => break,
                },
                _ = sleep_until(self.deadline.unwrap_or_else(Instant::now)),
                    if self.deadline.is_some() =>
                {
                    self.on_debounce_elapsed();
                }
                Some(settled) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.on_fetch_settled(settled);
                }
            }
        }
    }

    fn on_source_changed(&mut self, text: String) {
        let source = DiagramSource::from(text);
        // Supersedes both the pending debounce and any in-flight fetch.
        self.generation += 1;
        let generation = self.generation;

        if source.is_blank() {
            self.pending = None;
            self.deadline = None;
            self.preview_tx.send_modify(|snapshot| {
                snapshot.image = None;
                snapshot.error = None;
                snapshot.rendering = false;
                snapshot.generation = generation;
            });
            debug!(
                target = TARGET,
                op = "scheduler::source_changed",
                result = "cleared",
                generation,
                "Blank source, preview cleared"
            );
            return;
        }

        self.pending = Some(source);
        self.deadline = Some(Instant::now() + self.debounce);
    }

    fn on_debounce_elapsed(&mut self) {
        self.deadline = None;
        let Some(source) = self.pending.take() else {
            return;
        };
        let generation = self.generation;

        if let Some(entry) = self.cache.lookup(source.as_str()) {
            self.preview_tx.send_modify(|snapshot| {
                snapshot.image = Some(entry.image);
                snapshot.error = None;
                snapshot.rendering = false;
                snapshot.generation = generation;
            });
            debug!(
                target = TARGET,
                op = "scheduler::debounce",
                result = "cache_hit",
                generation,
                "Preview served from cache"
            );
            return;
        }

        self.preview_tx.send_modify(|snapshot| {
            snapshot.rendering = true;
            snapshot.generation = generation;
        });

        let renderer = Arc::clone(&self.renderer);
        let base = self.base_rx.borrow().clone();
        let format = self.format;
        self.in_flight.spawn(async move {
            let outcome = renderer.render(source.clone(), base, format).await;
            FetchSettled {
                generation,
                source,
                outcome,
            }
        });
    }

    fn on_fetch_settled(&mut self, settled: Result<FetchSettled, JoinError>) {
        let settled = match settled {
            Ok(settled) => settled,
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "scheduler::fetch",
                    result = "panic",
                    error = %err,
                    "Render task aborted"
                );
                return;
            }
        };

        // The text-to-image mapping stays valid even when the fetch was
        // superseded, so the cache write happens unconditionally.
        if let Ok(outcome) = &settled.outcome
            && outcome.is_cacheable()
            && let Some(image) = outcome.image()
        {
            self.cache.store(settled.source.as_str(), image);
        }

        if settled.generation != self.generation {
            debug!(
                target = TARGET,
                op = "scheduler::fetch",
                result = "superseded",
                stamped = settled.generation,
                current = self.generation,
                "Discarding stale render result"
            );
            return;
        }

        let generation = self.generation;
        match settled.outcome {
            Ok(
                RenderOutcome::Rendered { image }
                | RenderOutcome::ErrorDiagram { image }
                | RenderOutcome::CachedFallback { image, .. },
            ) => {
                self.preview_tx.send_modify(|snapshot| {
                    snapshot.image = Some(image);
                    snapshot.error = None;
                    snapshot.rendering = false;
                    snapshot.generation = generation;
                });
            }
            Ok(RenderOutcome::Failed { reason }) => {
                // Keep the last displayed image; a failure never blanks a
                // previously good preview.
                self.preview_tx.send_modify(|snapshot| {
                    snapshot.error = Some(reason.to_string());
                    snapshot.rendering = false;
                    snapshot.generation = generation;
                });
            }
            Err(err) => {
                self.preview_tx.send_modify(|snapshot| {
                    snapshot.error = Some(err.to_string());
                    snapshot.rendering = false;
                    snapshot.generation = generation;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::super::client::RenderFailure;
    use super::*;

    #[derive(Clone, Copy)]
    enum Script {
        Render { delay_ms: u64 },
        Fail,
    }

    struct FakeRenderer {
        scripts: HashMap<String, Script>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRenderer {
        fn new(scripts: impl IntoIterator<Item = (&'static str, Script)>) -> Arc<Self> {
            Arc::new(Self {
                scripts: scripts
                    .into_iter()
                    .map(|(source, script)| (source.to_string(), script))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DiagramRenderer for FakeRenderer {
        async fn render(
            &self,
            source: DiagramSource,
            _base: String,
            _format: ImageFormat,
        ) -> Result<RenderOutcome, CodecError> {
            self.calls.lock().unwrap().push(source.as_str().to_string());
            let script = self
                .scripts
                .get(source.as_str())
                .copied()
                .unwrap_or(Script::Render { delay_ms: 0 });
            match script {
                Script::Render { delay_ms } => {
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    Ok(RenderOutcome::Rendered {
                        image: format!("<svg>{}</svg>", source.as_str()),
                    })
                }
                Script::Fail => Ok(RenderOutcome::Failed {
                    reason: RenderFailure::Timeout,
                }),
            }
        }
    }

    fn spawn_scheduler(
        renderer: Arc<FakeRenderer>,
        cache: Arc<RenderCache>,
        debounce_ms: u64,
    ) -> (RenderScheduler, watch::Sender<String>) {
        let (base_tx, base_rx) = watch::channel("http://localhost:18123".to_string());
        let scheduler = RenderScheduler::spawn(
            renderer,
            cache,
            base_rx,
            Duration::from_millis(debounce_ms),
            ImageFormat::Svg,
        );
        (scheduler, base_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_coalesce_into_one_fetch_for_the_last_text() {
        let renderer = FakeRenderer::new([]);
        let cache = Arc::new(RenderCache::in_memory(10));
        let (scheduler, _base) = spawn_scheduler(Arc::clone(&renderer), cache, 100);

        scheduler.source_changed("t1");
        scheduler.source_changed("t2");
        scheduler.source_changed("t3");

        let mut preview = scheduler.preview();
        let snapshot = preview
            .wait_for(|snapshot| snapshot.image.is_some())
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.image.as_deref(), Some("<svg>t3</svg>"));
        assert_eq!(renderer.calls(), vec!["t3".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_within_window_restarts_the_debounce() {
        let renderer = FakeRenderer::new([]);
        let cache = Arc::new(RenderCache::in_memory(10));
        let (scheduler, _base) = spawn_scheduler(Arc::clone(&renderer), cache, 100);

        scheduler.source_changed("t1");
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.source_changed("t2");

        let mut preview = scheduler.preview();
        let snapshot = preview
            .wait_for(|snapshot| snapshot.image.is_some())
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.image.as_deref(), Some("<svg>t2</svg>"));
        assert_eq!(renderer.calls(), vec!["t2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fetch_never_overwrites_a_newer_result() {
        let renderer = FakeRenderer::new([
            ("t1", Script::Render { delay_ms: 500 }),
            ("t2", Script::Render { delay_ms: 10 }),
        ]);
        let cache = Arc::new(RenderCache::in_memory(10));
        let (scheduler, _base) = spawn_scheduler(Arc::clone(&renderer), Arc::clone(&cache), 50);

        scheduler.source_changed("t1");
        // Let t1's fetch start, then supersede it while it is in flight.
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.source_changed("t2");

        let mut preview = scheduler.preview();
        let snapshot = preview
            .wait_for(|snapshot| snapshot.image.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.image.as_deref(), Some("<svg>t2</svg>"));

        // Even after t1's fetch resolves, the preview keeps t2.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let snapshot = scheduler.preview().borrow().clone();
        assert_eq!(snapshot.image.as_deref(), Some("<svg>t2</svg>"));

        // The superseded result was still written to the cache.
        assert_eq!(cache.lookup("t1").unwrap().image, "<svg>t1</svg>");
        assert_eq!(renderer.calls(), vec!["t1".to_string(), "t2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_source_clears_preview_without_a_fetch() {
        let renderer = FakeRenderer::new([]);
        let cache = Arc::new(RenderCache::in_memory(10));
        let (scheduler, _base) = spawn_scheduler(Arc::clone(&renderer), cache, 50);

        scheduler.source_changed("t1");
        let mut preview = scheduler.preview();
        preview
            .wait_for(|snapshot| snapshot.image.is_some())
            .await
            .unwrap();

        scheduler.source_changed("   \n");
        let snapshot = preview
            .wait_for(|snapshot| snapshot.image.is_none())
            .await
            .unwrap()
            .clone();

        assert!(snapshot.error.is_none());
        assert_eq!(renderer.calls(), vec!["t1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_skips_the_network() {
        let renderer = FakeRenderer::new([]);
        let cache = Arc::new(RenderCache::in_memory(10));
        cache.store("t1", "<svg>cached</svg>");
        let (scheduler, _base) = spawn_scheduler(Arc::clone(&renderer), cache, 50);

        scheduler.source_changed("t1");
        let mut preview = scheduler.preview();
        let snapshot = preview
            .wait_for(|snapshot| snapshot.image.is_some())
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.image.as_deref(), Some("<svg>cached</svg>"));
        assert!(renderer.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_the_last_good_image() {
        let renderer = FakeRenderer::new([("t2", Script::Fail)]);
        let cache = Arc::new(RenderCache::in_memory(10));
        let (scheduler, _base) = spawn_scheduler(Arc::clone(&renderer), cache, 50);

        scheduler.source_changed("t1");
        let mut preview = scheduler.preview();
        preview
            .wait_for(|snapshot| snapshot.image.is_some())
            .await
            .unwrap();

        scheduler.source_changed("t2");
        let snapshot = preview
            .wait_for(|snapshot| snapshot.error.is_some())
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.image.as_deref(), Some("<svg>t1</svg>"));
        assert!(snapshot.error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn new_success_clears_a_previous_error() {
        let renderer = FakeRenderer::new([("bad", Script::Fail)]);
        let cache = Arc::new(RenderCache::in_memory(10));
        let (scheduler, _base) = spawn_scheduler(Arc::clone(&renderer), cache, 50);

        scheduler.source_changed("bad");
        let mut preview = scheduler.preview();
        preview
            .wait_for(|snapshot| snapshot.error.is_some())
            .await
            .unwrap();

        scheduler.source_changed("good");
        let snapshot = preview
            .wait_for(|snapshot| snapshot.image.is_some())
            .await
            .unwrap()
            .clone();

        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.image.as_deref(), Some("<svg>good</svg>"));
    }
}
