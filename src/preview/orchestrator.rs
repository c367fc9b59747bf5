use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::cache::{CacheEntry, Fingerprint, PreviewCache};
use super::client::GenerationClient;
use super::debounce::DebouncedRequest;
use super::error::PreviewError;
use super::orientation::{auto_correct, validate, AspectRatio, Orientation, ValidationPolicy};
use super::types::{GenerationRequest, SourceImage, StyleDescriptor};
use super::watermark::Watermarker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    pub debounce: Duration,
    pub validation: ValidationPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            debounce: Duration::from_millis(200),
            validation: ValidationPolicy::Lenient,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewState {
    pub is_generating: bool,
    pub has_result: bool,
    pub result_url: Option<String>,
    pub error: Option<PreviewError>,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    Ready { preview_url: String, from_cache: bool },
    Failed(PreviewError),
    /// Reserved style or no photo yet; nothing to do.
    Skipped,
    /// A newer request for the same card replaced this one.
    Superseded,
    /// Automatic attempts are used up; the user has to skip first.
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAffordance {
    Retry,
    Skip,
}

#[derive(Default)]
struct OrchestratorInner {
    view: PreviewState,
    epoch: u64,
}

/// Per-style controller for cache lookup, validation, generation and watermarking.
pub struct PreviewOrchestrator {
    style: StyleDescriptor,
    cache: Arc<PreviewCache>,
    config: OrchestratorConfig,
    inner: Mutex<OrchestratorInner>,
    invoker: DebouncedRequest<GenerationRequest, String, PreviewError>,
}

impl PreviewOrchestrator {
    pub fn new(
        style: StyleDescriptor,
        cache: Arc<PreviewCache>,
        client: Arc<GenerationClient>,
        watermark: Watermarker,
        config: OrchestratorConfig,
    ) -> Self {
        let invoker = DebouncedRequest::new(config.debounce, move |request: GenerationRequest| {
            let client = Arc::clone(&client);
            let watermark = watermark.clone();
            async move {
                let preview_url = client.resolve(&request).await?;
                Ok(watermark.apply(&preview_url).await)
            }
        });
        Self {
            style,
            cache,
            config,
            inner: Mutex::new(OrchestratorInner::default()),
            invoker,
        }
    }

    pub fn style(&self) -> &StyleDescriptor {
        &self.style
    }

    pub fn state(&self) -> PreviewState {
        self.inner
            .lock()
            .map(|inner| inner.view.clone())
            .unwrap_or_default()
    }

    pub fn affordance(&self) -> Option<ErrorAffordance> {
        let state = self.state();
        let error = state.error?;
        if error.is_retryable() && state.attempt_count < self.config.max_retries {
            Some(ErrorAffordance::Retry)
        } else {
            Some(ErrorAffordance::Skip)
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.state().attempt_count >= self.config.max_retries
    }

    /// Cache-only lookup, used to decide whether a selection needs generation.
    pub fn cached(&self, source: &SourceImage, orientation: Orientation) -> Option<CacheEntry> {
        self.cache.get(&self.fingerprint(source, orientation.aspect_ratio()))
    }

    pub async fn request_preview(&self, source: &SourceImage, orientation: &str) -> PreviewOutcome {
        self.run(source, orientation, true).await
    }

    /// Background warm-up of the cache. Failures are neither recorded nor
    /// counted against the retry budget, and a card showing an error is left alone.
    pub async fn prefetch(&self, source: &SourceImage, orientation: &str) -> PreviewOutcome {
        if self.state().error.is_some() {
            return PreviewOutcome::Skipped;
        }
        self.run(source, orientation, false).await
    }

    async fn run(&self, source: &SourceImage, orientation: &str, counted: bool) -> PreviewOutcome {
        if self.style.is_original() || source.is_empty() {
            return PreviewOutcome::Skipped;
        }

        let candidate = Orientation::parse(orientation).map(Orientation::aspect_ratio);
        if let Some(ratio) = candidate {
            if let Some(outcome) = self.try_cache(source, ratio) {
                return outcome;
            }
        }

        let checked = validate(
            orientation,
            candidate.map(AspectRatio::as_str).unwrap_or_default(),
            self.config.validation,
        );
        let Some(aspect_ratio) = checked.resolved(candidate) else {
            let err = PreviewError::validation(
                checked
                    .error
                    .unwrap_or_else(|| format!("invalid orientation: {:?}", orientation)),
                Some(auto_correct(orientation).aspect_ratio().to_string()),
            );
            warn!(style_id = self.style.id, error = %err, "preview aborted by validation");
            if counted {
                self.update(|view| {
                    view.is_generating = false;
                    view.error = Some(err.clone());
                });
            }
            return PreviewOutcome::Failed(err);
        };
        if candidate != Some(aspect_ratio) {
            if let Some(outcome) = self.try_cache(source, aspect_ratio) {
                return outcome;
            }
        }

        let epoch = {
            let Ok(mut inner) = self.inner.lock() else {
                return PreviewOutcome::Skipped;
            };
            if inner.view.attempt_count >= self.config.max_retries {
                debug!(style_id = self.style.id, "automatic retries exhausted");
                return PreviewOutcome::RetriesExhausted;
            }
            inner.epoch += 1;
            if counted {
                inner.view.is_generating = true;
                inner.view.error = None;
            }
            inner.epoch
        };

        let fingerprint = self.fingerprint(source, aspect_ratio);
        let request = GenerationRequest::new(source.clone(), self.style.clone(), aspect_ratio);
        let request_id = request.request_id.clone();

        match self.invoker.call(request).await {
            Ok(None) => {
                debug!(style_id = self.style.id, %request_id, "preview request superseded");
                PreviewOutcome::Superseded
            }
            Ok(Some(preview_url)) => {
                if !self.finish(epoch, |view| {
                    view.is_generating = false;
                    view.has_result = true;
                    view.result_url = Some(preview_url.clone());
                    view.error = None;
                }) {
                    return PreviewOutcome::Superseded;
                }
                self.cache
                    .put(fingerprint, CacheEntry::new(preview_url.clone()));
                info!(style_id = self.style.id, %request_id, "style preview ready");
                PreviewOutcome::Ready {
                    preview_url,
                    from_cache: false,
                }
            }
            Err(err) => {
                if !self.finish(epoch, |view| {
                    view.is_generating = false;
                    if counted {
                        view.has_result = false;
                        view.result_url = None;
                        view.attempt_count += 1;
                        view.error = Some(err.clone());
                    }
                }) {
                    return PreviewOutcome::Superseded;
                }
                warn!(style_id = self.style.id, %request_id, error = %err, "style preview failed");
                PreviewOutcome::Failed(err)
            }
        }
    }

    /// User-initiated retry; still bounded by `max_retries`.
    pub async fn retry(&self, source: &SourceImage, orientation: &str) -> PreviewOutcome {
        self.request_preview(source, orientation).await
    }

    /// Explicit user action once retries are used up: forget the failure.
    pub fn skip(&self) {
        self.invoker.cancel();
        self.update(|view| {
            view.is_generating = false;
            view.error = None;
            view.attempt_count = 0;
        });
    }

    /// Forget everything tied to the previous photo or orientation.
    pub fn reset(&self) {
        self.invoker.cancel();
        if let Ok(mut inner) = self.inner.lock() {
            inner.epoch += 1;
            inner.view = PreviewState::default();
        }
    }

    fn fingerprint(&self, source: &SourceImage, aspect_ratio: AspectRatio) -> Fingerprint {
        Fingerprint::new(source.id().clone(), self.style.id, aspect_ratio)
    }

    fn try_cache(&self, source: &SourceImage, aspect_ratio: AspectRatio) -> Option<PreviewOutcome> {
        let entry = self.cache.get(&self.fingerprint(source, aspect_ratio))?;
        debug!(style_id = self.style.id, %aspect_ratio, "preview cache hit");
        self.invoker.cancel();
        if let Ok(mut inner) = self.inner.lock() {
            inner.epoch += 1;
            inner.view.is_generating = false;
            inner.view.has_result = true;
            inner.view.result_url = Some(entry.preview_url.clone());
            inner.view.error = None;
        }
        Some(PreviewOutcome::Ready {
            preview_url: entry.preview_url,
            from_cache: true,
        })
    }

    fn update(&self, change: impl FnOnce(&mut PreviewState)) {
        if let Ok(mut inner) = self.inner.lock() {
            change(&mut inner.view);
        }
    }

    /// Applies `change` only if no newer request started since `epoch`.
    fn finish(&self, epoch: u64, change: impl FnOnce(&mut PreviewState)) -> bool {
        match self.inner.lock() {
            Ok(mut inner) if inner.epoch == epoch => {
                change(&mut inner.view);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::client::tests::ScriptedService;
    use crate::preview::client::PollPolicy;
    use crate::preview::types::{GenerationResult, JobStatus};
    use crate::preview::watermark::tests::SuffixWatermark;
    use tokio::time::sleep;

    struct Harness {
        service: Arc<ScriptedService>,
        cache: Arc<PreviewCache>,
    }

    impl Harness {
        fn new(service: ScriptedService) -> Self {
            Self {
                service: Arc::new(service),
                cache: Arc::new(PreviewCache::new()),
            }
        }

        fn orchestrator(&self, style_id: u32, config: OrchestratorConfig) -> PreviewOrchestrator {
            let client = Arc::new(GenerationClient::new(
                self.service.clone(),
                PollPolicy::default(),
            ));
            PreviewOrchestrator::new(
                StyleDescriptor::new(style_id, "Watercolor Dreams", ""),
                Arc::clone(&self.cache),
                client,
                Watermarker::new(Arc::new(SuffixWatermark::default())),
                config,
            )
        }
    }

    fn photo() -> SourceImage {
        SourceImage::new("data:image/jpeg;base64,PHOTO")
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_watermarked_and_cached() {
        let harness = Harness::new(ScriptedService::completing("https://x/4.png"));
        let orchestrator = harness.orchestrator(4, OrchestratorConfig::default());

        let outcome = orchestrator.request_preview(&photo(), "horizontal").await;
        assert_eq!(
            outcome,
            PreviewOutcome::Ready {
                preview_url: "https://x/4.png?wm=1".into(),
                from_cache: false
            }
        );
        let state = orchestrator.state();
        assert!(state.has_result && !state.is_generating);
        assert_eq!(state.attempt_count, 0);
        assert_eq!(
            harness.service.requests.lock().unwrap()[0].aspect_ratio,
            AspectRatio::Landscape
        );

        let again = orchestrator.request_preview(&photo(), "horizontal").await;
        assert_eq!(
            again,
            PreviewOutcome::Ready {
                preview_url: "https://x/4.png?wm=1".into(),
                from_cache: true
            }
        );
        assert_eq!(harness.service.generate_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reserved_style_and_empty_photo_are_no_ops() {
        let harness = Harness::new(ScriptedService::completing("https://x/1.png"));
        let original = harness.orchestrator(1, OrchestratorConfig::default());
        assert_eq!(
            original.request_preview(&photo(), "square").await,
            PreviewOutcome::Skipped
        );
        let styled = harness.orchestrator(2, OrchestratorConfig::default());
        assert_eq!(
            styled.request_preview(&SourceImage::new(""), "square").await,
            PreviewOutcome::Skipped
        );
        assert_eq!(harness.service.generate_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lenient_policy_corrects_free_form_orientation() {
        let harness = Harness::new(ScriptedService::completing("https://x/3.png"));
        let orchestrator = harness.orchestrator(3, OrchestratorConfig::default());

        let outcome = orchestrator.request_preview(&photo(), "Portrait").await;
        assert!(matches!(outcome, PreviewOutcome::Ready { .. }));
        assert_eq!(
            harness.service.requests.lock().unwrap()[0].aspect_ratio,
            AspectRatio::Portrait
        );
    }

    #[tokio::test(start_paused = true)]
    async fn strict_policy_aborts_with_correction_noted() {
        let harness = Harness::new(ScriptedService::completing("https://x/3.png"));
        let orchestrator = harness.orchestrator(
            3,
            OrchestratorConfig {
                validation: ValidationPolicy::Strict,
                ..OrchestratorConfig::default()
            },
        );

        let outcome = orchestrator.request_preview(&photo(), "landscape").await;
        let PreviewOutcome::Failed(PreviewError::Validation {
            attempted_correction,
            ..
        }) = outcome
        else {
            panic!("expected validation failure, got {:?}", outcome);
        };
        assert_eq!(attempted_correction.as_deref(), Some("3:2"));
        assert_eq!(harness.service.generate_count(), 0);
        assert_eq!(orchestrator.state().attempt_count, 0);
        assert_eq!(orchestrator.affordance(), Some(ErrorAffordance::Skip));
    }

    #[tokio::test(start_paused = true)]
    async fn double_click_collapses_into_one_call() {
        let harness = Harness::new(ScriptedService::completing("https://x/5.png"));
        let orchestrator = harness.orchestrator(5, OrchestratorConfig::default());

        let photo = photo();
        let (first, second) = tokio::join!(
            orchestrator.request_preview(&photo, "square"),
            orchestrator.request_preview(&photo, "square")
        );
        assert_eq!(first, PreviewOutcome::Superseded);
        assert!(matches!(second, PreviewOutcome::Ready { from_cache: false, .. }));
        assert_eq!(harness.service.generate_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_result_never_reaches_state() {
        let service = ScriptedService::completing("https://x/late.png")
            .with_latency(Duration::from_millis(2_000));
        let harness = Harness::new(service);
        let orchestrator = harness.orchestrator(6, OrchestratorConfig::default());

        let photo = photo();
        let (first, second) = tokio::join!(
            orchestrator.request_preview(&photo, "square"),
            async {
                sleep(Duration::from_millis(500)).await;
                orchestrator.request_preview(&photo, "vertical").await
            }
        );

        assert_eq!(first, PreviewOutcome::Superseded);
        assert!(matches!(second, PreviewOutcome::Ready { .. }));
        assert_eq!(harness.service.generate_count(), 2);
        let square = Fingerprint::new(photo.id().clone(), 6, AspectRatio::Square);
        assert!(harness.cache.get(&square).is_none());
        let vertical = Fingerprint::new(photo.id().clone(), 6, AspectRatio::Portrait);
        assert!(harness.cache.get(&vertical).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_stop_after_max_retries() {
        let service = ScriptedService::default();
        service.push_generate(Ok(GenerationResult::Failed {
            reason: "model overloaded".into(),
        }));
        let harness = Harness::new(service);
        let orchestrator = harness.orchestrator(2, OrchestratorConfig::default());

        for attempt in 1..=3 {
            let outcome = orchestrator.request_preview(&photo(), "square").await;
            assert_eq!(
                outcome,
                PreviewOutcome::Failed(PreviewError::generation("model overloaded"))
            );
            assert_eq!(orchestrator.state().attempt_count, attempt);
        }
        assert_eq!(orchestrator.affordance(), Some(ErrorAffordance::Skip));
        assert!(orchestrator.retries_exhausted());

        let fourth = orchestrator.retry(&photo(), "square").await;
        assert_eq!(fourth, PreviewOutcome::RetriesExhausted);
        assert_eq!(harness.service.generate_count(), 3);
        assert!(!orchestrator.state().has_result);

        orchestrator.skip();
        assert_eq!(orchestrator.state().attempt_count, 0);
        assert_eq!(orchestrator.affordance(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_affordance_while_attempts_remain() {
        let service = ScriptedService::default();
        service.push_generate(Err("connection refused".into()));
        service.push_generate(Ok(GenerationResult::Complete {
            preview_url: "https://x/ok.png".into(),
        }));
        let harness = Harness::new(service);
        let orchestrator = harness.orchestrator(7, OrchestratorConfig::default());

        let outcome = orchestrator.request_preview(&photo(), "square").await;
        assert!(matches!(outcome, PreviewOutcome::Failed(PreviewError::Network(_))));
        assert_eq!(orchestrator.affordance(), Some(ErrorAffordance::Retry));

        let retried = orchestrator.retry(&photo(), "square").await;
        assert!(matches!(retried, PreviewOutcome::Ready { .. }));
        assert_eq!(orchestrator.state().error, None);
        assert_eq!(orchestrator.affordance(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn async_job_resolves_through_polling() {
        let service = ScriptedService::default();
        service.push_generate(Ok(GenerationResult::Processing {
            job_id: "abc".into(),
        }));
        service.push_status(Ok(JobStatus::Processing));
        service.push_status(Ok(JobStatus::Processing));
        service.push_status(Ok(JobStatus::Succeeded {
            preview_url: "https://x/y.png".into(),
        }));
        let harness = Harness::new(service);
        let orchestrator = harness.orchestrator(4, OrchestratorConfig::default());

        let outcome = orchestrator.request_preview(&photo(), "horizontal").await;
        assert_eq!(
            outcome,
            PreviewOutcome::Ready {
                preview_url: "https://x/y.png?wm=1".into(),
                from_cache: false
            }
        );
        assert!(orchestrator.state().has_result);
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_failures_leave_the_budget_alone() {
        let service = ScriptedService::default();
        service.push_generate(Ok(GenerationResult::Failed {
            reason: "down".into(),
        }));
        let harness = Harness::new(service);
        let orchestrator = harness.orchestrator(7, OrchestratorConfig::default());

        for _ in 0..3 {
            let outcome = orchestrator.prefetch(&photo(), "square").await;
            assert_eq!(outcome, PreviewOutcome::Failed(PreviewError::generation("down")));
        }
        assert_eq!(harness.service.generate_count(), 3);
        assert_eq!(orchestrator.state(), PreviewState::default());

        let clicked = orchestrator.request_preview(&photo(), "square").await;
        assert_eq!(clicked, PreviewOutcome::Failed(PreviewError::generation("down")));
        assert_eq!(orchestrator.state().attempt_count, 1);
        assert_eq!(orchestrator.prefetch(&photo(), "square").await, PreviewOutcome::Skipped);
        assert_eq!(harness.service.generate_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forgets_previous_photo() {
        let harness = Harness::new(ScriptedService::completing("https://x/2.png"));
        let orchestrator = harness.orchestrator(2, OrchestratorConfig::default());
        orchestrator.request_preview(&photo(), "square").await;
        assert!(orchestrator.state().has_result);

        orchestrator.reset();
        assert_eq!(orchestrator.state(), PreviewState::default());
    }
}
