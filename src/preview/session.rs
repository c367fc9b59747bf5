use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use super::cache::PreviewCache;
use super::client::GenerationClient;
use super::error::ServiceError;
use super::interaction::{CardTruth, DispatchOutcome, InteractionMachine, InteractionState, MachineConfig};
use super::orchestrator::{
    ErrorAffordance, OrchestratorConfig, PreviewOrchestrator, PreviewOutcome, PreviewState,
};
use super::orientation::{
    detect_orientation_from_bytes, detect_orientation_from_file, DetectError, Orientation,
};
use super::settings::PreviewSettings;
use super::types::{find_style, SourceImage, StyleDescriptor};
use super::watermark::Watermarker;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown style id: {0}")]
    UnknownStyle(u32),
    #[error("card for style {0} is disabled")]
    Disabled(u32),
    #[error("failed to read image: {0}")]
    Detect(#[from] DetectError),
    #[error("failed to set up preview services: {0}")]
    Service(#[from] ServiceError),
}

/// Render snapshot of one style card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleCardView {
    pub style: StyleDescriptor,
    pub selected: bool,
    pub interaction: InteractionState,
    pub preview: PreviewState,
    pub affordance: Option<ErrorAffordance>,
}

/// Result of loading a new photo from encoded image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUpdate {
    pub orientation: Orientation,
    /// Present when the selected style had to be regenerated.
    pub outcome: Option<PreviewOutcome>,
}

struct StyleCard {
    orchestrator: PreviewOrchestrator,
    machine: InteractionMachine,
}

#[derive(Default)]
struct SessionContext {
    source: Option<SourceImage>,
    orientation: String,
    selected: Option<u32>,
    disabled: BTreeSet<u32>,
}

/// One style picker: a photo, an orientation, and the mounted style cards.
pub struct PreviewSession {
    cache: Arc<PreviewCache>,
    client: Arc<GenerationClient>,
    watermark: Watermarker,
    orchestrator_config: OrchestratorConfig,
    machine_config: MachineConfig,
    prefetch_on_hover: bool,
    cards: Mutex<BTreeMap<u32, Arc<StyleCard>>>,
    context: Arc<Mutex<SessionContext>>,
}

impl PreviewSession {
    pub fn new(
        client: Arc<GenerationClient>,
        watermark: Watermarker,
        settings: &PreviewSettings,
    ) -> Self {
        Self {
            cache: Arc::new(PreviewCache::with_capacity(settings.cache_capacity)),
            client,
            watermark,
            orchestrator_config: OrchestratorConfig {
                max_retries: settings.max_retries,
                debounce: settings.debounce(),
                validation: settings.validation,
            },
            machine_config: settings.machine_config(),
            prefetch_on_hover: settings.prefetch_on_hover,
            cards: Mutex::new(BTreeMap::new()),
            context: Arc::new(Mutex::new(SessionContext {
                orientation: Orientation::default().as_str().to_string(),
                ..SessionContext::default()
            })),
        }
    }

    /// Builds the HTTP-backed services described by `settings`.
    #[cfg(feature = "preview-http")]
    pub fn from_settings(settings: &PreviewSettings) -> Result<Self, SessionError> {
        use super::client::HttpGenerationService;
        use super::watermark::HttpWatermarkService;

        let settings = settings.clone().normalize();
        let service = HttpGenerationService::new(
            settings.service_url.clone(),
            settings.bearer_token.clone(),
            settings.request_timeout(),
        )?;
        let watermark = match settings.watermark_url.as_deref() {
            Some(url) => Watermarker::new(Arc::new(HttpWatermarkService::new(
                url,
                settings.bearer_token.clone(),
                settings.request_timeout(),
            )?)),
            None => Watermarker::disabled(),
        };
        let client = Arc::new(GenerationClient::new(Arc::new(service), settings.poll_policy()));
        info!(settings = ?settings.masked(), "preview session configured");
        Ok(Self::new(client, watermark, &settings))
    }

    pub fn cache(&self) -> &PreviewCache {
        &self.cache
    }

    pub fn source_image(&self) -> Option<SourceImage> {
        self.context.lock().ok().and_then(|ctx| ctx.source.clone())
    }

    pub fn orientation(&self) -> String {
        self.context
            .lock()
            .map(|ctx| ctx.orientation.clone())
            .unwrap_or_default()
    }

    pub fn selected_style(&self) -> Option<u32> {
        self.context.lock().ok().and_then(|ctx| ctx.selected)
    }

    /// Mounts a card for a catalogue style. Mounting twice is a no-op.
    pub fn mount_card(&self, style_id: u32) -> Result<(), SessionError> {
        let style = find_style(style_id).ok_or(SessionError::UnknownStyle(style_id))?;
        let truth = self
            .lock_context()
            .map(|ctx| CardTruth {
                selected: ctx.selected == Some(style_id),
                disabled: ctx.disabled.contains(&style_id),
                ..CardTruth::default()
            })
            .unwrap_or_default();

        let Ok(mut cards) = self.cards.lock() else {
            return Ok(());
        };
        if cards.contains_key(&style_id) {
            return Ok(());
        }
        let orchestrator = PreviewOrchestrator::new(
            style,
            Arc::clone(&self.cache),
            Arc::clone(&self.client),
            self.watermark.clone(),
            self.orchestrator_config,
        );
        let machine = InteractionMachine::mount(style_id, truth, self.machine_config);
        cards.insert(
            style_id,
            Arc::new(StyleCard {
                orchestrator,
                machine,
            }),
        );
        debug!(style_id, "style card mounted");
        Ok(())
    }

    /// Drops a card, cancelling its pending work. Returns whether it was mounted.
    pub fn unmount_card(&self, style_id: u32) -> bool {
        let removed = self
            .cards
            .lock()
            .ok()
            .and_then(|mut cards| cards.remove(&style_id));
        match removed {
            Some(card) => {
                card.orchestrator.reset();
                debug!(style_id, "style card unmounted");
                true
            }
            None => false,
        }
    }

    pub fn mounted_styles(&self) -> Vec<u32> {
        self.cards
            .lock()
            .map(|cards| cards.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Replaces the photo. Previews of the old photo are evicted and, when a
    /// style is selected, its preview is requested again.
    pub async fn set_source_image(&self, uri: impl Into<String>) -> Option<PreviewOutcome> {
        let source = SourceImage::new(uri);
        let previous = {
            let mut ctx = self.lock_context()?;
            if ctx.source.as_ref().map(SourceImage::id) == Some(source.id()) {
                return None;
            }
            ctx.source.replace(source.clone())
        };
        if let Some(previous) = previous {
            let removed = self.cache.invalidate_for_image(previous.id());
            info!(old = %previous.id(), new = %source.id(), removed, "source image replaced");
        }
        self.reset_cards();
        self.refresh_selected().await
    }

    /// Sets the photo together with the orientation read from its encoded bytes.
    pub async fn set_source_bytes(
        &self,
        uri: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<SourceUpdate, SessionError> {
        let orientation = detect_orientation_from_bytes(bytes).await?;
        Ok(self.replace_source(uri.into(), orientation).await)
    }

    /// Like [`PreviewSession::set_source_bytes`] for an image on disk.
    pub async fn set_source_file(
        &self,
        uri: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<SourceUpdate, SessionError> {
        let orientation = detect_orientation_from_file(path).await?;
        Ok(self.replace_source(uri.into(), orientation).await)
    }

    /// Changes the output orientation. Cached previews of the current photo
    /// are dropped and the selected style is regenerated.
    pub async fn set_orientation(&self, orientation: &str) -> Option<PreviewOutcome> {
        if !self.store_orientation(orientation) {
            return None;
        }
        if let Some(source) = self.source_image() {
            self.cache.invalidate_for_image(source.id());
        }
        self.reset_cards();
        self.refresh_selected().await
    }

    pub async fn select_style(&self, style_id: u32) -> Result<PreviewOutcome, SessionError> {
        let card = self.card_or_mount(style_id)?;
        let previous = {
            let Some(mut ctx) = self.lock_context() else {
                return Ok(PreviewOutcome::Skipped);
            };
            if ctx.disabled.contains(&style_id) {
                return Err(SessionError::Disabled(style_id));
            }
            ctx.selected.replace(style_id)
        };
        if let Some(previous) = previous.filter(|id| *id != style_id) {
            self.reconcile_card(previous);
        }
        info!(style_id, "style selected");
        Ok(self.run_preview(&card, false).await)
    }

    pub fn deselect(&self) -> Option<u32> {
        let previous = self.lock_context()?.selected.take()?;
        self.reconcile_card(previous);
        Some(previous)
    }

    pub fn hover_start(&self, style_id: u32) -> Result<(), SessionError> {
        let card = self.card(style_id)?;
        card.machine.hover_start();
        if self.prefetch_on_hover {
            self.prefetch(card);
        }
        Ok(())
    }

    pub fn hover_end(&self, style_id: u32) -> Result<DispatchOutcome, SessionError> {
        Ok(self.card(style_id)?.machine.hover_end())
    }

    /// User asked to try a failed preview again.
    pub async fn retry(&self, style_id: u32) -> Result<PreviewOutcome, SessionError> {
        let card = self.card(style_id)?;
        Ok(self.run_preview(&card, true).await)
    }

    /// User gave up on a failed preview; clears the error and attempt count.
    pub fn skip(&self, style_id: u32) -> Result<(), SessionError> {
        self.card(style_id)?.orchestrator.skip();
        self.reconcile_card(style_id);
        Ok(())
    }

    pub fn set_card_disabled(&self, style_id: u32, disabled: bool) -> Result<(), SessionError> {
        self.card(style_id)?;
        if let Some(mut ctx) = self.lock_context() {
            if disabled {
                ctx.disabled.insert(style_id);
                if ctx.selected == Some(style_id) {
                    ctx.selected = None;
                }
            } else {
                ctx.disabled.remove(&style_id);
            }
        }
        self.reconcile_card(style_id);
        Ok(())
    }

    pub fn reconcile_all(&self) {
        for style_id in self.mounted_styles() {
            self.reconcile_card(style_id);
        }
    }

    pub fn card_view(&self, style_id: u32) -> Option<StyleCardView> {
        let card = self.card(style_id).ok()?;
        let selected = self.selected_style() == Some(style_id);
        Some(StyleCardView {
            style: card.orchestrator.style().clone(),
            selected,
            interaction: card.machine.visual_state(),
            preview: card.orchestrator.state(),
            affordance: card.orchestrator.affordance(),
        })
    }

    pub fn card_views(&self) -> Vec<StyleCardView> {
        self.mounted_styles()
            .into_iter()
            .filter_map(|style_id| self.card_view(style_id))
            .collect()
    }

    async fn run_preview(&self, card: &StyleCard, retry: bool) -> PreviewOutcome {
        let Some(source) = self.source_image() else {
            self.reconcile_card(card.machine.style_id());
            return PreviewOutcome::Skipped;
        };
        let orientation = self.orientation();
        let style_id = card.machine.style_id();

        let will_generate = !card.orchestrator.style().is_original()
            && !card.orchestrator.retries_exhausted()
            && Orientation::parse(&orientation)
                .map_or(true, |parsed| card.orchestrator.cached(&source, parsed).is_none());
        let mut truth = self.truth_for(style_id, &card.orchestrator.state());
        truth.generating |= will_generate;
        truth.error &= !will_generate;
        card.machine.reconcile(truth);

        let outcome = if retry {
            card.orchestrator.retry(&source, &orientation).await
        } else {
            card.orchestrator.request_preview(&source, &orientation).await
        };
        if outcome != PreviewOutcome::Superseded {
            self.reconcile_card(style_id);
        }
        outcome
    }

    /// Same photo with a new orientation (re-crop or rotation) takes the
    /// orientation path; a different photo takes the photo path.
    async fn replace_source(&self, uri: String, orientation: Orientation) -> SourceUpdate {
        let same_photo = self
            .source_image()
            .is_some_and(|current| current.id() == SourceImage::new(uri.as_str()).id());
        let outcome = if same_photo {
            self.set_orientation(orientation.as_str()).await
        } else {
            self.store_orientation(orientation.as_str());
            self.set_source_image(uri).await
        };
        SourceUpdate {
            orientation,
            outcome,
        }
    }

    async fn refresh_selected(&self) -> Option<PreviewOutcome> {
        let style_id = self.selected_style()?;
        let card = self.card(style_id).ok()?;
        Some(self.run_preview(&card, false).await)
    }

    fn prefetch(&self, card: Arc<StyleCard>) {
        let Some(source) = self.source_image() else {
            return;
        };
        let orientation = self.orientation();
        let style_id = card.machine.style_id();
        if card.orchestrator.style().is_original() || self.selected_style() == Some(style_id) {
            return;
        }
        let cached = Orientation::parse(&orientation)
            .and_then(|parsed| card.orchestrator.cached(&source, parsed));
        let state = card.orchestrator.state();
        if cached.is_some() || state.is_generating || state.error.is_some() {
            return;
        }
        debug!(style_id, "prefetching preview on hover");
        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            let outcome = card.orchestrator.prefetch(&source, &orientation).await;
            debug!(style_id, ?outcome, "hover prefetch finished");
            let truth = card_truth(&context, style_id, &card.orchestrator.state());
            card.machine.reconcile(truth);
        });
    }

    fn reset_cards(&self) {
        let cards: Vec<Arc<StyleCard>> = self
            .cards
            .lock()
            .map(|cards| cards.values().cloned().collect())
            .unwrap_or_default();
        for card in cards {
            card.orchestrator.reset();
            self.reconcile_card(card.machine.style_id());
        }
    }

    fn reconcile_card(&self, style_id: u32) {
        let Ok(card) = self.card(style_id) else {
            return;
        };
        let truth = self.truth_for(style_id, &card.orchestrator.state());
        card.machine.reconcile(truth);
    }

    fn truth_for(&self, style_id: u32, state: &PreviewState) -> CardTruth {
        card_truth(&self.context, style_id, state)
    }

    /// Returns whether the stored orientation changed.
    fn store_orientation(&self, orientation: &str) -> bool {
        let Some(mut ctx) = self.lock_context() else {
            return false;
        };
        if ctx.orientation == orientation {
            return false;
        }
        debug!(from = %ctx.orientation, to = orientation, "orientation changed");
        ctx.orientation = orientation.to_string();
        true
    }

    fn card(&self, style_id: u32) -> Result<Arc<StyleCard>, SessionError> {
        self.cards
            .lock()
            .ok()
            .and_then(|cards| cards.get(&style_id).cloned())
            .ok_or(SessionError::UnknownStyle(style_id))
    }

    fn card_or_mount(&self, style_id: u32) -> Result<Arc<StyleCard>, SessionError> {
        if let Ok(card) = self.card(style_id) {
            return Ok(card);
        }
        self.mount_card(style_id)?;
        self.card(style_id)
    }

    fn lock_context(&self) -> Option<std::sync::MutexGuard<'_, SessionContext>> {
        self.context.lock().ok()
    }
}

fn card_truth(context: &Mutex<SessionContext>, style_id: u32, state: &PreviewState) -> CardTruth {
    let (selected, disabled) = context
        .lock()
        .map(|ctx| (ctx.selected == Some(style_id), ctx.disabled.contains(&style_id)))
        .unwrap_or_default();
    CardTruth {
        selected,
        generating: state.is_generating,
        error: state.error.is_some(),
        disabled,
    }
}
