mod cache;
pub use cache::{CacheEntry, Fingerprint, PreviewCache};

mod client;
#[cfg(feature = "preview-http")]
pub use client::HttpGenerationService;
pub use client::{GenerateResponse, GenerationClient, GenerationService, PollPolicy, StatusResponse};

mod debounce;
pub use debounce::{DebouncedRequest, Debouncer};

mod error;
pub use error::{PreviewError, PreviewResult, ServiceError};

mod interaction;
pub use interaction::{
    next_state, plan_path, CardTruth, DispatchOutcome, InteractionEvent, InteractionMachine,
    InteractionState, MachineConfig, Transition,
};

mod orchestrator;
pub use orchestrator::{
    ErrorAffordance, OrchestratorConfig, PreviewOrchestrator, PreviewOutcome, PreviewState,
};

mod orientation;
pub use orientation::{
    auto_correct, detect_from_dimensions, detect_orientation_from_bytes,
    detect_orientation_from_file, is_valid_aspect_ratio, is_valid_orientation, to_aspect_ratio,
    validate, AspectRatio, DetectError, Orientation, ValidationOutcome, ValidationPolicy,
};

mod session;
pub use session::{PreviewSession, SessionError, SourceUpdate, StyleCardView};

mod settings;
pub use settings::{
    default_settings_path, load_preview_settings, save_preview_settings, PreviewSettings,
};

mod types;
pub use types::{
    find_style, generate_request_id, style_catalog, GenerationRequest, GenerationResult, ImageId,
    JobStatus, SourceImage, StyleDescriptor, ORIGINAL_STYLE_ID,
};

mod watermark;
#[cfg(feature = "preview-http")]
pub use watermark::HttpWatermarkService;
pub use watermark::{WatermarkService, Watermarker};
