//! Style preview generation and style-card interaction for canvas print orders.
//!
//! A [`PreviewSession`] owns one photo, its output orientation and the mounted
//! style cards. Each card pairs a [`PreviewOrchestrator`] (cache, generation,
//! watermark) with an [`InteractionMachine`] that sequences its visual state.

pub mod preview;

pub use preview::{
    InteractionMachine, InteractionState, Orientation, PreviewCache, PreviewError,
    PreviewOrchestrator, PreviewOutcome, PreviewSession, PreviewSettings, SessionError,
};
