use std::fmt;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::orientation::AspectRatio;

/// Style id reserved for "show the photo as uploaded"; never sent for generation.
pub const ORIGINAL_STYLE_ID: u32 = 1;

const IMAGE_ID_HEX_LEN: usize = 16;
const REQUEST_ID_RANDOM_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDescriptor {
    pub id: u32,
    pub name: String,
    pub thumbnail: String,
}

impl StyleDescriptor {
    pub fn new(id: u32, name: impl Into<String>, thumbnail: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            thumbnail: thumbnail.into(),
        }
    }

    pub fn original() -> Self {
        Self::new(ORIGINAL_STYLE_ID, "Original Image", "/styles/original.jpg")
    }

    pub fn is_original(&self) -> bool {
        self.id == ORIGINAL_STYLE_ID
    }
}

/// Built-in styles offered on the preview step.
pub fn style_catalog() -> Vec<StyleDescriptor> {
    vec![
        StyleDescriptor::original(),
        StyleDescriptor::new(2, "Classic Oil Painting", "/styles/classic-oil.jpg"),
        StyleDescriptor::new(3, "Pop Art Burst", "/styles/pop-art.jpg"),
        StyleDescriptor::new(4, "Watercolor Dreams", "/styles/watercolor.jpg"),
        StyleDescriptor::new(5, "Pencil Sketch", "/styles/pencil-sketch.jpg"),
        StyleDescriptor::new(6, "Neon Nights", "/styles/neon.jpg"),
        StyleDescriptor::new(7, "Vintage Film", "/styles/vintage-film.jpg"),
        StyleDescriptor::new(8, "Abstract Fusion", "/styles/abstract.jpg"),
    ]
}

pub fn find_style(id: u32) -> Option<StyleDescriptor> {
    style_catalog().into_iter().find(|style| style.id == id)
}

/// Stable identity of an uploaded photo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    pub fn from_uri(uri: &str) -> Self {
        let digest = Sha256::digest(uri.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(IMAGE_ID_HEX_LEN);
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image handle materialized by the upload step: a data URI or a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    uri: String,
    id: ImageId,
}

impl SourceImage {
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let id = ImageId::from_uri(&uri);
        Self { uri, id }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn id(&self) -> &ImageId {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.uri.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub source_image: SourceImage,
    pub style: StyleDescriptor,
    pub request_id: String,
    pub aspect_ratio: AspectRatio,
}

impl GenerationRequest {
    pub fn new(source_image: SourceImage, style: StyleDescriptor, aspect_ratio: AspectRatio) -> Self {
        Self {
            source_image,
            style,
            request_id: generate_request_id(),
            aspect_ratio,
        }
    }
}

/// Immediate answer of the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Complete { preview_url: String },
    Processing { job_id: String },
    Failed { reason: String },
}

/// State of an asynchronous generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Processing,
    Succeeded { preview_url: String },
    Failed { reason: String },
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

pub fn generate_request_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("req-{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}
