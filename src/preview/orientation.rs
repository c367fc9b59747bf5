//! Orientation and aspect-ratio normalization.

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageReader;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const HORIZONTAL_THRESHOLD: f64 = 1.2;
const VERTICAL_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Square,
    Horizontal,
    Vertical,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Square,
        Orientation::Horizontal,
        Orientation::Vertical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Square => "square",
            Orientation::Horizontal => "horizontal",
            Orientation::Vertical => "vertical",
        }
    }

    /// Exact, case-insensitive parse of a canonical orientation name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "square" => Some(Orientation::Square),
            "horizontal" => Some(Orientation::Horizontal),
            "vertical" => Some(Orientation::Vertical),
            _ => None,
        }
    }

    pub fn aspect_ratio(self) -> AspectRatio {
        match self {
            Orientation::Square => AspectRatio::Square,
            Orientation::Horizontal => AspectRatio::Landscape,
            Orientation::Vertical => AspectRatio::Portrait,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine aspect-ratio token accepted by the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:2")]
    Landscape,
    #[serde(rename = "2:3")]
    Portrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "3:2",
            AspectRatio::Portrait => "2:3",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "1:1" => Some(AspectRatio::Square),
            "3:2" => Some(AspectRatio::Landscape),
            "2:3" => Some(AspectRatio::Portrait),
            _ => None,
        }
    }

    pub fn orientation(self) -> Orientation {
        match self {
            AspectRatio::Square => Orientation::Square,
            AspectRatio::Landscape => Orientation::Horizontal,
            AspectRatio::Portrait => Orientation::Vertical,
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to treat an orientation that cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Auto-correct to the closest orientation, falling back to square.
    #[default]
    Lenient,
    /// Reject unparseable orientations outright.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub corrected_value: Option<AspectRatio>,
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn valid() -> Self {
        Self {
            is_valid: true,
            corrected_value: None,
            error: None,
        }
    }

    /// The aspect ratio callers should proceed with, if any.
    pub fn resolved(&self, candidate: Option<AspectRatio>) -> Option<AspectRatio> {
        if self.is_valid {
            candidate
        } else {
            self.corrected_value
        }
    }
}

pub fn is_valid_orientation(value: &str) -> bool {
    Orientation::parse(value).is_some()
}

pub fn is_valid_aspect_ratio(token: &str) -> bool {
    AspectRatio::parse(token).is_some()
}

/// Total lookup; anything unrecognized maps to the square token.
pub fn to_aspect_ratio(value: &str) -> AspectRatio {
    match Orientation::parse(value) {
        Some(orientation) => orientation.aspect_ratio(),
        None => {
            warn!(value, "invalid orientation, falling back to square");
            Orientation::Square.aspect_ratio()
        }
    }
}

/// Best-effort correction of free-form orientation input.
pub fn auto_correct(raw: &str) -> Orientation {
    if let Some(orientation) = Orientation::parse(raw) {
        return orientation;
    }
    let lowered = raw.trim().to_ascii_lowercase();
    let corrected = if lowered.contains("landscape") || lowered.contains("horizontal") {
        Orientation::Horizontal
    } else if lowered.contains("portrait") || lowered.contains("vertical") {
        Orientation::Vertical
    } else {
        Orientation::Square
    };
    warn!(raw, corrected = %corrected, "corrected orientation value");
    corrected
}

/// Checks that `candidate` is the token `orientation` implies.
pub fn validate(orientation: &str, candidate: &str, policy: ValidationPolicy) -> ValidationOutcome {
    let expected = match Orientation::parse(orientation) {
        Some(parsed) => parsed.aspect_ratio(),
        None => {
            let error = format!("invalid orientation: {:?}", orientation);
            return match policy {
                ValidationPolicy::Lenient => ValidationOutcome {
                    is_valid: false,
                    corrected_value: Some(auto_correct(orientation).aspect_ratio()),
                    error: Some(error),
                },
                ValidationPolicy::Strict => ValidationOutcome {
                    is_valid: false,
                    corrected_value: None,
                    error: Some(error),
                },
            };
        }
    };

    match AspectRatio::parse(candidate) {
        Some(ratio) if ratio == expected => ValidationOutcome::valid(),
        Some(ratio) => ValidationOutcome {
            is_valid: false,
            corrected_value: Some(expected),
            error: Some(format!(
                "aspect ratio {} does not match orientation {}",
                ratio, orientation
            )),
        },
        None => ValidationOutcome {
            is_valid: false,
            corrected_value: Some(expected),
            error: Some(format!("invalid aspect ratio: {:?}", candidate)),
        },
    }
}

pub fn detect_from_dimensions(width: u32, height: u32) -> Orientation {
    if width == 0 || height == 0 {
        return Orientation::Square;
    }
    let ratio = f64::from(width) / f64::from(height);
    if ratio > HORIZONTAL_THRESHOLD {
        Orientation::Horizontal
    } else if ratio < VERTICAL_THRESHOLD {
        Orientation::Vertical
    } else {
        Orientation::Square
    }
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Reads the natural dimensions of an image file and classifies them.
pub async fn detect_orientation_from_file(path: impl Into<PathBuf>) -> Result<Orientation, DetectError> {
    let path = path.into();
    let (width, height) = tokio::task::spawn_blocking(move || read_file_dimensions(&path)).await??;
    Ok(detect_from_dimensions(width, height))
}

/// Same as [`detect_orientation_from_file`] for an in-memory encoded image.
pub async fn detect_orientation_from_bytes(bytes: Vec<u8>) -> Result<Orientation, DetectError> {
    let (width, height) = tokio::task::spawn_blocking(move || {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(DetectError::from)
    })
    .await??;
    Ok(detect_from_dimensions(width, height))
}

fn read_file_dimensions(path: &Path) -> Result<(u32, u32), DetectError> {
    let dimensions = ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(dimensions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_orientation_maps_to_its_token() {
        assert_eq!(to_aspect_ratio("square"), AspectRatio::Square);
        assert_eq!(to_aspect_ratio("horizontal"), AspectRatio::Landscape);
        assert_eq!(to_aspect_ratio("Vertical"), AspectRatio::Portrait);
        for orientation in Orientation::ALL {
            assert_eq!(orientation.aspect_ratio().orientation(), orientation);
        }
    }

    #[test]
    fn unknown_orientation_falls_back_to_square() {
        assert_eq!(to_aspect_ratio("diagonal"), AspectRatio::Square);
        assert_eq!(to_aspect_ratio(""), AspectRatio::Square);
        assert!(!is_valid_orientation("diagonal"));
        assert!(is_valid_orientation("SQUARE"));
    }

    #[test]
    fn aspect_ratio_tokens_form_a_closed_set() {
        for ratio in AspectRatio::ALL {
            assert!(is_valid_aspect_ratio(ratio.as_str()));
        }
        assert!(!is_valid_aspect_ratio("16:9"));
        assert!(!is_valid_aspect_ratio("square"));
    }

    #[test]
    fn auto_correct_understands_natural_language() {
        assert_eq!(auto_correct("Landscape mode"), Orientation::Horizontal);
        assert_eq!(auto_correct("portrait"), Orientation::Vertical);
        assert_eq!(auto_correct("tall vertical print"), Orientation::Vertical);
        assert_eq!(auto_correct("horizontal-ish"), Orientation::Horizontal);
        assert_eq!(auto_correct("round"), Orientation::Square);
    }

    #[test]
    fn validate_accepts_each_canonical_pair() {
        for orientation in Orientation::ALL {
            let outcome = validate(
                orientation.as_str(),
                orientation.aspect_ratio().as_str(),
                ValidationPolicy::Strict,
            );
            assert!(outcome.is_valid, "{} should validate", orientation);
            assert!(outcome.corrected_value.is_none());
        }
    }

    #[test]
    fn validate_corrects_mismatched_token() {
        let outcome = validate("vertical", "3:2", ValidationPolicy::Lenient);
        assert!(!outcome.is_valid);
        assert_eq!(outcome.corrected_value, Some(AspectRatio::Portrait));
        assert!(outcome.error.is_some());
        assert_eq!(
            outcome.resolved(AspectRatio::parse("3:2")),
            Some(AspectRatio::Portrait)
        );
    }

    #[test]
    fn strict_policy_leaves_unparseable_orientation_uncorrected() {
        let lenient = validate("landscape", "1:1", ValidationPolicy::Lenient);
        assert_eq!(lenient.corrected_value, Some(AspectRatio::Landscape));

        let strict = validate("landscape", "1:1", ValidationPolicy::Strict);
        assert!(!strict.is_valid);
        assert!(strict.corrected_value.is_none());
        assert!(strict.resolved(Some(AspectRatio::Square)).is_none());
    }

    #[test]
    fn dimensions_classify_with_thresholds() {
        assert_eq!(detect_from_dimensions(1200, 800), Orientation::Horizontal);
        assert_eq!(detect_from_dimensions(800, 1200), Orientation::Vertical);
        assert_eq!(detect_from_dimensions(1000, 1000), Orientation::Square);
        assert_eq!(detect_from_dimensions(1200, 1000), Orientation::Square);
        assert_eq!(detect_from_dimensions(800, 1000), Orientation::Square);
        assert_eq!(detect_from_dimensions(0, 0), Orientation::Square);
        assert_eq!(
            detect_from_dimensions(1200, 800),
            detect_from_dimensions(1200, 800)
        );
    }

    #[tokio::test]
    async fn detects_orientation_from_png_file() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let path = temp.path().join("photo.png");
        image::RgbImage::new(60, 120).save(&path).expect("write png");

        let orientation = detect_orientation_from_file(&path).await.expect("detect");
        assert_eq!(orientation, Orientation::Vertical);

        let bytes = std::fs::read(&path).expect("read png");
        let orientation = detect_orientation_from_bytes(bytes).await.expect("detect");
        assert_eq!(orientation, Orientation::Vertical);
    }

    #[tokio::test]
    async fn detection_rejects_unreadable_images() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let path = temp.path().join("missing.png");
        assert!(detect_orientation_from_file(&path).await.is_err());
        assert!(detect_orientation_from_bytes(b"not an image".to_vec())
            .await
            .is_err());
    }
}
