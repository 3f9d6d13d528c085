use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

/// One tracked box as reported by the external tracker. Never mutated once recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Observation {
    pub track_id: u32,
    #[serde(alias = "frame_index")]
    pub frame: u64,
    /// in seconds
    #[serde(default)]
    pub timestamp: f32,
    pub bbox: BBox<Ltrb>,
    #[serde(default, rename = "class", alias = "class_label")]
    pub class_label: String,
    #[serde(default = "default_confidence", alias = "p")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl Observation {
    pub fn new(track_id: u32, frame: u64, timestamp: f32, bbox: BBox<Ltrb>) -> Self {
        Self {
            track_id,
            frame,
            timestamp,
            bbox,
            class_label: String::new(),
            confidence: 1.0,
        }
    }

    pub fn with_class(mut self, class_label: impl Into<String>, confidence: f32) -> Self {
        self.class_label = class_label.into();
        self.confidence = confidence;
        self
    }
}

/// Derived box for `(track_id, frame)`; lives next to the raw observation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SmoothedObservation {
    pub track_id: u32,
    pub frame: u64,
    pub timestamp: f32,
    pub bbox: BBox<Ltrb>,
}
