use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Out of order frame for track {track_id}: frame {frame} is not after {last}")]
    OutOfOrderFrame { track_id: u32, frame: u64, last: u64 },

    #[error("Invalid observation for track {track_id} at frame {frame}: {reason}")]
    InvalidObservation {
        track_id: u32,
        frame: u64,
        reason: String,
    },

    #[error("Degenerate calibration: {0}")]
    DegenerateCalibration(String),

    #[error("Ill-conditioned homography: {0}")]
    IllConditionedHomography(String),

    #[error("Invalid zone geometry for `{name}`: {reason}")]
    InvalidZoneGeometry { name: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
}
