pub mod analysis;
pub mod bbox;
pub mod calibration;
pub mod collision;
pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod lines;
pub mod observation;
pub mod quality;
pub mod smoother;
pub mod source;
pub mod speed;
pub mod store;
pub mod zones;

pub use analysis::{analyze, AnalyticsReport};
pub use calibration::{Calibration, CalibrationSpec};
pub use config::AnalyticsConfig;
pub use error::Error;
pub use frame::TrackedFrame;
pub use observation::{Observation, SmoothedObservation};
pub use source::JsonLinesSource;
pub use store::{Session, TrajectoryStore};

/// Boundary to the external multi-object tracker. Any tracker able to emit
/// per-frame `(track_id, frame, box)` batches can feed the analytics.
pub trait TrackSource {
    /// Next batch in arrival order, `None` once the tracker output is exhausted.
    fn next_frame(&mut self) -> Option<Result<TrackedFrame, Error>>;
}
