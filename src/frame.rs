use crate::observation::Observation;

/// All observations the tracker emitted for one frame index.
#[derive(Debug, Clone, Default)]
pub struct TrackedFrame {
    pub index: u64,
    pub timestamp: f32, // in seconds
    pub observations: Vec<Observation>,
}

impl TrackedFrame {
    pub fn new(index: u64, timestamp: f32) -> Self {
        Self {
            index,
            timestamp,
            observations: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
