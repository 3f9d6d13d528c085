use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Error;
use crate::frame::TrackedFrame;
use crate::observation::Observation;
use crate::TrackSource;

/// Tracker output stored as one JSON observation per line. Consecutive lines
/// sharing a frame index are batched into one [`TrackedFrame`].
pub struct JsonLinesSource<R: BufRead> {
    reader: R,
    line: String,
    line_no: usize,
    pending: Option<Result<Observation, Error>>,
    // set once the reader fails, a broken stream is not retried
    failed: bool,
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
            pending: None,
            failed: false,
        }
    }

    fn next_observation(&mut self) -> Option<Result<Observation, Error>> {
        if self.failed {
            return None;
        }

        loop {
            self.line.clear();
            self.line_no += 1;

            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => (),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err.into()));
                }
            }

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            return Some(serde_json::from_str(line).map_err(|err| {
                tracing::debug!(line = self.line_no, "malformed observation");
                Error::Json(err)
            }));
        }
    }
}

impl<R: BufRead> TrackSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Option<Result<TrackedFrame, Error>> {
        let first = match self.pending.take().or_else(|| self.next_observation())? {
            Ok(obs) => obs,
            Err(err) => return Some(Err(err)),
        };

        let mut frame = TrackedFrame::new(first.frame, first.timestamp);
        frame.observations.push(first);

        loop {
            match self.next_observation() {
                Some(Ok(obs)) if obs.frame == frame.index => frame.observations.push(obs),
                // errors are reported on the next call
                Some(other) => {
                    self.pending = Some(other);
                    break;
                }
                None => break,
            }
        }

        Some(Ok(frame))
    }
}

impl TrackSource for std::vec::IntoIter<TrackedFrame> {
    #[inline]
    fn next_frame(&mut self) -> Option<Result<TrackedFrame, Error>> {
        self.next().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TrajectoryStore;
    use std::io::Read;

    const LINES: &str = r#"
{"track_id": 1, "frame": 0, "timestamp": 0.0, "bbox": [0, 0, 10, 10], "class": "car", "confidence": 0.9}
{"track_id": 2, "frame": 0, "timestamp": 0.0, "bbox": [50, 0, 60, 10], "class": "car", "confidence": 0.8}
{"track_id": 1, "frame": 1, "timestamp": 0.033, "bbox": [1, 0, 11, 10], "class": "car", "confidence": 0.9}

{"track_id": 1, "frame": 2, "timestamp": 0.066, "bbox": [2, 0, 12, 10]}
"#;

    #[test]
    fn batches_lines_by_frame() {
        let mut source = JsonLinesSource::new(LINES.as_bytes());
        let mut sizes = Vec::new();

        while let Some(frame) = source.next_frame() {
            let frame = frame.unwrap();
            sizes.push((frame.index, frame.len()));
        }

        assert_eq!(sizes, vec![(0, 2), (1, 1), (2, 1)]);
    }

    #[test]
    fn malformed_line_does_not_stop_ingestion() {
        let data = format!("{}not json\n{}", LINES, r#"{"track_id": 3, "frame": 9, "bbox": [0, 0, 1, 1]}"#);
        let mut store = TrajectoryStore::default();

        let rejected = store.ingest(&mut JsonLinesSource::new(data.as_bytes()));

        assert_eq!(rejected, 1);
        assert_eq!(store.len(), 3);
        assert_eq!(store.history(1).unwrap().len(), 3);
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "is a directory"))
        }
    }

    #[test]
    fn read_error_ends_the_source() {
        let mut source = JsonLinesSource::new(BufReader::new(Broken));

        assert!(matches!(source.next_frame(), Some(Err(Error::Io(_)))));
        assert!(source.next_frame().is_none());

        let mut store = TrajectoryStore::default();
        assert_eq!(store.ingest(&mut JsonLinesSource::new(BufReader::new(Broken))), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn error_after_frame_is_reported_once() {
        let data = "{\"track_id\": 1, \"frame\": 0, \"bbox\": [0, 0, 1, 1]}\n".as_bytes().chain(Broken);
        let mut source = JsonLinesSource::new(BufReader::new(data));

        assert_eq!(source.next_frame().unwrap().unwrap().len(), 1);
        assert!(source.next_frame().unwrap().is_err());
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn in_memory_frames_are_a_source() {
        let mut frames = vec![TrackedFrame::new(0, 0.0), TrackedFrame::new(1, 0.1)].into_iter();

        assert_eq!(frames.next_frame().unwrap().unwrap().index, 0);
        assert_eq!(frames.next_frame().unwrap().unwrap().index, 1);
        assert!(frames.next_frame().is_none());
    }
}
