use crate::communication::EventSender;
use crate::sensors::detection_source::DetectionError;
use crate::shared_data::QueueRecord;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Replays externally produced records from a JSON-lines file, one record per line.
///
/// Lines that cannot be classified are logged and skipped. Failing to open or
/// read the file ends this producer.
pub struct JsonFeedSource {
    path: PathBuf,
    pacing: Duration,
}

impl JsonFeedSource {
    pub fn new(path: impl Into<PathBuf>, pacing: Duration) -> Self {
        Self {
            path: path.into(),
            pacing,
        }
    }

    /// Returns the number of records published.
    pub async fn run(self, tx: EventSender, shutdown: CancellationToken) -> Result<u64, DetectionError> {
        let unavailable = |e: std::io::Error| {
            let e = DetectionError::SourceUnavailable(format!("{}: {}", self.path.display(), e));
            log::error!("[Feed] {}, stopping feed", e);
            e
        };
        let file = File::open(&self.path).await.map_err(unavailable)?;
        let mut lines = BufReader::new(file).lines();
        log::info!("[Feed] replaying records from {}", self.path.display());

        let mut line_no = 0u64;
        let mut published = 0u64;
        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line.map_err(unavailable)?,
            };
            let Some(line) = line else {
                log::info!("[Feed] {} exhausted", self.path.display());
                break;
            };
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            match QueueRecord::from_json(&line) {
                Ok(record) => {
                    if tx.push(record).is_err() {
                        log::warn!("[Feed] event queue closed, stopping");
                        break;
                    }
                    published += 1;
                }
                Err(e) => {
                    log::warn!("[Feed] skipping line {} of {}: {}", line_no, self.path.display(), e);
                    continue;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.pacing) => {}
            }
        }
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::event_queue;
    use std::io::Write;

    fn temp_feed(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.jsonl", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test(start_paused = true)]
    async fn replays_valid_lines_and_skips_the_rest() {
        let path = temp_feed(
            "feed-replay",
            concat!(
                r#"{"location":"Cam","directional_counts":{"Northbound":3,"Southbound":1,"Eastbound":0,"Westbound":2},"emergency_vehicle_detected":false}"#,
                "\n",
                "garbage\n",
                "\n",
                r#"{"location":"Intersection A","traffic_volume":{"Northbound":5,"Southbound":10,"Eastbound":2,"Westbound":7},"average_speed":33,"air_quality":0.4}"#,
                "\n",
                r#"{"location":"Nowhere"}"#,
                "\n",
            ),
        );
        let (tx, mut rx) = event_queue(CancellationToken::new());
        let source = JsonFeedSource::new(&path, Duration::from_secs(1));

        let published = source.run(tx, CancellationToken::new()).await.unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(published, 2);
        assert!(matches!(rx.try_pop(), Some(QueueRecord::Detection(_))));
        assert!(matches!(rx.try_pop(), Some(QueueRecord::Sensor(_))));
        assert!(rx.try_pop().is_none());
    }

    #[tokio::test]
    async fn missing_file_is_fatal_to_the_feed() {
        let (tx, _rx) = event_queue(CancellationToken::new());
        let source = JsonFeedSource::new("/definitely/not/here.jsonl", Duration::from_millis(1));
        let result = source.run(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(DetectionError::SourceUnavailable(_))));
    }
}
