//! Detection ingest loop.
//!
//! Reads newline-terminated vision output, keeps only lines the parser
//! recognizes, and publishes the resulting signal. Bytes that are not UTF-8
//! are replaced, never fatal. EOF ends the loop; the broadcaster keeps
//! serving the last signal.

use metrics::counter;
use peeper_core::{DetectionParser, SignalPolicy};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::metrics::DETECTIONS_TOTAL;

/// What an ingest run saw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Lines read.
    pub lines: u64,
    /// Lines recognized as detections and published.
    pub detections: u64,
    /// Alert activations (off → on edges).
    pub alerts: u64,
}

/// Run until EOF, a read error, or cancellation.
pub async fn run_ingest<R>(
    mut reader: R,
    parser: &DetectionParser,
    policy: &SignalPolicy,
    broadcaster: &Broadcaster,
    cancel: CancellationToken,
) -> IngestStats
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut stats = IngestStats::default();
    let mut alert_active = false;

    loop {
        buf.clear();
        let read = tokio::select! {
            () = cancel.cancelled() => {
                debug!("ingest cancelled");
                break;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!(lines = stats.lines, detections = stats.detections, "detection source closed");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "detection source read failed");
                break;
            }
        }
        stats.lines += 1;

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() || !parser.is_detection_line(line) {
            continue;
        }

        let snapshot = parser.parse(line);
        let signal = policy.evaluate(&snapshot);
        stats.detections += 1;
        counter!(DETECTIONS_TOTAL).increment(1);
        debug!(
            objects = snapshot.len(),
            value = signal.value,
            alert = signal.alert_active,
            primary = signal.primary_object.as_deref().unwrap_or("-"),
            "detection"
        );

        if signal.alert_active != alert_active {
            alert_active = signal.alert_active;
            if alert_active {
                stats.alerts += 1;
                info!(value = signal.value, "alert activated");
            } else {
                info!("alert deactivated");
            }
        }

        broadcaster.publish(snapshot, signal);
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use peeper_settings::DetectionSettings;
    use tokio::io::{AsyncWriteExt, BufReader};

    fn pipeline() -> (DetectionParser, SignalPolicy, Broadcaster) {
        let settings = DetectionSettings::default();
        (
            DetectionParser::from_settings(&settings).unwrap(),
            SignalPolicy::from_settings(&settings),
            Broadcaster::new(Duration::from_millis(500)),
        )
    }

    #[tokio::test]
    async fn publishes_recognized_lines_and_ends_on_eof() {
        let (parser, policy, bc) = pipeline();
        let input: &[u8] = b"camera warming up\n\
            Object detected: person (0.92)\n\
            \n\
            person (0.80) cup (0.60)\n";

        let stats = run_ingest(BufReader::new(input), &parser, &policy, &bc, CancellationToken::new()).await;

        assert_eq!(stats.lines, 4);
        assert_eq!(stats.detections, 2);
        assert_eq!(stats.alerts, 1);
        let latest = bc.latest();
        assert!(latest.signal.alert_active);
        assert!((latest.signal.value - 0.70).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unrecognized_lines_leave_signal_unchanged() {
        let (parser, policy, bc) = pipeline();
        let input: &[u8] = b"Object detected: person (0.50)\nframe 42 processed\n";
        let _ = run_ingest(BufReader::new(input), &parser, &policy, &bc, CancellationToken::new()).await;
        assert!((bc.latest().signal.value - 0.35).abs() < 1e-9);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_stop_ingest() {
        let (parser, policy, bc) = pipeline();
        let input: &[u8] = b"noise \xff\xfe garbage\nObject detected: person (0.92)\n";
        let stats = run_ingest(BufReader::new(input), &parser, &policy, &bc, CancellationToken::new()).await;
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.detections, 1);
        assert!((bc.latest().signal.value - 0.92 * 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_read() {
        let (parser, policy, bc) = pipeline();
        let input: &[u8] = b"Object detected: cup (0.50)";
        let stats = run_ingest(BufReader::new(input), &parser, &policy, &bc, CancellationToken::new()).await;
        assert_eq!(stats.detections, 1);
        assert!((bc.latest().signal.value - 0.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn alert_edges_are_counted() {
        let (parser, policy, bc) = pipeline();
        let input: &[u8] = b"person (0.8) cup (0.6)\n\
            person (0.8) cup (0.6)\n\
            Object detected: person (0.9)\n\
            person (0.7) cup (0.7)\n";
        let stats = run_ingest(BufReader::new(input), &parser, &policy, &bc, CancellationToken::new()).await;
        assert_eq!(stats.alerts, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_a_blocked_reader() {
        let (parser, policy, bc) = pipeline();
        let (_writer, reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });
        let stats = run_ingest(BufReader::new(reader), &parser, &policy, &bc, cancel).await;
        assert_eq!(stats.lines, 0);
    }

    #[tokio::test]
    async fn lines_arriving_over_time() {
        let (parser, policy, bc) = pipeline();
        let (mut writer, reader) = tokio::io::duplex(256);
        let feeder = tokio::spawn(async move {
            writer.write_all(b"Object detected: cup (0.40)\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.write_all(b"Object detected: book (0.90)\n").await.unwrap();
        });
        let stats = run_ingest(BufReader::new(reader), &parser, &policy, &bc, CancellationToken::new()).await;
        feeder.await.unwrap();
        assert_eq!(stats.detections, 2);
        assert!((bc.latest().signal.value - 0.09).abs() < 1e-9);
        assert_eq!(bc.latest().signal.primary_object.as_deref(), Some("book"));
    }
}
