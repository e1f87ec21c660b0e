//! Writing recognized text to standard output.

use clap::ValueEnum;
use tokio::io::{AsyncWrite, AsyncWriteExt as _, BufWriter};

use crate::{
    prelude::*,
    results::{Detection, ResultSet, flatten},
};

/// How to render results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One recognized text per line.
    #[default]
    Text,
    /// All result sets as a single JSON document, with polygons and
    /// confidences.
    Json,
    /// One JSON object per detection.
    Jsonl,
}

/// Write `results` to `writer` and flush it.
///
/// Detections below `min_confidence` are skipped. Order is never changed.
pub async fn write_results<W>(
    writer: W,
    results: &[ResultSet],
    format: OutputFormat,
    min_confidence: f32,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let keep = |d: &&Detection| d.confidence >= min_confidence;
    let mut writer = BufWriter::new(writer);
    match format {
        OutputFormat::Text => {
            for detection in flatten(results).filter(keep) {
                writer
                    .write_all(detection.text.as_bytes())
                    .await
                    .context("Failed to write text to output")?;
                writer
                    .write_all(b"\n")
                    .await
                    .context("Failed to write newline to output")?;
            }
        }
        OutputFormat::Json => {
            let filtered = results
                .iter()
                .map(|set| {
                    ResultSet::new(set.detections.iter().filter(keep).cloned().collect())
                })
                .collect::<Vec<_>>();
            let json = serde_json::to_string_pretty(&filtered)
                .context("Failed to serialize results")?;
            writer
                .write_all(json.as_bytes())
                .await
                .context("Failed to write JSON to output")?;
            writer
                .write_all(b"\n")
                .await
                .context("Failed to write newline to output")?;
        }
        OutputFormat::Jsonl => {
            for detection in flatten(results).filter(keep) {
                let json = serde_json::to_string(detection).with_context(|| {
                    format!("Failed to serialize detection: {:?}", detection)
                })?;
                writer
                    .write_all(json.as_bytes())
                    .await
                    .context("Failed to write JSON to output")?;
                writer
                    .write_all(b"\n")
                    .await
                    .context("Failed to write newline to output")?;
            }
        }
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::detection;

    async fn render(results: &[ResultSet], format: OutputFormat, min: f32) -> String {
        let mut buf = Vec::new();
        write_results(&mut buf, results, format, min).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn sample() -> Vec<ResultSet> {
        vec![ResultSet::new(vec![
            detection("HELLO WORLD", 0.98),
            detection("fine print", 0.42),
        ])]
    }

    #[tokio::test]
    async fn text_is_one_line_per_detection() {
        let out = render(&sample(), OutputFormat::Text, 0.0).await;
        assert_eq!(out, "HELLO WORLD\nfine print\n");
    }

    #[tokio::test]
    async fn empty_results_write_nothing() {
        let out = render(&[ResultSet::default()], OutputFormat::Text, 0.0).await;
        assert_eq!(out, "");
        let out = render(&[], OutputFormat::Jsonl, 0.0).await;
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn min_confidence_filters_without_reordering() {
        let out = render(&sample(), OutputFormat::Text, 0.5).await;
        assert_eq!(out, "HELLO WORLD\n");
    }

    #[tokio::test]
    async fn json_round_trips_to_result_sets() {
        let out = render(&sample(), OutputFormat::Json, 0.0).await;
        let parsed: Vec<ResultSet> = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, sample());
    }

    #[tokio::test]
    async fn jsonl_keeps_confidence() {
        let out = render(&sample(), OutputFormat::Jsonl, 0.0).await;
        let lines = out.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let second: Detection = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.text, "fine print");
        assert!((second.confidence - 0.42).abs() < 1e-6);
    }
}
