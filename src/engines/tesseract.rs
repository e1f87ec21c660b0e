//! Tesseract OCR engine.

use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{DEFAULT_ERROR_REGEX, check_for_command_failure},
    errors::OcrError,
    prelude::*,
    results::{Detection, ResultSet, rect_polygon},
};

use super::{EngineConfig, Language, OcrEngine};

/// TSV `level` of a single word.
const WORD_LEVEL: u32 = 5;

/// OCR engine wrapping the `tesseract` CLI tool.
pub struct TesseractOcrEngine {
    language: &'static str,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine. Fails if `tesseract` is not
    /// installed.
    pub async fn new(config: &EngineConfig) -> Result<Self> {
        if config.use_accelerator {
            warn!("tesseract does not support accelerators; using the CPU");
        }
        let version = program_version("tesseract").await?;
        if config.verbose_logging {
            info!(%version, "Using tesseract");
        }
        Ok(Self {
            language: tesseract_language(config.language),
        })
    }

    /// Run `tesseract` with TSV output and the given page segmentation mode.
    async fn run(&self, image_path: &Path, psm: &str) -> Result<std::process::Output> {
        Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", self.language, "--psm", psm, "tsv"])
            .output()
            .await
            .map_err(|err| OcrError::EngineRuntime(format!("cannot run tesseract: {err}")).into())
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(path = %image_path.display()))]
    async fn recognize(
        &self,
        image_path: &Path,
        angle_correction: bool,
    ) -> Result<Vec<ResultSet>> {
        // tesseract's own message for a bad path is not very clear.
        if !tokio::fs::try_exists(image_path).await.unwrap_or(false) {
            return Err(OcrError::invalid_input(image_path, "no such file").into());
        }

        // Page segmentation mode 1 adds orientation detection, which needs
        // `osd.traineddata`. Without it, tesseract complains but carries on.
        let mut output = self
            .run(image_path, if angle_correction { "1" } else { "3" })
            .await?;
        if angle_correction && missing_osd_data(&String::from_utf8_lossy(&output.stderr)) {
            warn!("tesseract has no orientation data; skipping angle correction");
            output = self.run(image_path, "3").await?;
        }
        check_for_command_failure("tesseract", &output, Some(&DEFAULT_ERROR_REGEX))
            .map_err(|err| OcrError::EngineRuntime(format!("{err:#}")))?;

        let tsv = String::from_utf8_lossy(&output.stdout);
        let detections = parse_tsv(&tsv)?;
        debug!(count = detections.len(), "Recognized text lines");
        Ok(vec![ResultSet::new(detections)])
    }
}

/// Run `program --version` and return the first line it prints.
async fn program_version(program: &str) -> Result<String> {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .await
        .map_err(|err| OcrError::EngineInitialization(format!("cannot run {program}: {err}")))?;
    check_for_command_failure(program, &output, None)
        .map_err(|err| OcrError::EngineInitialization(format!("{err:#}")))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().to_owned())
}

/// Did tesseract fail to load its orientation and script detection data?
fn missing_osd_data(stderr: &str) -> bool {
    static OSD_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^\s*Error\b.*\bosd\.traineddata").expect("failed to compile regex")
    });
    OSD_ERROR_REGEX.is_match(stderr)
}

/// Map our language names to tesseract's.
fn tesseract_language(language: Language) -> &'static str {
    match language {
        Language::En => "eng",
        Language::Ch => "chi_sim",
        Language::Fr => "fra",
        Language::German => "deu",
        Language::Korean => "kor",
        Language::Japan => "jpn",
    }
}

/// A text line being assembled from word rows.
struct LineBuilder {
    key: (u32, u32, u32, u32),
    words: Vec<String>,
    confidences: Vec<f32>,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl LineBuilder {
    fn finish(self) -> Option<Detection> {
        if self.words.is_empty() {
            return None;
        }
        let confidence = if self.confidences.is_empty() {
            0.0
        } else {
            self.confidences.iter().sum::<f32>() / self.confidences.len() as f32
        };
        Some(Detection {
            polygon: rect_polygon(self.left, self.top, self.right, self.bottom),
            text: self.words.join(" "),
            confidence,
        })
    }
}

/// Group the word rows of `tesseract ... tsv` output into lines.
///
/// Columns are `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Words with a confidence of -1 do not count
/// towards the line's confidence.
fn parse_tsv(tsv: &str) -> Result<Vec<Detection>> {
    let mut detections = vec![];
    let mut current: Option<LineBuilder> = None;

    for (line_no, row) in tsv.lines().enumerate().skip(1) {
        if row.trim().is_empty() {
            continue;
        }
        let fields = row.splitn(12, '\t').collect::<Vec<_>>();
        if fields.len() < 11 {
            return Err(OcrError::EngineRuntime(format!(
                "malformed tesseract output on line {}: {row:?}",
                line_no + 1
            ))
            .into());
        }
        let int = |i: usize| -> Result<u32> {
            fields[i].parse::<u32>().map_err(|err| {
                OcrError::EngineRuntime(format!(
                    "bad number {:?} in tesseract output line {}: {err}",
                    fields[i],
                    line_no + 1
                ))
                .into()
            })
        };
        if int(0)? != WORD_LEVEL {
            continue;
        }
        let text = fields.get(11).map(|t| t.trim()).unwrap_or_default();
        if text.is_empty() {
            continue;
        }

        let key = (int(1)?, int(2)?, int(3)?, int(4)?);
        let (left, top) = (int(6)? as f32, int(7)? as f32);
        let (right, bottom) = (left + int(8)? as f32, top + int(9)? as f32);
        let conf = fields[10].parse::<f32>().unwrap_or(-1.0);

        if current.as_ref().is_some_and(|line| line.key != key) {
            if let Some(done) = current.take().and_then(LineBuilder::finish) {
                detections.push(done);
            }
        }
        let line = current.get_or_insert_with(|| LineBuilder {
            key,
            words: vec![],
            confidences: vec![],
            left,
            top,
            right,
            bottom,
        });
        line.words.push(text.to_owned());
        if conf >= 0.0 {
            line.confidences.push(conf / 100.0);
        }
        line.left = line.left.min(left);
        line.top = line.top.min(top);
        line.right = line.right.max(right);
        line.bottom = line.bottom.max(bottom);
    }

    if let Some(done) = current.and_then(LineBuilder::finish) {
        detections.push(done);
    }
    Ok(detections)
}
