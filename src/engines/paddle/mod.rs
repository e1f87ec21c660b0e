//! PaddleOCR engine, run in-process with ONNX Runtime.
//!
//! The pipeline is the usual PP-OCR one: detect text boxes, crop each box,
//! optionally fix upside-down crops, and recognize each crop.

use std::sync::Arc;

use image::RgbImage;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    errors::OcrError,
    prelude::*,
    results::{Detection, ResultSet},
    ui::Ui,
};

use self::{
    classification::AngleClassifier,
    detection::{TextDetector, crop_text_region},
    models::{ModelSet, ModelStore},
    recognition::TextRecognizer,
    session::OnnxModel,
};

use super::{EngineConfig, OcrEngine};

pub mod classification;
pub mod detection;
pub mod models;
pub mod preprocess;
pub mod recognition;
pub mod session;

/// OCR engine backed by PaddleOCR ONNX models.
pub struct PaddleOcrEngine {
    pipeline: Arc<Pipeline>,
}

impl PaddleOcrEngine {
    /// Fetch any missing models and load them.
    #[instrument(level = "debug", skip_all, fields(language = ?config.language))]
    pub async fn new(ui: &Ui, config: &EngineConfig, store: &ModelStore) -> Result<Self> {
        let models = ModelSet::for_language(config.language);
        let det_path = store.ensure(ui, &models.detection).await?;
        let cls_path = if config.angle_classification {
            Some(store.ensure(ui, &models.classification).await?)
        } else {
            None
        };
        let rec_path = store.ensure(ui, &models.recognition).await?;
        let dict_path = store.ensure(ui, &models.dictionary).await?;
        let dictionary = tokio::fs::read_to_string(&dict_path)
            .await
            .with_context(|| format!("cannot read dictionary {}", dict_path.display()))?;

        let use_accelerator = config.use_accelerator;
        let drop_score = config.drop_score;
        let pipeline = spawn_blocking_propagating_panics(move || -> Result<Pipeline> {
            let detector = TextDetector::new(OnnxModel::load(
                "detection",
                &det_path,
                use_accelerator,
            )?);
            let classifier = cls_path
                .map(|path| OnnxModel::load("classification", &path, use_accelerator))
                .transpose()?
                .map(AngleClassifier::new);
            let recognizer = TextRecognizer::new(
                OnnxModel::load("recognition", &rec_path, use_accelerator)?,
                &dictionary,
            );
            Ok(Pipeline {
                detector,
                classifier,
                recognizer,
                drop_score,
            })
        })
        .await?;

        if config.verbose_logging {
            info!(
                model_dir = %store.dir().display(),
                language = ?config.language,
                angle_classification = config.angle_classification,
                "PaddleOCR models loaded"
            );
        }
        Ok(Self {
            pipeline: Arc::new(pipeline),
        })
    }
}

#[async_trait]
impl OcrEngine for PaddleOcrEngine {
    #[instrument(level = "debug", skip_all, fields(path = %image_path.display()))]
    async fn recognize(
        &self,
        image_path: &Path,
        angle_correction: bool,
    ) -> Result<Vec<ResultSet>> {
        let pipeline = self.pipeline.clone();
        let image_path = image_path.to_owned();
        spawn_blocking_propagating_panics(move || {
            let image = read_image(&image_path)?;
            let detections = pipeline.run(&image, angle_correction)?;
            Ok(vec![ResultSet::new(detections)])
        })
        .await
    }
}

/// Loaded models, shared with blocking worker threads.
struct Pipeline {
    detector: TextDetector,
    classifier: Option<AngleClassifier>,
    recognizer: TextRecognizer,
    drop_score: f32,
}

impl Pipeline {
    fn run(&self, image: &RgbImage, angle_correction: bool) -> Result<Vec<Detection>> {
        let boxes = self.detector.detect(image)?;
        let classifier = match (&self.classifier, angle_correction) {
            (Some(classifier), true) => Some(classifier),
            (None, true) => {
                warn!("Angle correction requested, but no classifier is loaded");
                None
            }
            (_, false) => None,
        };

        let mut detections = Vec::with_capacity(boxes.len());
        for text_box in boxes {
            let mut crop = crop_text_region(image, &text_box);
            if let Some(classifier) = classifier {
                crop = classifier.correct(crop)?;
            }
            let (text, confidence) = self.recognizer.recognize(&crop)?;
            if confidence < self.drop_score {
                trace!(%text, confidence, "Dropping low-confidence text");
                continue;
            }
            detections.push(Detection {
                polygon: text_box.polygon(),
                text,
                confidence,
            });
        }
        debug!(count = detections.len(), "Recognized text lines");
        Ok(detections)
    }
}

/// Read and decode an image, whatever its extension says.
fn read_image(path: &Path) -> Result<RgbImage> {
    let image = image::ImageReader::open(path)
        .map_err(|err| OcrError::invalid_input(path, err))?
        .with_guessed_format()
        .map_err(|err| OcrError::invalid_input(path, err))?
        .decode()
        .map_err(|err| OcrError::invalid_input(path, err))?;
    Ok(image.to_rgb8())
}
