//! OCR engine interface.

use std::sync::Arc;

use clap::ValueEnum;

use crate::{prelude::*, results::ResultSet, ui::Ui};

use self::paddle::{PaddleOcrEngine, models::ModelStore};

pub mod paddle;
pub mod tesseract;

/// Languages we have recognition models for.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    #[default]
    En,
    /// Simplified Chinese.
    Ch,
    /// French.
    Fr,
    German,
    Korean,
    /// Japanese.
    Japan,
}

/// Which OCR backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// PaddleOCR models, run in-process with ONNX Runtime.
    #[default]
    Paddle,
    /// The `tesseract` command-line tool.
    Tesseract,
}

/// Settings fixed for the lifetime of an engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Detect and correct upside-down text lines.
    pub angle_classification: bool,
    pub language: Language,
    /// Ask for GPU inference where the engine supports it.
    pub use_accelerator: bool,
    /// Let the engine log its progress.
    pub verbose_logging: bool,
    /// Recognitions scoring below this are discarded by the engine.
    pub drop_score: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            angle_classification: true,
            language: Language::En,
            use_accelerator: false,
            verbose_logging: false,
            drop_score: 0.5,
        }
    }
}

/// An OCR engine, loaded and ready to recognize images.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize all text in the image at `image_path`.
    ///
    /// Returns one [`ResultSet`] for the image, even if it contains no text.
    async fn recognize(
        &self,
        image_path: &Path,
        angle_correction: bool,
    ) -> Result<Vec<ResultSet>>;
}

/// Construct the engine of the given kind.
///
/// This is the expensive step. Paddle models are loaded here, and downloaded
/// into the store returned by `model_store` first if they are missing. Other
/// engines never call `model_store`.
pub async fn ocr_engine_for_kind(
    ui: &Ui,
    kind: EngineKind,
    config: &EngineConfig,
    model_store: impl FnOnce() -> Result<ModelStore>,
) -> Result<Arc<dyn OcrEngine>> {
    let engine: Arc<dyn OcrEngine> = match kind {
        EngineKind::Paddle => {
            let store = model_store()?;
            Arc::new(PaddleOcrEngine::new(ui, config, &store).await?)
        }
        EngineKind::Tesseract => Arc::new(tesseract::TesseractOcrEngine::new(config).await?),
    };
    Ok(engine)
}
