//! Extract text from a single image.

use clap::Args;
use tokio::io::AsyncWrite;

use crate::{
    engines::{
        EngineConfig, EngineKind, Language, OcrEngine, ocr_engine_for_kind,
        paddle::models::ModelStore,
    },
    output::{OutputFormat, write_results},
    prelude::*,
    results::ResultSet,
    ui::Ui,
};

/// Options for extracting text.
#[derive(Debug, Clone, Args)]
pub struct ExtractOpts {
    /// The image to read text from.
    image_path: PathBuf,

    /// The OCR backend to use.
    #[clap(long, value_enum, default_value_t = EngineKind::Paddle)]
    engine: EngineKind,

    /// The language of the text in the image.
    #[clap(long = "lang", value_enum, default_value_t = Language::En)]
    language: Language,

    /// Don't try to detect and fix upside-down text lines.
    #[clap(long)]
    no_angle_cls: bool,

    /// Use a GPU for inference, if one is available.
    #[clap(long)]
    use_accelerator: bool,

    /// Log what the OCR engine is doing.
    #[clap(short, long)]
    pub verbose: bool,

    /// Where to cache model weights. Defaults to the user's cache
    /// directory.
    #[clap(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Never download models. Fail if they are not already present.
    #[clap(long)]
    offline: bool,

    /// How to print results.
    #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Don't print text recognized with less than this confidence.
    #[clap(long, value_name = "F", default_value = "0.0")]
    min_confidence: f32,

    /// Have the engine discard text recognized with less than this
    /// confidence.
    #[clap(long, value_name = "F", default_value = "0.5")]
    drop_score: f32,
}

impl ExtractOpts {
    /// The engine configuration these options describe.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            angle_classification: !self.no_angle_cls,
            language: self.language,
            use_accelerator: self.use_accelerator,
            verbose_logging: self.verbose,
            drop_score: self.drop_score,
        }
    }

    fn model_store(&self) -> Result<ModelStore> {
        let dir = match &self.model_dir {
            Some(dir) => dir.to_owned(),
            None => ModelStore::default_dir()?,
        };
        Ok(ModelStore::new(dir, self.offline))
    }
}

/// Load the engine, recognize the image, and print the text to standard
/// output.
#[instrument(level = "debug", skip_all, fields(path = %opts.image_path.display()))]
pub async fn cmd_extract(ui: &Ui, opts: &ExtractOpts) -> Result<()> {
    let config = opts.engine_config();
    let engine = ocr_engine_for_kind(ui, opts.engine, &config, || opts.model_store())
        .await
        .context("Failed to load OCR engine")?;
    extract(
        engine.as_ref(),
        &config,
        &opts.image_path,
        tokio::io::stdout(),
        opts.format,
        opts.min_confidence,
    )
    .await
}

/// Run `engine` on one image and write what it finds.
///
/// Nothing is written unless recognition succeeds.
async fn extract<W>(
    engine: &dyn OcrEngine,
    config: &EngineConfig,
    image_path: &Path,
    writer: W,
    format: OutputFormat,
    min_confidence: f32,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let results = engine
        .recognize(image_path, config.angle_classification)
        .await
        .with_context(|| format!("Failed to recognize text in {}", image_path.display()))?;
    if results.iter().all(ResultSet::is_empty) {
        info!("No text found");
    }
    write_results(writer, &results, format, min_confidence).await
}
