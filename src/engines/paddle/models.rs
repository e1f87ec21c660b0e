//! Locating, and if necessary downloading, PaddleOCR model weights.
//!
//! Models live in a cache directory laid out as:
//!
//! ```text
//! <model dir>/det.onnx
//! <model dir>/cls.onnx
//! <model dir>/<family>/rec.onnx
//! <model dir>/<family>/dict.txt
//! ```
//!
//! where `<family>` is the recognizer shared by one or more languages. Files
//! placed there by hand are used as-is.

use futures::StreamExt as _;
use tokio::io::AsyncWriteExt as _;

use crate::{
    engines::Language,
    errors::OcrError,
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// ONNX exports of the PaddleOCR detection and recognition models.
const PADDLEOCR_ONNX_BASE: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main";

/// ONNX export of the PaddleOCR text-line angle classifier.
const CLASSIFIER_URL: &str = "https://www.modelscope.cn/models/RapidAI/RapidOCR/resolve/master/onnx/PP-OCRv4/cls/ch_ppocr_mobile_v2.0_cls_infer.onnx";

/// A single model file and where to fetch it from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelFile {
    /// Human-readable name, for progress bars and errors.
    pub name: &'static str,
    /// Location relative to the model directory.
    pub relative_path: PathBuf,
    pub url: String,
}

/// Every file the paddle engine needs for one language.
#[derive(Clone, Debug)]
pub struct ModelSet {
    pub detection: ModelFile,
    pub classification: ModelFile,
    pub recognition: ModelFile,
    pub dictionary: ModelFile,
}

impl ModelSet {
    pub fn for_language(language: Language) -> Self {
        let family = recognizer_family(language);
        Self {
            detection: ModelFile {
                name: "text detection model",
                relative_path: PathBuf::from("det.onnx"),
                url: format!("{PADDLEOCR_ONNX_BASE}/detection/v3/det.onnx"),
            },
            classification: ModelFile {
                name: "angle classifier",
                relative_path: PathBuf::from("cls.onnx"),
                url: CLASSIFIER_URL.to_owned(),
            },
            recognition: ModelFile {
                name: "text recognition model",
                relative_path: Path::new(family).join("rec.onnx"),
                url: format!("{PADDLEOCR_ONNX_BASE}/languages/{family}/rec.onnx"),
            },
            dictionary: ModelFile {
                name: "character dictionary",
                relative_path: Path::new(family).join("dict.txt"),
                url: format!("{PADDLEOCR_ONNX_BASE}/languages/{family}/dict.txt"),
            },
        }
    }
}

/// The recognizer that covers a language.
///
/// French and German use the Latin-script model, and Japanese is covered by
/// the Chinese model.
pub fn recognizer_family(language: Language) -> &'static str {
    match language {
        Language::En => "english",
        Language::Ch | Language::Japan => "chinese",
        Language::Fr | Language::German => "latin",
        Language::Korean => "korean",
    }
}

/// A directory of cached model files.
#[derive(Clone, Debug)]
pub struct ModelStore {
    dir: PathBuf,
    offline: bool,
}

impl ModelStore {
    /// Use `dir` for models. With `offline`, missing files are an error
    /// instead of a download.
    pub fn new(dir: PathBuf, offline: bool) -> Self {
        Self { dir, offline }
    }

    /// The per-user cache directory, e.g. `~/.cache/pp-ocr/models` on Linux.
    pub fn default_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "pp-ocr")
            .ok_or_else(|| anyhow!("cannot determine a cache directory; pass --model-dir"))?;
        Ok(dirs.cache_dir().join("models"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, model: &ModelFile) -> PathBuf {
        self.dir.join(&model.relative_path)
    }

    /// Return the local path of `model`, downloading it first if needed.
    #[instrument(level = "debug", skip_all, fields(model = model.name))]
    pub async fn ensure(&self, ui: &Ui, model: &ModelFile) -> Result<PathBuf> {
        let path = self.path_for(model);
        if is_present(&path).await {
            debug!(path = %path.display(), "Using cached model");
            return Ok(path);
        }
        if self.offline {
            return Err(OcrError::EngineInitialization(format!(
                "{} not found at {} (offline; download it from {})",
                model.name,
                path.display(),
                model.url
            ))
            .into());
        }
        download(ui, model, &path).await.map_err(|err| {
            OcrError::EngineInitialization(format!(
                "cannot download {} from {}: {err:#}",
                model.name, model.url
            ))
        })?;
        Ok(path)
    }
}

/// Is there a non-empty file at `path`?
async fn is_present(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Stream `model` to `<path>.part`, then move it into place.
async fn download(ui: &Ui, model: &ModelFile, path: &Path) -> Result<()> {
    info!(url = %model.url, "Downloading {}", model.name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    let response = reqwest::get(&model.url)
        .await
        .context("request failed")?
        .error_for_status()
        .context("server returned an error")?;

    let msg = format!("Downloading {}", model.name);
    let pb = ui.new_from_content_length(
        &ProgressConfig {
            emoji: "📦",
            msg: &msg,
            done_msg: "Downloaded model",
        },
        response.content_length(),
    );

    let part_path = path.with_extension("part");
    let mut file = tokio::fs::File::create(&part_path)
        .await
        .with_context(|| format!("cannot create {}", part_path.display()))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("download interrupted")?;
        file.write_all(&chunk)
            .await
            .with_context(|| format!("cannot write {}", part_path.display()))?;
        pb.inc(chunk.len() as u64);
    }
    file.flush()
        .await
        .with_context(|| format!("cannot flush {}", part_path.display()))?;
    drop(file);

    tokio::fs::rename(&part_path, path)
        .await
        .with_context(|| format!("cannot move download into {}", path.display()))?;
    pb.finish_using_style();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn languages_share_recognizers() {
        assert_eq!(recognizer_family(Language::En), "english");
        assert_eq!(recognizer_family(Language::Fr), "latin");
        assert_eq!(recognizer_family(Language::German), "latin");
        assert_eq!(recognizer_family(Language::Japan), "chinese");
        assert_eq!(recognizer_family(Language::Ch), "chinese");
        assert_eq!(recognizer_family(Language::Korean), "korean");
    }

    #[test]
    fn detection_is_shared_across_languages() {
        let en = ModelSet::for_language(Language::En);
        let ko = ModelSet::for_language(Language::Korean);
        assert_eq!(en.detection, ko.detection);
        assert_ne!(en.recognition, ko.recognition);
        assert_eq!(ko.dictionary.relative_path, Path::new("korean/dict.txt"));
        assert!(ko.recognition.url.ends_with("/languages/korean/rec.onnx"));
    }

    #[tokio::test]
    async fn cached_files_are_used_without_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let models = ModelSet::for_language(Language::En);
        let store = ModelStore::new(dir.path().to_owned(), true);
        let path = store.path_for(&models.dictionary);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "a\nb\n").unwrap();

        let found = store
            .ensure(&Ui::init_for_tests(), &models.dictionary)
            .await
            .unwrap();
        assert_eq!(found, path);
    }

    #[tokio::test]
    async fn offline_and_missing_is_an_initialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let models = ModelSet::for_language(Language::En);
        let store = ModelStore::new(dir.path().to_owned(), true);

        let err = store
            .ensure(&Ui::init_for_tests(), &models.detection)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OcrError>(),
            Some(OcrError::EngineInitialization(_))
        ));
        assert!(err.to_string().contains("det.onnx"));
    }

    #[tokio::test]
    async fn empty_files_count_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let models = ModelSet::for_language(Language::En);
        let store = ModelStore::new(dir.path().to_owned(), true);
        std::fs::write(store.path_for(&models.detection), "").unwrap();

        assert!(
            store
                .ensure(&Ui::init_for_tests(), &models.detection)
                .await
                .is_err()
        );
    }
}
