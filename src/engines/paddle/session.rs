//! Thin wrapper around an ONNX Runtime session.

use std::sync::Mutex;

use ndarray::{Array4, ArrayD, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch},
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};

use crate::{errors::OcrError, prelude::*};

/// One loaded model with a single input and a single `f32` output.
pub struct OnnxModel {
    /// Human-readable model name, for logs and errors.
    name: &'static str,
    /// `Session::run` needs `&mut`, and we share the model behind an `Arc`.
    session: Mutex<Session>,
    input_name: String,
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel")
            .field("name", &self.name)
            .field("input_name", &self.input_name)
            .finish_non_exhaustive()
    }
}

impl OnnxModel {
    /// Load a model from disk.
    ///
    /// With `use_accelerator`, CUDA is tried before the CPU. ONNX Runtime
    /// falls back to the next provider if CUDA cannot be registered.
    #[instrument(level = "debug", skip(path), fields(path = %path.display()))]
    pub fn load(name: &'static str, path: &Path, use_accelerator: bool) -> Result<Self> {
        let session = Session::builder()
            .and_then(|b| b.with_execution_providers(execution_providers(use_accelerator)))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|err| {
                OcrError::EngineInitialization(format!(
                    "cannot load {name} model from {}: {err}",
                    path.display()
                ))
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| {
                OcrError::EngineInitialization(format!("{name} model has no inputs"))
            })?;
        debug!(model = name, input = %input_name, "Loaded ONNX model");

        Ok(Self {
            name,
            session: Mutex::new(session),
            input_name,
        })
    }

    /// Run the model on an NCHW tensor and return its first output.
    pub fn run(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let runtime_err =
            |err: &dyn std::fmt::Display| OcrError::EngineRuntime(format!("{}: {err}", self.name));

        let tensor = TensorRef::from_array_view(input.view()).map_err(|e| runtime_err(&e))?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| runtime_err(&"session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| runtime_err(&e))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| runtime_err(&e))?;

        let dims = shape.iter().map(|&d| d.max(0) as usize).collect::<Vec<_>>();
        let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| runtime_err(&e))?;
        trace!(model = self.name, shape = ?dims, "Model output");
        Ok(array)
    }
}

/// Execution providers, in order of preference.
fn execution_providers(use_accelerator: bool) -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();
    if use_accelerator {
        #[cfg(feature = "cuda")]
        providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());
        #[cfg(not(feature = "cuda"))]
        warn!("built without the `cuda` feature; running on the CPU");
    }
    providers.push(CPUExecutionProvider::default().build());
    providers
}
