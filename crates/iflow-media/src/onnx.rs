//! ONNX Runtime-backed learned interpolation (RIFE-style models).
//!
//! Expected model signature:
//! - `img0`, `img1`: `(1, 3, H, W)` RGB, f32 in [0, 1]
//! - `timestep`: `(1, 1, H, W)` filled with t
//! - first output: `(1, 3, H, W)` RGB, f32 in [0, 1]
//!
//! Frames arrive as BGR; channels are swapped on the way in and out.

use std::path::Path;
use std::sync::Mutex;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::frame::{Frame, CHANNELS};
use crate::interpolate::{validate_pair, Interpolator};

/// Learned interpolation model loaded through ONNX Runtime.
pub struct OnnxInterpolator {
    session: Mutex<Session>,
    name: String,
}

impl OnnxInterpolator {
    /// Load a model from disk.
    pub fn load(model_path: &Path, use_gpu: bool) -> MediaResult<Self> {
        if !model_path.exists() {
            return Err(MediaError::model_not_found(model_path.display().to_string()));
        }

        let session = create_session(model_path, use_gpu)?;
        let name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        Ok(Self {
            session: Mutex::new(session),
            name,
        })
    }
}

impl Interpolator for OnnxInterpolator {
    fn name(&self) -> &str {
        &self.name
    }

    fn interpolate(&self, a: &Frame, b: &Frame, timestep: f32) -> MediaResult<Frame> {
        validate_pair(a, b, timestep)?;
        let (width, height) = a.dimensions();

        let img0 = frame_to_chw_tensor(a)?;
        let img1 = frame_to_chw_tensor(b)?;
        let plane = vec![timestep; width as usize * height as usize];
        let ts = Tensor::from_array((
            vec![1usize, 1, height as usize, width as usize],
            plane.into_boxed_slice(),
        ))
        .map(Value::from)
        .map_err(|e| MediaError::interpolation_failed(format!("ORT tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::interpolation_failed("ORT session poisoned"))?;

        let outputs = session
            .run(ort::inputs!["img0" => img0, "img1" => img1, "timestep" => ts])
            .map_err(|e| MediaError::interpolation_failed(format!("ORT run failed: {e}")))?;

        if outputs.len() == 0 {
            return Err(MediaError::interpolation_failed("ORT returned no outputs"));
        }

        chw_output_to_frame(&outputs[0], width, height)
    }
}

/// Create an ONNX Runtime session, preferring CUDA when requested and built in.
fn create_session(model_path: &Path, use_gpu: bool) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(feature = "cuda")]
    if use_gpu {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for interpolation");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, using CPU");
    }

    #[cfg(not(feature = "cuda"))]
    if use_gpu {
        debug!("Built without the `cuda` feature, using CPU for interpolation");
    }

    info!("Using CPU execution provider for interpolation");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}

/// BGR HWC u8 -> RGB CHW f32 in [0, 1].
fn frame_to_chw_tensor(frame: &Frame) -> MediaResult<Value> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let data = frame.as_bytes()?;

    let mut chw = Vec::with_capacity(w * h * CHANNELS);
    for c in 0..CHANNELS {
        let src_c = CHANNELS - 1 - c;
        for y in 0..h {
            for x in 0..w {
                chw.push(data[(y * w + x) * CHANNELS + src_c] as f32 / 255.0);
            }
        }
    }

    Tensor::from_array((vec![1usize, CHANNELS, h, w], chw.into_boxed_slice()))
        .map(Value::from)
        .map_err(|e| MediaError::interpolation_failed(format!("ORT tensor: {e}")))
}

/// RGB CHW f32 -> BGR HWC u8.
fn chw_output_to_frame(output: &Value, width: u32, height: u32) -> MediaResult<Frame> {
    let (shape, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| MediaError::interpolation_failed(format!("ORT extract: {e}")))?;

    let (w, h) = (width as usize, height as usize);
    let plane = w * h;
    if data.len() != plane * CHANNELS {
        return Err(MediaError::interpolation_failed(format!(
            "model output shape {:?} does not match {}x{}",
            shape, width, height
        )));
    }

    let mut bytes = vec![0u8; plane * CHANNELS];
    for c in 0..CHANNELS {
        let dst_c = CHANNELS - 1 - c;
        for i in 0..plane {
            let v = (data[c * plane + i] * 255.0).round().clamp(0.0, 255.0);
            bytes[i * CHANNELS + dst_c] = v as u8;
        }
    }

    Frame::from_raw(width, height, bytes)
}
