//! Frame interpolation strategies.
//!
//! An [`Interpolator`] synthesizes the frame located at `timestep` between two
//! known frames (`0.0` is the first frame, `1.0` the second). The default
//! strategy is a per-pixel linear blend; a learned model can be plugged in
//! through [`InterpolationStrategy::LearnedModel`]. Whatever the strategy, the
//! contract is the same: a pure function from two equally sized frames to a
//! frame of that size.

use std::path::Path;
use std::sync::Arc;

use ndarray::{Array3, Zip};
use tracing::{error, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// A frame synthesis strategy.
pub trait Interpolator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Synthesize the frame at `timestep` between `a` and `b`.
    fn interpolate(&self, a: &Frame, b: &Frame, timestep: f32) -> MediaResult<Frame>;
}

/// Check the inputs every strategy must reject.
pub fn validate_pair(a: &Frame, b: &Frame, timestep: f32) -> MediaResult<()> {
    if !(0.0..=1.0).contains(&timestep) {
        return Err(MediaError::interpolation_failed(format!(
            "timestep {} outside [0, 1]",
            timestep
        )));
    }
    if a.dimensions() != b.dimensions() {
        return Err(MediaError::interpolation_failed(format!(
            "frame sizes differ: {}x{} vs {}x{}",
            a.width(),
            a.height(),
            b.width(),
            b.height()
        )));
    }
    Ok(())
}

/// Per-pixel linear blend: `(1 - t) * a + t * b`, rounded and saturated.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBlend;

impl LinearBlend {
    pub fn new() -> Self {
        Self
    }
}

impl Interpolator for LinearBlend {
    fn name(&self) -> &str {
        "linear_blend"
    }

    fn interpolate(&self, a: &Frame, b: &Frame, timestep: f32) -> MediaResult<Frame> {
        validate_pair(a, b, timestep)?;

        let mut out = Array3::<u8>::zeros(a.array().dim());
        let keep = 1.0 - timestep;

        Zip::from(&mut out)
            .and(a.array())
            .and(b.array())
            .par_for_each(|o, &x, &y| {
                let v = keep * x as f32 + timestep * y as f32;
                *o = v.round().clamp(0.0, 255.0) as u8;
            });

        Frame::from_array(out)
    }
}

/// Result of interpolating one position within a frame pair.
#[derive(Debug, Clone)]
pub struct Interpolated {
    /// The synthesized frame
    pub frame: Frame,
    /// Why the linear blend was used instead of the configured model
    pub fallback_reason: Option<String>,
}

impl Interpolated {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Interpolation strategy, resolved once when the worker starts.
#[derive(Clone)]
pub enum InterpolationStrategy {
    /// Linear blend between the two frames
    LinearBlend(LinearBlend),
    /// A pluggable model; falls back to the blend per pair on error
    LearnedModel(Arc<dyn Interpolator>),
}

impl std::fmt::Debug for InterpolationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LinearBlend(_) => f.write_str("LinearBlend"),
            Self::LearnedModel(model) => write!(f, "LearnedModel({})", model.name()),
        }
    }
}

impl Default for InterpolationStrategy {
    fn default() -> Self {
        Self::LinearBlend(LinearBlend)
    }
}

impl InterpolationStrategy {
    /// Use a learned model.
    pub fn learned(model: Arc<dyn Interpolator>) -> Self {
        Self::LearnedModel(model)
    }

    /// Resolve the strategy from an optional model file.
    ///
    /// A missing file, a build without ONNX support, or a model that fails to
    /// load all resolve to the linear blend.
    pub fn from_model_path(model_path: Option<&Path>, use_gpu: bool) -> Self {
        let Some(path) = model_path else {
            info!("No interpolation model configured, using linear blend");
            return Self::default();
        };

        if !path.exists() {
            warn!(
                "Interpolation model not found at {}, using linear blend",
                path.display()
            );
            return Self::default();
        }

        match load_model(path, use_gpu) {
            Ok(model) => {
                info!(
                    "Loaded interpolation model '{}' from {}",
                    model.name(),
                    path.display()
                );
                Self::LearnedModel(model)
            }
            Err(e) => {
                error!(
                    "Failed to load interpolation model from {}: {}, using linear blend",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Name of the configured strategy.
    pub fn name(&self) -> &str {
        match self {
            Self::LinearBlend(blend) => blend.name(),
            Self::LearnedModel(model) => model.name(),
        }
    }

    /// Interpolate, falling back to the linear blend if the model fails.
    ///
    /// Errors only when the blend itself cannot run (mismatched frames or an
    /// invalid timestep).
    pub fn interpolate_or_blend(
        &self,
        a: &Frame,
        b: &Frame,
        timestep: f32,
    ) -> MediaResult<Interpolated> {
        match self {
            Self::LinearBlend(blend) => Ok(Interpolated {
                frame: blend.interpolate(a, b, timestep)?,
                fallback_reason: None,
            }),
            Self::LearnedModel(model) => match model.interpolate(a, b, timestep) {
                Ok(frame) if frame.dimensions() == a.dimensions() => Ok(Interpolated {
                    frame,
                    fallback_reason: None,
                }),
                Ok(frame) => {
                    let reason = format!(
                        "{} produced a {}x{} frame, expected {}x{}",
                        model.name(),
                        frame.width(),
                        frame.height(),
                        a.width(),
                        a.height()
                    );
                    warn!("{}, falling back to linear blend", reason);
                    Ok(Interpolated {
                        frame: LinearBlend.interpolate(a, b, timestep)?,
                        fallback_reason: Some(reason),
                    })
                }
                Err(e) => {
                    warn!(
                        "Interpolation with {} failed at t={:.3}: {}, falling back to linear blend",
                        model.name(),
                        timestep,
                        e
                    );
                    Ok(Interpolated {
                        frame: LinearBlend.interpolate(a, b, timestep)?,
                        fallback_reason: Some(e.to_string()),
                    })
                }
            },
        }
    }
}

#[cfg(feature = "onnx")]
fn load_model(path: &Path, use_gpu: bool) -> MediaResult<Arc<dyn Interpolator>> {
    let model = crate::onnx::OnnxInterpolator::load(path, use_gpu)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_model(path: &Path, _use_gpu: bool) -> MediaResult<Arc<dyn Interpolator>> {
    Err(MediaError::model_not_found(format!(
        "{} (built without the `onnx` feature)",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingModel;

    impl Interpolator for FailingModel {
        fn name(&self) -> &str {
            "failing"
        }

        fn interpolate(&self, _a: &Frame, _b: &Frame, _t: f32) -> MediaResult<Frame> {
            Err(MediaError::interpolation_failed("model exploded"))
        }
    }

    struct WrongSizeModel;

    impl Interpolator for WrongSizeModel {
        fn name(&self) -> &str {
            "wrong_size"
        }

        fn interpolate(&self, _a: &Frame, _b: &Frame, _t: f32) -> MediaResult<Frame> {
            Ok(Frame::new(1, 1))
        }
    }

    fn gradient(width: u32, height: u32, offset: u8) -> Frame {
        let mut frame = Frame::new(width, height);
        for ((y, x, c), v) in frame.array_mut().indexed_iter_mut() {
            *v = ((y * 31 + x * 7 + c * 3) as u8).wrapping_add(offset);
        }
        frame
    }

    #[test]
    fn test_blend_boundaries_are_idempotent() {
        let a = gradient(8, 4, 0);
        let b = gradient(8, 4, 100);

        assert_eq!(LinearBlend.interpolate(&a, &b, 0.0).unwrap(), a);
        assert_eq!(LinearBlend.interpolate(&a, &b, 1.0).unwrap(), b);
    }

    #[test]
    fn test_blend_midpoint_rounds() {
        let a = Frame::filled(2, 2, [0, 10, 255]);
        let b = Frame::filled(2, 2, [255, 11, 255]);

        let mid = LinearBlend.interpolate(&a, &b, 0.5).unwrap();
        // 127.5 and 10.5 round away from zero
        assert_eq!(mid.pixel(1, 1), Some([128, 11, 255]));

        let quarter = LinearBlend.interpolate(&a, &b, 0.25).unwrap();
        assert_eq!(quarter.pixel(0, 0), Some([64, 10, 255]));
    }

    #[test]
    fn test_blend_rejects_bad_input() {
        let a = Frame::new(4, 4);
        let b = Frame::new(4, 2);
        assert!(LinearBlend.interpolate(&a, &b, 0.5).is_err());
        assert!(LinearBlend.interpolate(&a, &a, 1.5).is_err());
        assert!(LinearBlend.interpolate(&a, &a, f32::NAN).is_err());
    }

    #[test]
    fn test_failing_model_falls_back_to_blend() {
        let strategy = InterpolationStrategy::learned(Arc::new(FailingModel));
        let a = Frame::filled(4, 4, [0, 0, 0]);
        let b = Frame::filled(4, 4, [200, 100, 50]);

        let result = strategy.interpolate_or_blend(&a, &b, 0.5).unwrap();
        assert!(result.is_fallback());
        assert_eq!(result.frame, LinearBlend.interpolate(&a, &b, 0.5).unwrap());
    }

    #[test]
    fn test_wrong_size_model_output_falls_back() {
        let strategy = InterpolationStrategy::learned(Arc::new(WrongSizeModel));
        let a = Frame::new(4, 4);

        let result = strategy.interpolate_or_blend(&a, &a, 0.5).unwrap();
        assert!(result.is_fallback());
        assert_eq!(result.frame.dimensions(), (4, 4));
    }

    #[test]
    fn test_missing_model_resolves_to_blend() {
        let strategy =
            InterpolationStrategy::from_model_path(Some(Path::new("/nonexistent/rife.onnx")), true);
        assert!(matches!(strategy, InterpolationStrategy::LinearBlend(_)));
        assert_eq!(strategy.name(), "linear_blend");

        let none = InterpolationStrategy::from_model_path(None, false);
        assert!(matches!(none, InterpolationStrategy::LinearBlend(_)));
    }
}
