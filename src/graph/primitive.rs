//! Motion primitives attached to graph nodes
//!
//! A primitive is either a single fixed clip or a morphable set of
//! equal-length example clips. Sampling draws blend weights and
//! back-projection turns them into frames.

use crate::animation::frame::{self, Frame, MotionClip};
use crate::error::{MotionError, MotionResult};
use crate::utils::math::{blend_quats, write_quat};
use glam::{Quat, Vec3};
use rand::Rng;

/// Blend weights over the examples of a primitive, summing to one
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSample {
    pub weights: Vec<f32>,
}

impl MotionSample {
    pub fn uniform(n: usize) -> Self {
        let n = n.max(1);
        Self {
            weights: vec![1.0 / n as f32; n],
        }
    }
}

#[derive(Debug, Clone)]
pub enum MotionPrimitive {
    Static(MotionClip),
    Morphable { examples: Vec<MotionClip> },
}

impl MotionPrimitive {
    /// Build a morphable primitive; examples must share length and frame time
    pub fn morphable(examples: Vec<MotionClip>) -> MotionResult<Self> {
        let Some(first) = examples.first() else {
            return Err(MotionError::GraphDescription {
                reason: "morphable primitive needs at least one example".to_string(),
            });
        };
        if first.is_empty() {
            return Err(MotionError::GraphDescription {
                reason: "morphable primitive example is empty".to_string(),
            });
        }
        let (n_frames, frame_len) = (first.n_frames(), first.frames()[0].len());
        for example in &examples {
            if example.n_frames() != n_frames {
                return Err(MotionError::GraphDescription {
                    reason: format!(
                        "example clips differ in length ({} vs {})",
                        example.n_frames(),
                        n_frames
                    ),
                });
            }
            if let Some(bad) = example.frames().iter().find(|f| f.len() != frame_len) {
                return Err(MotionError::FrameLength {
                    expected: frame_len,
                    actual: bad.len(),
                });
            }
        }
        Ok(MotionPrimitive::Morphable { examples })
    }

    pub fn n_examples(&self) -> usize {
        match self {
            MotionPrimitive::Static(_) => 1,
            MotionPrimitive::Morphable { examples } => examples.len(),
        }
    }

    fn reference_clip(&self) -> &MotionClip {
        match self {
            MotionPrimitive::Static(clip) => clip,
            MotionPrimitive::Morphable { examples } => &examples[0],
        }
    }

    pub fn n_frames(&self) -> usize {
        self.reference_clip().n_frames()
    }

    pub fn frame_time(&self) -> f32 {
        self.reference_clip().frame_time()
    }

    pub fn frame_len(&self) -> usize {
        self.reference_clip().frames().first().map_or(0, Vec::len)
    }

    pub fn is_static(&self) -> bool {
        matches!(self, MotionPrimitive::Static(_))
    }

    /// Draw random blend weights
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> MotionSample {
        let n = self.n_examples();
        if n == 1 {
            return MotionSample { weights: vec![1.0] };
        }
        let raw: Vec<f32> = (0..n).map(|_| rng.random::<f32>() + 1e-3).collect();
        let total: f32 = raw.iter().sum();
        MotionSample {
            weights: raw.into_iter().map(|w| w / total).collect(),
        }
    }

    fn check_sample(&self, sample: &MotionSample) -> MotionResult<()> {
        if sample.weights.len() != self.n_examples() {
            return Err(MotionError::Other {
                reason: format!(
                    "sample has {} weights, primitive has {} examples",
                    sample.weights.len(),
                    self.n_examples()
                ),
            });
        }
        Ok(())
    }

    /// Blend a single frame of the examples
    pub fn back_project_frame(&self, sample: &MotionSample, frame_idx: usize) -> MotionResult<Frame> {
        self.check_sample(sample)?;
        let idx = frame_idx.min(self.n_frames().saturating_sub(1));
        match self {
            MotionPrimitive::Static(clip) => Ok(clip.frames()[idx].clone()),
            MotionPrimitive::Morphable { examples } => {
                let frames: Vec<&Frame> = examples.iter().map(|e| &e.frames()[idx]).collect();
                Ok(blend_frames(&frames, &sample.weights))
            }
        }
    }

    /// Blend the examples into a full clip
    pub fn back_project(&self, sample: &MotionSample) -> MotionResult<MotionClip> {
        self.check_sample(sample)?;
        match self {
            MotionPrimitive::Static(clip) => Ok(clip.clone()),
            MotionPrimitive::Morphable { examples } => {
                let frames = (0..self.n_frames())
                    .map(|idx| {
                        let frames: Vec<&Frame> = examples.iter().map(|e| &e.frames()[idx]).collect();
                        blend_frames(&frames, &sample.weights)
                    })
                    .collect();
                Ok(MotionClip::new(frames, self.frame_time()))
            }
        }
    }

    pub fn back_project_mean(&self) -> MotionResult<MotionClip> {
        self.back_project(&MotionSample::uniform(self.n_examples()))
    }
}

/// Weighted blend: linear for the root position, normalized quaternion average elsewhere
fn blend_frames(frames: &[&Frame], weights: &[f32]) -> Frame {
    let len = frames[0].len();
    let mut out = vec![0.0; len];
    let root = frames
        .iter()
        .zip(weights)
        .fold(Vec3::ZERO, |acc, (f, w)| acc + frame::root_position(f) * *w);
    frame::set_root_position(&mut out, root);
    for offset in frame::quaternion_offsets(len) {
        let quats: Vec<Quat> = frames
            .iter()
            .map(|f| crate::utils::math::quat_at(f, offset))
            .collect();
        write_quat(&mut out, offset, blend_quats(&quats, weights));
    }
    out
}
