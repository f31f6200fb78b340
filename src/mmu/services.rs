//! Services the reach MMU consumes from the co-simulation

use crate::error::{MotionError, MotionResult};
use crate::mmu::conversion;
use crate::mmu::types::{AvatarPosture, AvatarPostureValues, Transform};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Read access to scene objects by id
pub trait SceneAccess: Send + Sync {
    fn get_transform_by_id(&self, id: &str) -> Option<Transform>;
}

/// Scene access backed by a map, used by the binary and in tests
#[derive(Debug, Default)]
pub struct InMemoryScene {
    transforms: RwLock<HashMap<String, Transform>>,
}

impl InMemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform(self, transform: Transform) -> Self {
        self.insert(transform);
        self
    }

    pub fn insert(&self, transform: Transform) {
        let mut transforms = self.transforms.write().unwrap_or_else(PoisonError::into_inner);
        transforms.insert(transform.id.clone(), transform);
    }

    pub fn remove(&self, id: &str) -> Option<Transform> {
        self.transforms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

impl SceneAccess for InMemoryScene {
    fn get_transform_by_id(&self, id: &str) -> Option<Transform> {
        self.transforms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

/// Maps between the avatar's own posture and the intermediate skeleton
pub trait RetargetingService: Send + Sync {
    /// Register the avatar's zero posture; returns the posture actually used
    fn setup_retargeting(&self, zero_posture: &AvatarPosture) -> MotionResult<AvatarPosture>;

    fn retarget_to_target(&self, values: &AvatarPostureValues) -> MotionResult<AvatarPosture>;

    fn retarget_to_intermediate(&self, posture: &AvatarPosture) -> MotionResult<AvatarPostureValues>;
}

/// Identity retargeting: the avatar already uses the intermediate skeleton
#[derive(Debug, Default)]
pub struct DirectRetargeting {
    zero_posture: RwLock<Option<AvatarPosture>>,
}

impl DirectRetargeting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set_up(&self) -> bool {
        self.zero_posture
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl RetargetingService for DirectRetargeting {
    fn setup_retargeting(&self, zero_posture: &AvatarPosture) -> MotionResult<AvatarPosture> {
        if zero_posture.joints.is_empty() {
            return Err(MotionError::Retargeting {
                reason: format!("zero posture of {} has no joints", zero_posture.avatar_id),
            });
        }
        debug!(
            "Retargeting set up for {} with {} joints",
            zero_posture.avatar_id,
            zero_posture.joints.len()
        );
        *self.zero_posture.write().unwrap_or_else(PoisonError::into_inner) = Some(zero_posture.clone());
        Ok(zero_posture.clone())
    }

    fn retarget_to_target(&self, values: &AvatarPostureValues) -> MotionResult<AvatarPosture> {
        let guard = self.zero_posture.read().unwrap_or_else(PoisonError::into_inner);
        let zero = guard.as_ref().ok_or_else(|| MotionError::Retargeting {
            reason: "retargeting was not set up".to_string(),
        })?;
        conversion::values_to_posture(values, zero)
    }

    fn retarget_to_intermediate(&self, posture: &AvatarPosture) -> MotionResult<AvatarPostureValues> {
        if !self.is_set_up() {
            return Err(MotionError::Retargeting {
                reason: "retargeting was not set up".to_string(),
            });
        }
        Ok(conversion::posture_to_values(posture))
    }
}
