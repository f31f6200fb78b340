//! Playable motion states
//!
//! Every segment the state machine plays implements [`MotionStateInterface`]:
//! clips sampled from the graph ([`MotionState`]) and the synthetic idle
//! used when the planner does not deliver in time ([`HoldPoseState`]).

use crate::animation::frame::{self, Frame, MotionClip};
use crate::error::{MotionError, MotionResult};
use glam::{Quat, Vec3};
use std::fmt;

pub trait MotionStateInterface: Send + fmt::Debug {
    /// Advance playback; `true` when the state reached its transition point
    fn update(&mut self, dt: f32) -> bool;

    /// Pose at `frame_idx`, or at the playback cursor when `None`
    fn get_pose(&self, frame_idx: Option<usize>) -> Frame;

    /// Translate the state so that the current pose has its root at `position`
    fn set_position(&mut self, position: Vec3);

    /// Rotate the state so that the current pose has root orientation `orientation`
    fn set_orientation(&mut self, orientation: Quat);

    fn frames(&self) -> &[Frame];

    fn n_frames(&self) -> usize {
        self.frames().len()
    }

    fn frame_time(&self) -> f32;

    fn current_frame_idx(&self) -> usize;

    fn is_paused(&self) -> bool;

    fn unpause(&mut self);

    fn set_play(&mut self, play: bool);
}

/// Shift every frame so the anchor frame's root lands on `position`
fn translate_frames(frames: &mut [Frame], anchor: usize, position: Vec3) {
    let Some(anchor_frame) = frames.get(anchor) else {
        return;
    };
    let delta = position - frame::root_position(anchor_frame);
    for f in frames.iter_mut() {
        let p = frame::root_position(f);
        frame::set_root_position(f, p + delta);
    }
}

/// Rotate every frame about the anchor root so the anchor frame ends up with `orientation`
fn rotate_frames(frames: &mut [Frame], anchor: usize, orientation: Quat) {
    let Some(anchor_frame) = frames.get(anchor) else {
        return;
    };
    let pivot = frame::root_position(anchor_frame);
    let delta = orientation.normalize() * frame::root_orientation(anchor_frame).inverse();
    for f in frames.iter_mut() {
        let p = frame::root_position(f);
        frame::set_root_position(f, pivot + delta * (p - pivot));
        let q = frame::root_orientation(f);
        frame::set_root_orientation(f, delta * q);
    }
    // the anchor is written exactly to avoid drift from the product above
    frame::set_root_orientation(&mut frames[anchor], orientation);
}

/// A clip from the motion graph with a play cursor and optional hold frames
#[derive(Debug, Clone)]
pub struct MotionState {
    clip: MotionClip,
    time: f32,
    frame_idx: usize,
    /// Frames at which playback pauses, ascending
    hold_frames: Vec<usize>,
    /// Playback speed multiplier (`velocityFactor`)
    speed: f32,
    play: bool,
    paused: bool,
    hold_last_frame: bool,
}

impl MotionState {
    pub fn new(clip: MotionClip) -> MotionResult<Self> {
        if clip.is_empty() {
            return Err(MotionError::Other {
                reason: "cannot play an empty motion clip".to_string(),
            });
        }
        Ok(Self {
            clip,
            time: 0.0,
            frame_idx: 0,
            hold_frames: Vec::new(),
            speed: 1.0,
            play: true,
            paused: false,
            hold_last_frame: false,
        })
    }

    pub fn with_hold_frames(mut self, mut hold_frames: Vec<usize>) -> Self {
        hold_frames.sort_unstable();
        hold_frames.dedup();
        self.hold_frames = hold_frames;
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed.max(0.0);
        self
    }

    pub fn set_hold_last_frame(&mut self, hold: bool) {
        self.hold_last_frame = hold;
    }

    pub fn clip(&self) -> &MotionClip {
        &self.clip
    }

    pub fn hold_frames(&self) -> &[usize] {
        &self.hold_frames
    }
}

impl MotionStateInterface for MotionState {
    fn update(&mut self, dt: f32) -> bool {
        if !self.play || self.paused {
            return false;
        }
        let frame_time = self.clip.frame_time().max(f32::EPSILON);
        self.time += dt * self.speed;
        self.frame_idx = (self.time / frame_time) as usize;

        if let Some(&hold) = self.hold_frames.first() {
            if self.frame_idx >= hold {
                self.frame_idx = hold.min(self.clip.n_frames() - 1);
                self.time = self.frame_idx as f32 * frame_time;
                self.paused = true;
                self.hold_frames.remove(0);
                return false;
            }
        }

        if self.frame_idx >= self.clip.n_frames() {
            if self.hold_last_frame {
                self.frame_idx = self.clip.n_frames() - 1;
                self.paused = true;
                return false;
            }
            self.time = 0.0;
            self.frame_idx = 0;
            return true;
        }
        false
    }

    fn get_pose(&self, frame_idx: Option<usize>) -> Frame {
        let idx = frame_idx.unwrap_or(self.frame_idx).min(self.clip.n_frames() - 1);
        self.clip.frames()[idx].clone()
    }

    fn set_position(&mut self, position: Vec3) {
        let anchor = self.frame_idx.min(self.clip.n_frames() - 1);
        translate_frames(self.clip.frames_mut(), anchor, position);
    }

    fn set_orientation(&mut self, orientation: Quat) {
        let anchor = self.frame_idx.min(self.clip.n_frames() - 1);
        rotate_frames(self.clip.frames_mut(), anchor, orientation);
    }

    fn frames(&self) -> &[Frame] {
        self.clip.frames()
    }

    fn frame_time(&self) -> f32 {
        self.clip.frame_time()
    }

    fn current_frame_idx(&self) -> usize {
        self.frame_idx
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn unpause(&mut self) {
        self.hold_last_frame = false;
        self.paused = false;
    }

    fn set_play(&mut self, play: bool) {
        self.play = play;
    }
}

/// Synthetic idle that holds one pose for a fixed duration
#[derive(Debug, Clone)]
pub struct HoldPoseState {
    pose: Vec<Frame>,
    frame_time: f32,
    duration: f32,
    elapsed: f32,
    play: bool,
}

impl HoldPoseState {
    pub fn new(pose: Frame, frame_time: f32, duration: f32) -> Self {
        Self {
            pose: vec![pose],
            frame_time,
            duration: duration.max(frame_time),
            elapsed: 0.0,
            play: true,
        }
    }
}

impl MotionStateInterface for HoldPoseState {
    fn update(&mut self, dt: f32) -> bool {
        if !self.play {
            return false;
        }
        self.elapsed += dt;
        if self.elapsed >= self.duration {
            self.elapsed = 0.0;
            return true;
        }
        false
    }

    fn get_pose(&self, _frame_idx: Option<usize>) -> Frame {
        self.pose[0].clone()
    }

    fn set_position(&mut self, position: Vec3) {
        translate_frames(&mut self.pose, 0, position);
    }

    fn set_orientation(&mut self, orientation: Quat) {
        rotate_frames(&mut self.pose, 0, orientation);
    }

    fn frames(&self) -> &[Frame] {
        &self.pose
    }

    fn frame_time(&self) -> f32 {
        self.frame_time
    }

    fn current_frame_idx(&self) -> usize {
        0
    }

    fn is_paused(&self) -> bool {
        false
    }

    fn unpause(&mut self) {}

    fn set_play(&mut self, play: bool) {
        self.play = play;
    }
}
