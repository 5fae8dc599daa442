//! 动画轨道
//!
//! - PoseTrack: 按帧插值关键帧并设置 Actor 的姿势
//! - IkTrack: 每帧按关节约束求解骨骼

mod ik_track;
mod pose_track;

pub use ik_track::{ConstraintKind, IkTrack, JointConstraint};
pub use pose_track::{PoseTrack, Smoothing};
