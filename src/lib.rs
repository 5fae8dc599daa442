//! Pose Engine - 骨骼动画与反向运动学运行时
//!
//! 提供：
//! - 关节自由度（DOF）模型与骨骼层次结构
//! - 基于雅可比矩阵的迭代 IK 求解器
//! - 手势（Gesture）存储与加权混合
//! - 从外部变形的骨骼反推手势权重（姿势重建）
//! - 姿势轨道与 IK 轨道
//!
//! 所有对象均为单线程同步使用；同一个 Skeleton 不可同时被两个求解器修改
//! （IkSolver 持有 `&mut Skeleton`，借用检查器保证这一点）。

pub mod animation;
pub mod config;
pub mod gesture;
pub mod linalg;
pub mod mesh;
pub mod persist;
pub mod skeleton;

pub use animation::{ConstraintKind, IkTrack, JointConstraint, PoseTrack, Smoothing};
pub use config::SolverConfig;
pub use gesture::{Actor, ActorKeyframe, Gesture, Keyframe, MeshGesture};
pub use mesh::{Mesh, MeshVertex, ParameterValue, SkinnedMesh};
pub use skeleton::{CoordinateFrame, Dof, DofKind, IkSolver, Joint, JointBehavior, Skeleton};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported {kind} format version: {version}")]
    UnsupportedVersion { kind: &'static str, version: i16 },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Unknown keyframe type: {0}")]
    UnknownType(String),

    #[error("Joint not found: {0}")]
    JointNotFound(i32),
}

pub type Result<T> = std::result::Result<T, PoseError>;
