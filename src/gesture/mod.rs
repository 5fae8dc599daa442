//! 手势与关键帧
//!
//! - Gesture: 可存储、可混合的姿势（骨骼 + 表面）
//! - Keyframe: 轨道上可插值的关键帧
//! - MeshGesture: 网格对象的手势
//! - Actor: 管理一组命名手势，按权重组合出姿势，或从骨骼反推权重

mod actor;
mod actor_keyframe;
mod mesh_gesture;

pub use actor::Actor;
pub use actor_keyframe::ActorKeyframe;
pub use mesh_gesture::{MeshGesture, VertexBinding};

use std::fmt::Debug;

use crate::mesh::ParameterValue;
use crate::skeleton::Skeleton;

/// 可存储、可混合的姿势
///
/// 目前唯一的实现是 `MeshGesture`，`Actor` 直接存储它。
/// 其他可变形对象需要自己的手势类型时实现此 trait。
pub trait Gesture: Clone + Debug {
    fn skeleton(&self) -> &Skeleton;

    fn set_skeleton(&mut self, skeleton: Skeleton);

    /// 以自身为基准的加权混合：`self + Σ w_i * (g_i - self)`
    fn blend(&self, gestures: &[&Self], weights: &[f64]) -> Self;

    /// 第 `index` 个纹理参数值
    fn texture_parameter(&self, index: usize) -> Option<&ParameterValue>;

    fn set_texture_parameter(&mut self, index: usize, value: ParameterValue);

    fn equals(&self, other: &Self) -> bool;
}

/// 轨道关键帧
pub trait Keyframe: Clone + Debug {
    /// 可在曲线编辑器中显示的数值
    fn graph_values(&self) -> Vec<f64>;

    fn set_graph_values(&mut self, values: &[f64]);

    /// 混合 2 到 4 个关键帧
    ///
    /// `weights[0]` 属于自身，其余依次属于 `others`。
    fn blend(&self, others: &[&Self], weights: &[f64]) -> Self;

    fn equals(&self, other: &Self) -> bool;
}
