//! 骨骼系统
//!
//! 核心设计思想：
//! - Dof: 单个可动画标量参数（弯曲角、扭转角、长度）
//! - Joint: 运动学树中的节点，持有局部坐标系和四个 DOF
//! - Skeleton: 按 ID 排序的关节集合，父子关系以 ID 引用
//! - IkSolver: 阻尼迭代雅可比 IK 求解器

mod dof;
mod ik_solver;
mod joint;
mod skeleton;

pub use dof::{Dof, DofFlags};
pub use ik_solver::{IkSolver, JointBehavior};
pub use joint::Joint;
pub use skeleton::Skeleton;

use glam::{DMat3, DVec3};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 关节坐标系
///
/// Z 轴沿骨骼方向（父关节指向本关节），Y 轴为"上"方向。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateFrame {
    pub origin: DVec3,
    pub rotation: DMat3,
}

impl Default for CoordinateFrame {
    fn default() -> Self {
        Self {
            origin: DVec3::ZERO,
            rotation: DMat3::IDENTITY,
        }
    }
}

impl CoordinateFrame {
    #[inline]
    pub fn new(origin: DVec3, rotation: DMat3) -> Self {
        Self { origin, rotation }
    }

    /// 由原点、Z 方向和上方向构造正交坐标系
    ///
    /// 上方向与 Z 方向平行时自动选取另一个参考轴。
    pub fn from_z_up(origin: DVec3, zdir: DVec3, updir: DVec3) -> Self {
        let z = zdir.try_normalize().unwrap_or(DVec3::Z);
        let reference = if updir.cross(z).length_squared() > 1e-12 {
            updir
        } else if z.x.abs() < 0.9 {
            DVec3::X
        } else {
            DVec3::Y
        };
        let x = reference.cross(z).normalize();
        let y = z.cross(x);
        Self {
            origin,
            rotation: DMat3::from_cols(x, y, z),
        }
    }

    /// Z 方向（骨骼方向）
    #[inline]
    pub fn z_dir(&self) -> DVec3 {
        self.rotation.z_axis
    }

    /// 上方向
    #[inline]
    pub fn up_dir(&self) -> DVec3 {
        self.rotation.y_axis
    }

    /// 局部坐标 -> 世界坐标
    #[inline]
    pub fn to_world(&self, p: DVec3) -> DVec3 {
        self.origin + self.rotation * p
    }

    /// 世界坐标 -> 局部坐标
    #[inline]
    pub fn to_local(&self, p: DVec3) -> DVec3 {
        self.rotation.transpose() * (p - self.origin)
    }
}

/// 关节的四种 DOF
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DofKind {
    /// 绕父坐标系 X 轴弯曲
    Angle1,
    /// 绕（弯曲后）Y 轴弯曲
    Angle2,
    /// 绕骨骼轴扭转
    Twist,
    /// 骨骼长度
    Length,
}

impl DofKind {
    pub const ALL: [DofKind; 4] = [DofKind::Angle1, DofKind::Angle2, DofKind::Twist, DofKind::Length];

    /// 是否为角度（单位为度）
    #[inline]
    pub fn is_angular(self) -> bool {
        !matches!(self, DofKind::Length)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            DofKind::Angle1 => 0,
            DofKind::Angle2 => 1,
            DofKind::Twist => 2,
            DofKind::Length => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let frame = CoordinateFrame::from_z_up(
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::new(0.0, 1.0, 1.0),
            DVec3::Y,
        );
        let p = DVec3::new(-0.5, 4.0, 2.0);
        let back = frame.to_world(frame.to_local(p));
        assert!((back - p).length() < 1e-12);

        // 正交且右手
        let r = frame.rotation;
        assert!((r.x_axis.cross(r.y_axis) - r.z_axis).length() < 1e-12);
        assert!((frame.z_dir().length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_up() {
        let frame = CoordinateFrame::from_z_up(DVec3::ZERO, DVec3::Y, DVec3::Y);
        assert!((frame.z_dir() - DVec3::Y).length() < 1e-12);
        assert!(frame.up_dir().dot(DVec3::Y).abs() < 1e-12);
    }
}
