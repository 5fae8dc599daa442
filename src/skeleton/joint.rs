//! 关节 - 骨骼层次中的单个节点
//!
//! 变换约定（父坐标系为 `(o_p, R_p)`）：
//! - `R_j = R_p * Rx(angle1) * Ry(angle2) * Rz(twist)`
//! - `o_j = o_p + R_j * (0, 0, length)`
//!
//! 根关节没有父坐标系，四个 DOF 全部锁定，坐标系直接给定。

use std::io::{Read, Write};

use glam::{DMat3, DVec3};

use crate::persist::{
    read_i32, read_mat3, read_string, read_vec3, read_version, write_i32, write_mat3,
    write_string, write_vec3, write_version,
};
use crate::Result;

use super::{CoordinateFrame, Dof, DofKind};

/// 骨骼长度过短时视为退化，保留原角度
const MIN_BONE_LENGTH: f64 = 1e-12;

/// 关节
///
/// 父子关系以 ID 保存，由所属 Skeleton 解析；
/// `children` 与 `parent` 互相一致由 Skeleton 维护。
#[derive(Clone, Debug, PartialEq)]
pub struct Joint {
    /// 关节 ID（加入 Skeleton 前为 -1）
    pub(crate) id: i32,
    /// 名称
    pub name: String,
    /// 世界坐标系
    pub frame: CoordinateFrame,
    /// 绕父 X 轴弯曲
    pub angle1: Dof,
    /// 绕 Y 轴弯曲
    pub angle2: Dof,
    /// 扭转
    pub twist: Dof,
    /// 到父关节的长度
    pub length: Dof,
    /// 父关节 ID
    pub(crate) parent: Option<i32>,
    /// 子关节 ID
    pub(crate) children: Vec<i32>,
}

impl Joint {
    const VERSION: i16 = 0;

    /// 创建新关节
    ///
    /// 角度 DOF 为 [-180, 180) 循环，长度 DOF 默认锁定。
    pub fn new(frame: CoordinateFrame, name: impl Into<String>) -> Self {
        let mut length = Dof::new(0.0, f64::MAX, 0.0);
        length.fixed = true;
        Self {
            id: -1,
            name: name.into(),
            frame,
            angle1: Dof::looping_angle(-180.0, 0.0),
            angle2: Dof::looping_angle(-180.0, 0.0),
            twist: Dof::looping_angle(-180.0, 0.0),
            length,
            parent: None,
            children: Vec::new(),
        }
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[inline]
    pub fn parent_id(&self) -> Option<i32> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[i32] {
        &self.children
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// 世界位置
    #[inline]
    pub fn position(&self) -> DVec3 {
        self.frame.origin
    }

    pub fn dof(&self, kind: DofKind) -> &Dof {
        match kind {
            DofKind::Angle1 => &self.angle1,
            DofKind::Angle2 => &self.angle2,
            DofKind::Twist => &self.twist,
            DofKind::Length => &self.length,
        }
    }

    pub fn dof_mut(&mut self, kind: DofKind) -> &mut Dof {
        match kind {
            DofKind::Angle1 => &mut self.angle1,
            DofKind::Angle2 => &mut self.angle2,
            DofKind::Twist => &mut self.twist,
            DofKind::Length => &mut self.length,
        }
    }

    /// 锁定全部 DOF（根关节）
    pub(crate) fn fix_all(&mut self) {
        for kind in DofKind::ALL {
            self.dof_mut(kind).fixed = true;
        }
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 弯曲部分 `Rx(angle1) * Ry(angle2)`
    #[inline]
    pub(crate) fn bend_rotation(&self) -> DMat3 {
        DMat3::from_rotation_x(self.angle1.pos.to_radians())
            * DMat3::from_rotation_y(self.angle2.pos.to_radians())
    }

    /// 相对父坐标系的旋转 `Rx * Ry * Rz`
    #[inline]
    pub fn local_rotation(&self) -> DMat3 {
        self.bend_rotation() * DMat3::from_rotation_z(self.twist.pos.to_radians())
    }

    /// 由父坐标系和 DOF 计算本关节坐标系（根关节不变）
    pub fn recalc_coords(&mut self, parent: Option<&CoordinateFrame>) {
        let Some(parent) = parent else {
            return;
        };
        let rotation = parent.rotation * self.local_rotation();
        let origin = parent.origin + rotation * DVec3::new(0.0, 0.0, self.length.pos);
        self.frame = CoordinateFrame::new(origin, rotation);
    }

    /// 由父坐标系和本关节当前坐标系反推 DOF
    ///
    /// 骨骼方向决定 angle1/angle2，绕骨骼的剩余旋转决定 twist，
    /// 距离决定 length。骨骼退化（长度为 0）时用本关节 Z 轴作为方向。
    pub fn recalc_parameters(&mut self, parent: Option<&CoordinateFrame>) {
        let Some(parent) = parent else {
            return;
        };
        let offset = parent.to_local(self.frame.origin);
        let length = offset.length();
        let dir = if length > MIN_BONE_LENGTH {
            offset / length
        } else {
            parent.rotation.transpose() * self.frame.z_dir()
        };

        // Rx(a) * Ry(b) * Z = (sin b, -sin a cos b, cos a cos b)
        let a2 = dir.x.clamp(-1.0, 1.0).asin();
        let a1 = (-dir.y).atan2(dir.z);
        self.angle1.set(a1.to_degrees());
        self.angle2.set(a2.to_degrees());
        self.length.set(length);

        // 剩余部分应为绕 Z 轴的纯旋转
        let residual =
            self.bend_rotation().transpose() * parent.rotation.transpose() * self.frame.rotation;
        let twist = residual.x_axis.y.atan2(residual.x_axis.x);
        self.twist.set(twist.to_degrees());
    }

    // ========================================
    // 持久化
    // ========================================

    /// 写入（不含子关节列表，读取后由 Skeleton 重建）
    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        write_version(out, Self::VERSION)?;
        write_i32(out, self.id)?;
        write_string(out, &self.name)?;
        write_vec3(out, self.frame.origin)?;
        write_mat3(out, &self.frame.rotation)?;
        write_i32(out, self.parent.unwrap_or(-1))?;
        for kind in DofKind::ALL {
            self.dof(kind).write(out)?;
        }
        Ok(())
    }

    /// 读取
    pub fn read<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        read_version(input, "Joint", 0..=Self::VERSION)?;
        let id = read_i32(input)?;
        let name = read_string(input)?;
        let origin = read_vec3(input)?;
        let rotation = read_mat3(input)?;
        let parent = read_i32(input)?;
        let angle1 = Dof::read(input)?;
        let angle2 = Dof::read(input)?;
        let twist = Dof::read(input)?;
        let length = Dof::read(input)?;

        Ok(Self {
            id,
            name,
            frame: CoordinateFrame::new(origin, rotation),
            angle1,
            angle2,
            twist,
            length,
            parent: (parent >= 0).then_some(parent),
            children: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: DVec3, b: DVec3) -> bool {
        (a - b).length() < 1e-9
    }

    #[test]
    fn test_recalc_coords() {
        let parent = CoordinateFrame::default();
        let mut joint = Joint::new(CoordinateFrame::default(), "j");
        joint.length.pos = 2.0;
        joint.angle1.set(-90.0);
        joint.recalc_coords(Some(&parent));

        // Rx(-90) 把 Z 轴转到 +Y
        assert!(approx_eq(joint.position(), DVec3::new(0.0, 2.0, 0.0)));
        assert!(approx_eq(joint.frame.z_dir(), DVec3::Y));
    }

    #[test]
    fn test_parameters_match_coords() {
        let parent = CoordinateFrame::from_z_up(
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::Z,
        );
        let mut joint = Joint::new(CoordinateFrame::default(), "j");
        joint.length.pos = 1.5;
        joint.angle1.set(25.0);
        joint.angle2.set(-40.0);
        joint.twist.set(70.0);
        joint.recalc_coords(Some(&parent));
        let frame = joint.frame;

        // 打乱参数后从坐标系反推
        joint.angle1.set(0.0);
        joint.angle2.set(0.0);
        joint.twist.set(0.0);
        joint.length.pos = 0.0;
        joint.recalc_parameters(Some(&parent));

        assert!((joint.angle1.pos - 25.0).abs() < 1e-9);
        assert!((joint.angle2.pos + 40.0).abs() < 1e-9);
        assert!((joint.twist.pos - 70.0).abs() < 1e-9);
        assert!((joint.length.pos - 1.5).abs() < 1e-12);

        joint.recalc_coords(Some(&parent));
        assert!(approx_eq(joint.frame.origin, frame.origin));
        assert!(approx_eq(joint.frame.up_dir(), frame.up_dir()));
    }

    #[test]
    fn test_root_ignores_recalc() {
        let frame = CoordinateFrame::new(DVec3::new(3.0, 2.0, 1.0), DMat3::IDENTITY);
        let mut joint = Joint::new(frame, "root");
        joint.angle1.set(45.0);
        joint.recalc_coords(None);
        joint.recalc_parameters(None);
        assert_eq!(joint.frame, frame);
        assert_eq!(joint.angle1.pos, 45.0);
    }
}
