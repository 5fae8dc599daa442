//! 网格 - 骨骼驱动的可变形对象
//!
//! `Mesh` 是手势与 IK 轨道所需的最小接口：骨骼、顶点、纹理参数。

mod parameter;

pub use parameter::ParameterValue;

use glam::DVec3;

use crate::skeleton::Skeleton;

/// 网格顶点
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshVertex {
    /// 位置
    pub r: DVec3,
    /// 绑定的关节 ID（-1 表示未绑定）
    pub ik_joint: i32,
    /// 对绑定关节的权重 [0, 1]，其余部分跟随父关节
    pub ik_weight: f64,
}

impl MeshVertex {
    #[inline]
    pub fn new(r: DVec3, ik_joint: i32, ik_weight: f64) -> Self {
        Self { r, ik_joint, ik_weight }
    }

    /// 未绑定到任何关节的顶点
    #[inline]
    pub fn unbound(r: DVec3) -> Self {
        Self::new(r, -1, 1.0)
    }
}

/// 可被骨骼驱动的网格
pub trait Mesh {
    fn skeleton(&self) -> &Skeleton;

    fn set_skeleton(&mut self, skeleton: Skeleton);

    fn vertices(&self) -> &[MeshVertex];

    /// 写入顶点位置，长度必须等于顶点数
    fn set_vertex_positions(&mut self, positions: &[DVec3]);

    /// 纹理参数值
    fn parameter_values(&self) -> &[ParameterValue];

    fn set_parameter_values(&mut self, values: Vec<ParameterValue>);
}

/// 带骨骼的三角网格
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkinnedMesh {
    vertices: Vec<MeshVertex>,
    skeleton: Skeleton,
    parameters: Vec<ParameterValue>,
}

impl SkinnedMesh {
    pub fn new(vertices: Vec<MeshVertex>, skeleton: Skeleton) -> Self {
        Self {
            vertices,
            skeleton,
            parameters: Vec::new(),
        }
    }

    /// 附带纹理参数
    pub fn with_parameters(mut self, parameters: Vec<ParameterValue>) -> Self {
        self.parameters = parameters;
        self
    }

    #[inline]
    pub fn skeleton_mut(&mut self) -> &mut Skeleton {
        &mut self.skeleton
    }
}

impl Mesh for SkinnedMesh {
    fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    fn set_skeleton(&mut self, skeleton: Skeleton) {
        self.skeleton = skeleton;
    }

    fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    fn set_vertex_positions(&mut self, positions: &[DVec3]) {
        assert_eq!(
            positions.len(),
            self.vertices.len(),
            "vertex position count mismatch"
        );
        for (vertex, &r) in self.vertices.iter_mut().zip(positions) {
            vertex.r = r;
        }
    }

    fn parameter_values(&self) -> &[ParameterValue] {
        &self.parameters
    }

    fn set_parameter_values(&mut self, values: Vec<ParameterValue>) {
        self.parameters = values;
    }
}
