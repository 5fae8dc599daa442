//! 网格手势 - 网格对象的一个姿势
//!
//! 保存顶点位置、骨骼和纹理参数值，以及所属网格的顶点绑定表。
//! 混合时绑定到关节的顶点在关节局部坐标系中混合，再用混合后的骨骼变换回世界坐标，
//! 这样弯曲的肢体不会因为线性插值而缩短。

use std::any::Any;
use std::io::{Read, Write};

use glam::DVec3;

use crate::mesh::{Mesh, ParameterValue};
use crate::persist::{
    read_count, read_f64, read_i32, read_vec3, read_version, with_capacity, write_count,
    write_f64, write_i32, write_vec3, write_version, Persist,
};
use crate::skeleton::{CoordinateFrame, Skeleton};
use crate::Result;

use super::Gesture;

/// 顶点到关节的绑定
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexBinding {
    /// 关节 ID（-1 表示未绑定）
    pub joint: i32,
    /// 对关节的权重，其余部分跟随父关节
    pub weight: f64,
}

/// 网格手势
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshGesture {
    positions: Vec<DVec3>,
    skeleton: Skeleton,
    parameter_values: Vec<ParameterValue>,
    binding: Vec<VertexBinding>,
}

impl MeshGesture {
    pub const TYPE_TAG: &'static str = "MeshGesture";
    const VERSION: i16 = 0;

    /// 记录网格当前姿势
    pub fn from_mesh<M: Mesh + ?Sized>(mesh: &M) -> Self {
        let vertices = mesh.vertices();
        Self {
            positions: vertices.iter().map(|v| v.r).collect(),
            skeleton: mesh.skeleton().clone(),
            parameter_values: mesh.parameter_values().to_vec(),
            binding: vertices
                .iter()
                .map(|v| VertexBinding {
                    joint: v.ik_joint,
                    weight: v.ik_weight,
                })
                .collect(),
        }
    }

    /// 把姿势写回网格（骨骼、顶点位置、纹理参数）
    pub fn apply_to<M: Mesh + ?Sized>(&self, mesh: &mut M) {
        mesh.set_skeleton(self.skeleton.clone());
        mesh.set_vertex_positions(&self.positions);
        mesh.set_parameter_values(self.parameter_values.clone());
    }

    #[inline]
    pub fn positions(&self) -> &[DVec3] {
        &self.positions
    }

    #[inline]
    pub fn parameter_values(&self) -> &[ParameterValue] {
        &self.parameter_values
    }

    #[inline]
    pub fn binding(&self) -> &[VertexBinding] {
        &self.binding
    }

    #[inline]
    pub fn skeleton_mut(&mut self) -> &mut Skeleton {
        &mut self.skeleton
    }

    /// 计算混合后手势的表面
    ///
    /// `average` 的骨骼必须已经是混合结果。顶点位置和纹理参数以自身为基准、
    /// 按 `weights` 混合后写入 `average`。顶点数不一致的手势被跳过。
    pub fn blend_surface(
        &self,
        average: &mut MeshGesture,
        gestures: &[&MeshGesture],
        weights: &[f64],
    ) {
        assert_eq!(gestures.len(), weights.len(), "gesture and weight counts differ");

        let (gestures, weights): (Vec<&MeshGesture>, Vec<f64>) = gestures
            .iter()
            .zip(weights)
            .filter(|(g, _)| {
                let ok = g.positions.len() == self.positions.len();
                if !ok {
                    log::warn!(
                        "[gesture] 手势顶点数不一致: {} vs {}，跳过",
                        g.positions.len(),
                        self.positions.len()
                    );
                }
                ok
            })
            .map(|(g, &w)| (*g, w))
            .unzip();

        let positions: Vec<DVec3> = (0..self.positions.len())
            .map(|v| self.blend_vertex(&average.skeleton, &gestures, &weights, v))
            .collect();

        let parameter_values: Vec<ParameterValue> = self
            .parameter_values
            .iter()
            .enumerate()
            .map(|(i, base)| {
                let (others, param_weights): (Vec<&ParameterValue>, Vec<f64>) = gestures
                    .iter()
                    .zip(&weights)
                    .filter_map(|(g, &w)| g.parameter_values.get(i).map(|p| (p, w)))
                    .unzip();
                base.blend(&others, &param_weights)
            })
            .collect();

        average.positions = positions;
        average.parameter_values = parameter_values;
        average.binding = self.binding.clone();
    }

    /// 单个顶点的混合位置
    fn blend_vertex(
        &self,
        average_skeleton: &Skeleton,
        gestures: &[&MeshGesture],
        weights: &[f64],
        v: usize,
    ) -> DVec3 {
        let binding = self.binding.get(v).copied().unwrap_or(VertexBinding {
            joint: -1,
            weight: 1.0,
        });

        let joint_frame = |s: &Skeleton| s.joint(binding.joint).map(|j| j.frame);
        let parent_frame = |s: &Skeleton| {
            s.joint(binding.joint)
                .and_then(|j| j.parent_id())
                .and_then(|p| s.joint(p))
                .map(|j| j.frame)
        };

        let in_joint = self.blend_in_frame(average_skeleton, gestures, weights, v, &joint_frame);
        let in_parent = self.blend_in_frame(average_skeleton, gestures, weights, v, &parent_frame);
        match (in_joint, in_parent) {
            (Some(a), Some(b)) => b.lerp(a, binding.weight.clamp(0.0, 1.0)),
            (Some(a), None) => a,
            _ => {
                // 未绑定：世界坐标偏移
                let base = self.positions[v];
                gestures
                    .iter()
                    .zip(weights)
                    .fold(base, |acc, (g, &w)| acc + w * (g.positions[v] - base))
            }
        }
    }

    /// 在某个关节坐标系中混合顶点偏移
    ///
    /// 基准或结果骨骼中没有该坐标系时返回 None；其他手势缺失时跳过该项。
    fn blend_in_frame(
        &self,
        average_skeleton: &Skeleton,
        gestures: &[&MeshGesture],
        weights: &[f64],
        v: usize,
        frame_of: &dyn Fn(&Skeleton) -> Option<CoordinateFrame>,
    ) -> Option<DVec3> {
        let base_frame = frame_of(&self.skeleton)?;
        let average_frame = frame_of(average_skeleton)?;
        let base = base_frame.to_local(self.positions[v]);

        let mut local = base;
        for (g, &w) in gestures.iter().zip(weights) {
            if let Some(frame) = frame_of(&g.skeleton) {
                local += w * (frame.to_local(g.positions[v]) - base);
            }
        }
        Some(average_frame.to_world(local))
    }

    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        write_version(out, Self::VERSION)?;
        self.skeleton.write(out)?;
        write_count(out, self.positions.len())?;
        for &r in &self.positions {
            write_vec3(out, r)?;
        }
        write_count(out, self.binding.len())?;
        for b in &self.binding {
            write_i32(out, b.joint)?;
            write_f64(out, b.weight)?;
        }
        write_count(out, self.parameter_values.len())?;
        for value in &self.parameter_values {
            value.write(out)?;
        }
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        read_version(input, "MeshGesture", 0..=Self::VERSION)?;
        let skeleton = Skeleton::read(input)?;

        let count = read_count(input)?;
        let mut positions = with_capacity(count);
        for _ in 0..count {
            positions.push(read_vec3(input)?);
        }

        let count = read_count(input)?;
        let mut binding = with_capacity(count);
        for _ in 0..count {
            let joint = read_i32(input)?;
            let weight = read_f64(input)?;
            binding.push(VertexBinding { joint, weight });
        }

        let count = read_count(input)?;
        let mut parameter_values = with_capacity(count);
        for _ in 0..count {
            parameter_values.push(ParameterValue::read(input)?);
        }

        Ok(Self {
            positions,
            skeleton,
            parameter_values,
            binding,
        })
    }
}

impl Gesture for MeshGesture {
    fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    fn set_skeleton(&mut self, skeleton: Skeleton) {
        self.skeleton = skeleton;
    }

    fn blend(&self, gestures: &[&Self], weights: &[f64]) -> Self {
        let mut average = self.clone();
        let skeletons: Vec<&Skeleton> = gestures.iter().map(|g| &g.skeleton).collect();
        self.skeleton.blend(&mut average.skeleton, &skeletons, weights);
        self.blend_surface(&mut average, gestures, weights);
        average
    }

    fn texture_parameter(&self, index: usize) -> Option<&ParameterValue> {
        self.parameter_values.get(index)
    }

    fn set_texture_parameter(&mut self, index: usize, value: ParameterValue) {
        self.parameter_values[index] = value;
    }

    fn equals(&self, other: &Self) -> bool {
        self == other
    }
}

impl Persist for MeshGesture {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn write_body(&self, out: &mut dyn Write) -> Result<()> {
        self.write(out)
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
