//! 骨骼 - 按 ID 排序的关节集合
//!
//! 关节之间以 ID 互相引用，Skeleton 独占所有关节。
//! 关节始终按 ID 升序存放，`find_joint_index` 使用二分查找。

use std::io::{Read, Write};

use glam::{DMat3, DQuat, DVec3};

use crate::mesh::Mesh;
use crate::persist::{
    read_count, read_i32, read_version, with_capacity, write_count, write_i32, write_version,
};
use crate::{PoseError, Result};

use super::{CoordinateFrame, DofKind, Joint};

/// 防止除零的最小距离
const MIN_DISTANCE: f64 = 1e-12;

/// 骨骼
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Skeleton {
    joints: Vec<Joint>,
    next_id: i32,
}

impl Skeleton {
    const VERSION: i16 = 0;

    pub fn new() -> Self {
        Self::default()
    }

    // ========================================
    // 结构修改
    // ========================================

    /// 添加关节
    ///
    /// `joint.frame` 为世界坐标系。ID 未设置（负数）或已被占用时分配新 ID。
    /// 非根关节由坐标系反推 DOF；根关节的 DOF 全部锁定。
    /// 返回分配的 ID。
    pub fn add_joint(&mut self, mut joint: Joint, parent_id: Option<i32>) -> Result<i32> {
        let parent_frame = match parent_id {
            Some(pid) => {
                let idx = self.find_joint_index(pid).ok_or(PoseError::JointNotFound(pid))?;
                Some(self.joints[idx].frame)
            }
            None => None,
        };

        if joint.id < 0 || self.find_joint_index(joint.id).is_some() {
            joint.id = self.next_id.max(self.max_id() + 1);
        }
        self.next_id = self.next_id.max(joint.id + 1);

        joint.parent = parent_id;
        joint.children.clear();
        match parent_frame {
            Some(frame) => {
                joint.recalc_parameters(Some(&frame));
                joint.recalc_coords(Some(&frame));
            }
            None => joint.fix_all(),
        }

        let id = joint.id;
        let pos = self.joints.partition_point(|j| j.id < id);
        self.joints.insert(pos, joint);

        if let Some(pid) = parent_id {
            if let Some(idx) = self.find_joint_index(pid) {
                self.joints[idx].children.push(id);
            }
        }
        Ok(id)
    }

    /// 删除关节及其所有后代
    ///
    /// 关节不存在时返回 false。
    pub fn delete_joint(&mut self, id: i32) -> bool {
        let Some(idx) = self.find_joint_index(id) else {
            return false;
        };

        let children = self.joints[idx].children.clone();
        for child in children {
            self.delete_joint(child);
        }

        // 子关节删除后索引可能变化，重新查找
        let Some(idx) = self.find_joint_index(id) else {
            return false;
        };
        let joint = self.joints.remove(idx);
        if let Some(pid) = joint.parent {
            if let Some(pidx) = self.find_joint_index(pid) {
                self.joints[pidx].children.retain(|&c| c != id);
            }
        }
        true
    }

    // ========================================
    // 查询
    // ========================================

    /// 按 ID 查找索引（二分查找）
    pub fn find_joint_index(&self, id: i32) -> Option<usize> {
        self.joints.binary_search_by_key(&id, |j| j.id).ok()
    }

    pub fn joint(&self, id: i32) -> Option<&Joint> {
        self.find_joint_index(id).map(|i| &self.joints[i])
    }

    pub fn joint_mut(&mut self, id: i32) -> Option<&mut Joint> {
        let idx = self.find_joint_index(id)?;
        Some(&mut self.joints[idx])
    }

    /// 全部关节（按 ID 升序）
    #[inline]
    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    #[inline]
    pub(crate) fn joints_mut(&mut self) -> &mut [Joint] {
        &mut self.joints
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// 下一个待分配的 ID
    #[inline]
    pub fn next_id(&self) -> i32 {
        self.next_id
    }

    fn max_id(&self) -> i32 {
        self.joints.last().map(|j| j.id).unwrap_or(-1)
    }

    /// 父关节索引
    pub fn parent_index(&self, index: usize) -> Option<usize> {
        self.joints[index].parent.and_then(|p| self.find_joint_index(p))
    }

    /// 父关节坐标系
    pub(crate) fn parent_frame(&self, index: usize) -> Option<CoordinateFrame> {
        self.parent_index(index).map(|p| self.joints[p].frame)
    }

    /// 所有后代 ID（深度优先，不含自身）
    pub fn descendants(&self, id: i32) -> Vec<i32> {
        let mut result = Vec::new();
        let mut stack: Vec<i32> = match self.joint(id) {
            Some(joint) => joint.children.iter().rev().copied().collect(),
            None => return result,
        };
        while let Some(current) = stack.pop() {
            result.push(current);
            if let Some(joint) = self.joint(current) {
                stack.extend(joint.children.iter().rev().copied());
            }
        }
        result
    }

    /// `ancestor` 是否为 `descendant` 的祖先（不含自身）
    pub fn is_ancestor(&self, ancestor: i32, descendant: i32) -> bool {
        let mut current = self.joint(descendant).and_then(|j| j.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.joint(id).and_then(|j| j.parent);
        }
        false
    }

    // ========================================
    // 坐标更新
    // ========================================

    /// 从根关节开始重新计算所有坐标系
    pub fn update_coords(&mut self) {
        for idx in 0..self.joints.len() {
            if self.joints[idx].parent.is_none() {
                self.update_coords_recursive(idx);
            }
        }
    }

    /// 递归更新坐标系
    fn update_coords_recursive(&mut self, idx: usize) {
        let parent_frame = self.parent_frame(idx);
        self.joints[idx].recalc_coords(parent_frame.as_ref());

        for k in 0..self.joints[idx].children.len() {
            let child = self.joints[idx].children[k];
            if let Some(child_idx) = self.find_joint_index(child) {
                self.update_coords_recursive(child_idx);
            }
        }
    }

    /// 整体缩放（根关节位置和骨骼长度）
    pub fn scale(&mut self, factor: f64) {
        for joint in &mut self.joints {
            if joint.parent.is_none() {
                joint.frame.origin *= factor;
                continue;
            }
            let length = &mut joint.length;
            length.pos *= factor;
            length.min *= factor;
            length.min_comfort *= factor;
            if length.max != f64::MAX {
                length.max *= factor;
            }
            if length.max_comfort != f64::MAX {
                length.max_comfort *= factor;
            }
        }
        self.update_coords();
    }

    // ========================================
    // 混合
    // ========================================

    /// 以本骨骼为基准的加权混合，结果写入 `average`
    ///
    /// 非根关节：`pos + Σ w_i * find_offset(other_i)`。
    /// 根关节：位置按偏移线性混合，朝向在旋转向量空间中混合。
    /// 其他骨骼中缺失的关节不参与对应项。
    pub fn blend(&self, average: &mut Skeleton, skeletons: &[&Skeleton], weights: &[f64]) {
        assert_eq!(
            skeletons.len(),
            weights.len(),
            "skeleton and weight counts differ"
        );

        for joint in &self.joints {
            let Some(avg_idx) = average.find_joint_index(joint.id) else {
                continue;
            };
            let others: Vec<(&Joint, f64)> = skeletons
                .iter()
                .zip(weights)
                .filter_map(|(s, &w)| s.joint(joint.id).map(|j| (j, w)))
                .collect();

            if joint.parent.is_some() {
                for kind in DofKind::ALL {
                    let base = joint.dof(kind);
                    let offset: f64 = others
                        .iter()
                        .map(|(other, w)| w * base.find_offset(other.dof(kind)))
                        .sum();
                    average.joints[avg_idx].dof_mut(kind).set(base.pos + offset);
                }
            } else {
                let origin = others.iter().fold(joint.frame.origin, |acc, (other, w)| {
                    acc + *w * (other.frame.origin - joint.frame.origin)
                });
                let rotation_delta =
                    others.iter().fold(DVec3::ZERO, |acc, (other, w)| {
                        acc + *w * rotation_offset(&joint.frame.rotation, &other.frame.rotation)
                    });
                let rotation =
                    DMat3::from_quat(DQuat::from_scaled_axis(rotation_delta)) * joint.frame.rotation;
                average.joints[avg_idx].frame = CoordinateFrame::new(origin, rotation);
            }
        }
        average.update_coords();
    }

    // ========================================
    // 网格变形
    // ========================================

    /// 骨骼改变姿势后重新计算网格顶点
    ///
    /// `old_mesh` 为变形前的网格（旧骨骼和旧顶点），结果写入 `new_mesh`
    /// （其骨骼已为新姿势）。顶点按 `ik_weight` 在绑定关节和其父关节之间插值，
    /// 再按 `(旧距离/新距离)^(0.5*weight)` 缩放到关节原点的偏移以减少弯曲处的体积损失。
    /// 未绑定的顶点保持不变。
    pub fn adjust_mesh<A, B>(old_mesh: &A, new_mesh: &mut B)
    where
        A: Mesh + ?Sized,
        B: Mesh + ?Sized,
    {
        let old_skeleton = old_mesh.skeleton();
        let new_skeleton = new_mesh.skeleton();
        let vertices = old_mesh.vertices();
        if vertices.len() != new_mesh.vertices().len() {
            log::warn!(
                "[skeleton] adjust_mesh 顶点数不一致: {} vs {}",
                vertices.len(),
                new_mesh.vertices().len()
            );
            return;
        }

        let positions: Vec<DVec3> = vertices
            .iter()
            .map(|v| {
                let (Some(oi), Some(ni)) = (
                    old_skeleton.find_joint_index(v.ik_joint),
                    new_skeleton.find_joint_index(v.ik_joint),
                ) else {
                    return v.r;
                };
                let old_frame = old_skeleton.joints[oi].frame;
                let new_frame = new_skeleton.joints[ni].frame;
                let weight = v.ik_weight.clamp(0.0, 1.0);

                let moved = new_frame.to_world(old_frame.to_local(v.r));
                let parent_moved = match (
                    old_skeleton.parent_frame(oi),
                    new_skeleton.parent_frame(ni),
                ) {
                    (Some(old_parent), Some(new_parent)) => {
                        new_parent.to_world(old_parent.to_local(v.r))
                    }
                    _ => moved,
                };
                let mut pos = parent_moved.lerp(moved, weight);

                // 反挤压
                let old_dist = (v.r - old_frame.origin).length();
                let offset = pos - new_frame.origin;
                let new_dist = offset.length();
                if old_dist > MIN_DISTANCE && new_dist > MIN_DISTANCE {
                    pos = new_frame.origin + offset * (old_dist / new_dist).powf(0.5 * weight);
                }
                pos
            })
            .collect();

        new_mesh.set_vertex_positions(&positions);
    }

    // ========================================
    // 持久化
    // ========================================

    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        write_version(out, Self::VERSION)?;
        write_i32(out, self.next_id)?;
        write_count(out, self.joints.len())?;
        for joint in &self.joints {
            joint.write(out)?;
        }
        Ok(())
    }

    /// 读取并重建父子关系
    ///
    /// ID 必须严格升序，父关节必须存在且不能成环，否则返回格式错误。
    pub fn read<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        read_version(input, "Skeleton", 0..=Self::VERSION)?;
        let next_id = read_i32(input)?;
        let count = read_count(input)?;
        let mut joints: Vec<Joint> = with_capacity(count);
        for _ in 0..count {
            let joint = Joint::read(input)?;
            if let Some(prev) = joints.last() {
                if joint.id <= prev.id {
                    return Err(PoseError::Format(format!(
                        "Joint ids not sorted: {} after {}",
                        joint.id, prev.id
                    )));
                }
            }
            joints.push(joint);
        }

        let mut skeleton = Self { joints, next_id };
        for idx in 0..skeleton.joints.len() {
            let id = skeleton.joints[idx].id;
            if let Some(pid) = skeleton.joints[idx].parent {
                let pidx = skeleton.find_joint_index(pid).ok_or_else(|| {
                    PoseError::Format(format!("Joint {} has missing parent {}", id, pid))
                })?;
                skeleton.joints[pidx].children.push(id);
            }
        }
        skeleton.check_acyclic()?;
        skeleton.next_id = skeleton.next_id.max(skeleton.max_id() + 1);
        Ok(skeleton)
    }
}

impl Skeleton {
    /// 从每个关节向上走到根，路径上重复出现的关节说明父链成环
    fn check_acyclic(&self) -> Result<()> {
        const UNVISITED: u8 = 0;
        const ON_PATH: u8 = 1;
        const REACHES_ROOT: u8 = 2;

        let mut state = vec![UNVISITED; self.joints.len()];
        for start in 0..self.joints.len() {
            let mut path = Vec::new();
            let mut current = Some(start);
            while let Some(idx) = current {
                match state[idx] {
                    REACHES_ROOT => break,
                    ON_PATH => {
                        return Err(PoseError::Format(format!(
                            "Joint {} is its own ancestor",
                            self.joints[idx].id
                        )))
                    }
                    _ => {}
                }
                state[idx] = ON_PATH;
                path.push(idx);
                current = self.parent_index(idx);
            }
            for idx in path {
                state[idx] = REACHES_ROOT;
            }
        }
        Ok(())
    }
}

/// `from` 到 `to` 的旋转向量（轴 * 弧度），取最短路径
fn rotation_offset(from: &DMat3, to: &DMat3) -> DVec3 {
    let mut q = DQuat::from_mat3(&(*to * from.transpose()));
    if q.w < 0.0 {
        q = -q;
    }
    q.to_scaled_axis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{MeshVertex, SkinnedMesh};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::io::Cursor;

    fn frame_at(pos: DVec3, parent: DVec3) -> CoordinateFrame {
        CoordinateFrame::from_z_up(pos, pos - parent, DVec3::Y)
    }

    /// root(0,0,0) - a(0,0,1) - b(0,0,2)，另有 root - c(1,0,0)
    fn sample_skeleton() -> (Skeleton, [i32; 4]) {
        let mut skeleton = Skeleton::new();
        let root = skeleton
            .add_joint(Joint::new(CoordinateFrame::default(), "root"), None)
            .unwrap();
        let a = skeleton
            .add_joint(
                Joint::new(frame_at(DVec3::new(0.0, 0.0, 1.0), DVec3::ZERO), "a"),
                Some(root),
            )
            .unwrap();
        let b = skeleton
            .add_joint(
                Joint::new(
                    frame_at(DVec3::new(0.0, 0.0, 2.0), DVec3::new(0.0, 0.0, 1.0)),
                    "b",
                ),
                Some(a),
            )
            .unwrap();
        let c = skeleton
            .add_joint(
                Joint::new(frame_at(DVec3::new(1.0, 0.0, 0.0), DVec3::ZERO), "c"),
                Some(root),
            )
            .unwrap();
        (skeleton, [root, a, b, c])
    }

    fn positions(skeleton: &Skeleton) -> Vec<DVec3> {
        skeleton.joints().iter().map(|j| j.position()).collect()
    }

    #[test]
    fn test_add_joint() {
        let (skeleton, [root, a, b, c]) = sample_skeleton();
        assert_eq!([root, a, b, c], [0, 1, 2, 3]);
        assert_eq!(skeleton.next_id(), 4);
        assert_eq!(skeleton.joint(root).unwrap().children(), &[a, c]);
        assert_eq!(skeleton.joint(b).unwrap().parent_id(), Some(a));

        // 根关节 DOF 锁定
        let root_joint = skeleton.joint(root).unwrap();
        assert!(DofKind::ALL.iter().all(|&k| root_joint.dof(k).fixed));

        // 子关节由坐标系反推长度
        assert!((skeleton.joint(b).unwrap().length.pos - 1.0).abs() < 1e-12);
        assert!((skeleton.joint(c).unwrap().position() - DVec3::X).length() < 1e-12);
    }

    #[test]
    fn test_add_joint_missing_parent() {
        let (mut skeleton, _) = sample_skeleton();
        let result = skeleton.add_joint(Joint::new(CoordinateFrame::default(), "x"), Some(42));
        assert!(matches!(result, Err(PoseError::JointNotFound(42))));
        assert_eq!(skeleton.len(), 4);
    }

    #[test]
    fn test_explicit_and_duplicate_ids() {
        let mut skeleton = Skeleton::new();
        let mut joint = Joint::new(CoordinateFrame::default(), "r");
        joint.id = 10;
        assert_eq!(skeleton.add_joint(joint.clone(), None).unwrap(), 10);
        // 重复 ID 被重新分配
        assert_eq!(skeleton.add_joint(joint, None).unwrap(), 11);
        let mut low = Joint::new(CoordinateFrame::default(), "low");
        low.id = 3;
        assert_eq!(skeleton.add_joint(low, None).unwrap(), 3);

        let ids: Vec<i32> = skeleton.joints().iter().map(|j| j.id()).collect();
        assert_eq!(ids, vec![3, 10, 11]);
        assert_eq!(skeleton.next_id(), 12);
    }

    #[test]
    fn test_find_joint_index_random() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mut ids: Vec<i32> = (0..200).collect();
            ids.shuffle(&mut rng);
            let present: Vec<i32> = ids[..50].to_vec();

            let mut skeleton = Skeleton::new();
            for &id in &present {
                let mut joint = Joint::new(CoordinateFrame::default(), format!("j{}", id));
                joint.id = id;
                skeleton.add_joint(joint, None).unwrap();
            }

            for id in 0..200 {
                match skeleton.find_joint_index(id) {
                    Some(idx) => {
                        assert!(present.contains(&id));
                        assert_eq!(skeleton.joints()[idx].id(), id);
                    }
                    None => assert!(!present.contains(&id)),
                }
            }
            assert_eq!(skeleton.find_joint_index(-1), None);
        }
    }

    #[test]
    fn test_delete_joint_recursive() {
        let (mut skeleton, [root, a, b, c]) = sample_skeleton();
        assert!(skeleton.delete_joint(a));
        assert!(skeleton.joint(a).is_none());
        assert!(skeleton.joint(b).is_none());
        assert_eq!(skeleton.joint(root).unwrap().children(), &[c]);
        assert!(!skeleton.delete_joint(a));
        assert_eq!(skeleton.len(), 2);
    }

    #[test]
    fn test_descendants_and_ancestors() {
        let (skeleton, [root, a, b, c]) = sample_skeleton();
        assert_eq!(skeleton.descendants(root), vec![a, b, c]);
        assert_eq!(skeleton.descendants(a), vec![b]);
        assert!(skeleton.descendants(b).is_empty());
        assert!(skeleton.is_ancestor(root, b));
        assert!(skeleton.is_ancestor(a, b));
        assert!(!skeleton.is_ancestor(c, b));
        assert!(!skeleton.is_ancestor(b, b));
    }

    #[test]
    fn test_update_coords() {
        let (mut skeleton, [_, a, b, _]) = sample_skeleton();
        skeleton.joint_mut(a).unwrap().angle1.set(-90.0);
        skeleton.update_coords();
        // a 转到 +Y，b 随之移动
        assert!((skeleton.joint(a).unwrap().position() - DVec3::Y).length() < 1e-12);
        assert!(
            (skeleton.joint(b).unwrap().position() - DVec3::new(0.0, 2.0, 0.0)).length() < 1e-12
        );
    }

    #[test]
    fn test_scale() {
        let (mut skeleton, [_, _, b, _]) = sample_skeleton();
        skeleton.scale(2.0);
        let pos = skeleton.joint(b).unwrap().position();
        assert!((pos - DVec3::new(0.0, 0.0, 4.0)).length() < 1e-12);
        assert_eq!(skeleton.joint(b).unwrap().length.max, f64::MAX);
    }

    #[test]
    fn test_blend_identity() {
        let (skeleton, _) = sample_skeleton();
        let before = positions(&skeleton);

        let mut average = skeleton.clone();
        skeleton.blend(&mut average, &[], &[]);
        for (p, q) in before.iter().zip(positions(&average)) {
            assert!((*p - q).length() < 1e-12);
        }

        let copy = skeleton.clone();
        let mut average = skeleton.clone();
        skeleton.blend(&mut average, &[&copy], &[1.0]);
        for (p, q) in before.iter().zip(positions(&average)) {
            assert!((*p - q).length() < 1e-12);
        }
    }

    #[test]
    fn test_blend_offsets() {
        let (base, [root, a, _, _]) = sample_skeleton();
        let mut bent = base.clone();
        bent.joint_mut(a).unwrap().angle1.set(-40.0);
        bent.joint_mut(root).unwrap().frame.origin = DVec3::new(2.0, 0.0, 0.0);
        bent.update_coords();

        let mut average = base.clone();
        base.blend(&mut average, &[&bent], &[0.5]);
        assert!((average.joint(a).unwrap().angle1.pos + 20.0).abs() < 1e-9);
        assert!((average.joint(root).unwrap().position() - DVec3::X).length() < 1e-12);

        // 循环 DOF 走最短路径
        let mut x = base.clone();
        let mut y = base.clone();
        x.joint_mut(a).unwrap().angle2.set(170.0);
        y.joint_mut(a).unwrap().angle2.set(-170.0);
        let mut average = x.clone();
        x.blend(&mut average, &[&y], &[0.5]);
        assert!((average.joint(a).unwrap().angle2.pos + 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_blend_root_rotation() {
        let (base, [root, a, _, _]) = sample_skeleton();
        let mut turned = base.clone();
        turned.joint_mut(root).unwrap().frame.rotation =
            DMat3::from_rotation_x(std::f64::consts::FRAC_PI_2);
        turned.update_coords();

        let mut average = base.clone();
        base.blend(&mut average, &[&turned], &[0.5]);
        let expected = DMat3::from_rotation_x(std::f64::consts::FRAC_PI_4) * DVec3::Z;
        assert!((average.joint(a).unwrap().position() - expected).length() < 1e-9);
    }

    #[test]
    fn test_adjust_mesh_rigid() {
        let (skeleton, [_, a, b, _]) = sample_skeleton();
        let vertices = vec![
            MeshVertex::new(DVec3::new(0.1, 0.0, 1.5), a, 1.0),
            MeshVertex::new(DVec3::new(0.0, 0.2, 2.5), b, 1.0),
            MeshVertex::new(DVec3::new(5.0, 5.0, 5.0), -1, 1.0),
        ];
        let old_mesh = SkinnedMesh::new(vertices, skeleton.clone());

        // 整体平移
        let mut moved = skeleton.clone();
        moved.joints_mut()[0].frame.origin = DVec3::new(1.0, 2.0, 3.0);
        moved.update_coords();
        let mut new_mesh = old_mesh.clone();
        new_mesh.set_skeleton(moved);
        Skeleton::adjust_mesh(&old_mesh, &mut new_mesh);

        let shift = DVec3::new(1.0, 2.0, 3.0);
        for (old, new) in old_mesh.vertices().iter().zip(new_mesh.vertices()).take(2) {
            assert!((old.r + shift - new.r).length() < 1e-9);
        }
        // 未绑定顶点不动
        assert_eq!(new_mesh.vertices()[2].r, DVec3::new(5.0, 5.0, 5.0));
    }

    #[test]
    fn test_adjust_mesh_parent_weight() {
        let (skeleton, [_, _, b, _]) = sample_skeleton();
        let vertex = MeshVertex::new(DVec3::new(0.0, 0.0, 2.5), b, 0.0);
        let old_mesh = SkinnedMesh::new(vec![vertex], skeleton.clone());

        // 弯曲 b，权重为 0 的顶点跟随父关节 a
        let mut bent = skeleton.clone();
        bent.joint_mut(b).unwrap().angle1.set(-90.0);
        bent.update_coords();
        let mut new_mesh = old_mesh.clone();
        new_mesh.set_skeleton(bent);
        Skeleton::adjust_mesh(&old_mesh, &mut new_mesh);

        assert!((new_mesh.vertices()[0].r - DVec3::new(0.0, 0.0, 2.5)).length() < 1e-9);
    }

    #[test]
    fn test_round_trip() {
        let (mut skeleton, [_, a, _, _]) = sample_skeleton();
        {
            let joint = skeleton.joint_mut(a).unwrap();
            joint.angle1.comfort = true;
            joint.angle1.min_comfort = -30.0;
            joint.angle1.max_comfort = 30.0;
            joint.twist.stiffness = 0.5;
            joint.length.fixed = false;
        }
        let mut buf = Vec::new();
        skeleton.write(&mut buf).unwrap();
        let back = Skeleton::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, skeleton);
    }

    #[test]
    fn test_read_bad_version() {
        let mut buf = Vec::new();
        write_version(&mut buf, 9).unwrap();
        let err = Skeleton::read(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(
            err,
            PoseError::UnsupportedVersion { kind: "Skeleton", version: 9 }
        ));
    }

    #[test]
    fn test_read_missing_parent() {
        let (skeleton, [_, a, _, _]) = sample_skeleton();
        let mut orphan = skeleton.joint(a).unwrap().clone();
        orphan.parent = Some(99);

        let mut buf = Vec::new();
        write_version(&mut buf, 0).unwrap();
        write_i32(&mut buf, 100).unwrap();
        write_count(&mut buf, 1).unwrap();
        orphan.write(&mut buf).unwrap();
        assert!(matches!(
            Skeleton::read(&mut Cursor::new(&buf)),
            Err(PoseError::Format(_))
        ));
    }

    fn encode_joints(joints: &[Joint]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_version(&mut buf, 0).unwrap();
        write_i32(&mut buf, 100).unwrap();
        write_count(&mut buf, joints.len()).unwrap();
        for joint in joints {
            joint.write(&mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_read_rejects_cycle() {
        let (skeleton, [_, a, _, _]) = sample_skeleton();
        let template = skeleton.joint(a).unwrap().clone();

        let mut own_parent = template.clone();
        own_parent.id = 5;
        own_parent.parent = Some(5);
        assert!(matches!(
            Skeleton::read(&mut Cursor::new(encode_joints(&[own_parent]))),
            Err(PoseError::Format(_))
        ));

        let mut first = template.clone();
        first.id = 1;
        first.parent = Some(2);
        let mut second = template;
        second.id = 2;
        second.parent = Some(1);
        assert!(matches!(
            Skeleton::read(&mut Cursor::new(encode_joints(&[first, second]))),
            Err(PoseError::Format(_))
        ));

        // 成环的关节挂在正常的根下面也要拒绝
        let (skeleton, [root, _, _, _]) = sample_skeleton();
        let mut joints = skeleton.joints().to_vec();
        let mut third = joints[1].clone();
        third.id = 10;
        third.parent = Some(11);
        let mut fourth = joints[1].clone();
        fourth.id = 11;
        fourth.parent = Some(10);
        joints.extend([third, fourth]);
        assert_eq!(joints[0].id, root);
        assert!(matches!(
            Skeleton::read(&mut Cursor::new(encode_joints(&joints))),
            Err(PoseError::Format(_))
        ));

        // 正常骨骼仍可读取
        let back = Skeleton::read(&mut Cursor::new(encode_joints(skeleton.joints()))).unwrap();
        assert_eq!(back.descendants(root).len(), 3);
    }
}
