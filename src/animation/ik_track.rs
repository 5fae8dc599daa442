//! IK 轨道
//!
//! 每帧把关节约束转换成求解器输入，求解后让网格跟随骨骼。

use std::io::{Read, Write};

use glam::DVec3;

use crate::config::get_config;
use crate::gesture::Actor;
use crate::mesh::Mesh;
use crate::persist::{
    read_bool, read_count, read_i32, read_string, read_u32, read_u8, read_vec3, read_version,
    with_capacity, write_bool, write_count, write_i32, write_string, write_u32, write_u8,
    write_vec3, write_version,
};
use crate::skeleton::{IkSolver, Skeleton};
use crate::{PoseError, Result};

/// 约束类型
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstraintKind {
    /// 锁定在当前位置
    Locked,
    /// 移动到世界坐标目标
    Target(DVec3),
}

/// 单个关节的约束
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointConstraint {
    pub joint_id: i32,
    pub kind: ConstraintKind,
}

impl JointConstraint {
    pub fn locked(joint_id: i32) -> Self {
        Self {
            joint_id,
            kind: ConstraintKind::Locked,
        }
    }

    pub fn target(joint_id: i32, position: DVec3) -> Self {
        Self {
            joint_id,
            kind: ConstraintKind::Target(position),
        }
    }
}

/// IK 轨道
#[derive(Clone, Debug)]
pub struct IkTrack {
    pub name: String,
    pub enabled: bool,
    /// 求解后用手势重建网格，而不是直接让顶点跟随骨骼
    pub use_gestures: bool,
    pub max_steps: usize,
    constraints: Vec<JointConstraint>,
}

impl IkTrack {
    const VERSION: i16 = 0;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            use_gestures: false,
            max_steps: get_config().default_max_steps,
            constraints: Vec::new(),
        }
    }

    #[inline]
    pub fn constraints(&self) -> &[JointConstraint] {
        &self.constraints
    }

    /// 添加约束，同一关节的旧约束被替换
    pub fn set_constraint(&mut self, constraint: JointConstraint) {
        self.remove_constraint(constraint.joint_id);
        self.constraints.push(constraint);
    }

    pub fn remove_constraint(&mut self, joint_id: i32) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| c.joint_id != joint_id);
        self.constraints.len() != before
    }

    pub fn clear_constraints(&mut self) {
        self.constraints.clear();
    }

    // ========================================
    // 求解
    // ========================================

    /// 按约束求解骨骼
    ///
    /// 骨骼中不存在的关节被忽略。没有目标关节时直接返回 true。
    pub fn solve_skeleton<F>(&self, skeleton: &mut Skeleton, should_stop: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let n = skeleton.len();
        let mut locked = vec![false; n];
        let mut moving = vec![false; n];
        let mut targets: Vec<DVec3> = skeleton.joints().iter().map(|j| j.position()).collect();

        for c in &self.constraints {
            let Some(index) = skeleton.find_joint_index(c.joint_id) else {
                log::warn!("[IK轨道] {} 约束了不存在的关节 {}", self.name, c.joint_id);
                continue;
            };
            match c.kind {
                ConstraintKind::Locked => locked[index] = true,
                ConstraintKind::Target(position) => {
                    moving[index] = true;
                    targets[index] = position;
                }
            }
        }

        if !moving.contains(&true) {
            return true;
        }

        let converged = IkSolver::new(skeleton, &locked, &moving).solve_with_cancel(
            &targets,
            self.max_steps,
            should_stop,
        );
        if !converged {
            log::debug!("[IK轨道] {} 未收敛", self.name);
        }
        converged
    }

    /// 求解网格的骨骼，并让顶点跟随
    ///
    /// 返回求解是否收敛；轨道禁用时不做修改并返回 true。
    pub fn apply<M, F>(&self, mesh: &mut M, should_stop: F) -> bool
    where
        M: Mesh + Clone,
        F: FnMut() -> bool,
    {
        if !self.enabled {
            return true;
        }
        let old = mesh.clone();
        let mut skeleton = mesh.skeleton().clone();
        let converged = self.solve_skeleton(&mut skeleton, should_stop);
        mesh.set_skeleton(skeleton);
        Skeleton::adjust_mesh(&old, mesh);
        converged
    }

    /// 作用于 Actor
    ///
    /// `use_gestures` 为 true 时只求解骨骼，再由手势重建表面并更新当前姿势。
    pub fn apply_to_actor<M, F>(&self, actor: &mut Actor<M>, should_stop: F) -> bool
    where
        M: Mesh + Clone,
        F: FnMut() -> bool,
    {
        if !self.enabled {
            return true;
        }
        if !self.use_gestures {
            return self.apply(actor.object_mut(), should_stop);
        }

        let mut skeleton = actor.object().skeleton().clone();
        let converged = self.solve_skeleton(&mut skeleton, should_stop);
        actor.object_mut().set_skeleton(skeleton);
        actor.shape_from_gestures();
        converged
    }

    // ========================================
    // 持久化
    // ========================================

    pub fn write(&self, out: &mut dyn Write) -> Result<()> {
        write_version(out, Self::VERSION)?;
        write_string(out, &self.name)?;
        write_bool(out, self.enabled)?;
        write_bool(out, self.use_gestures)?;
        write_u32(out, u32::try_from(self.max_steps).unwrap_or(u32::MAX))?;
        write_count(out, self.constraints.len())?;
        for c in &self.constraints {
            write_i32(out, c.joint_id)?;
            match c.kind {
                ConstraintKind::Locked => write_u8(out, 0)?,
                ConstraintKind::Target(position) => {
                    write_u8(out, 1)?;
                    write_vec3(out, position)?;
                }
            }
        }
        Ok(())
    }

    pub fn read(input: &mut dyn Read) -> Result<Self> {
        read_version(input, "IkTrack", 0..=Self::VERSION)?;
        let name = read_string(input)?;
        let enabled = read_bool(input)?;
        let use_gestures = read_bool(input)?;
        let max_steps = read_u32(input)? as usize;
        let count = read_count(input)?;
        let mut constraints = with_capacity(count);
        for _ in 0..count {
            let joint_id = read_i32(input)?;
            let kind = match read_u8(input)? {
                0 => ConstraintKind::Locked,
                1 => ConstraintKind::Target(read_vec3(input)?),
                other => {
                    return Err(PoseError::Format(format!(
                        "Invalid constraint kind: {}",
                        other
                    )))
                }
            };
            constraints.push(JointConstraint { joint_id, kind });
        }
        Ok(Self {
            name,
            enabled,
            use_gestures,
            max_steps,
            constraints,
        })
    }
}
