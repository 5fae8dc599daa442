//! IK 求解器 - 阻尼迭代雅可比最小二乘
//!
//! 设计原则：
//! - 每步构造雅可比矩阵，截断 SVD 求解所有子目标的最小二乘解
//! - 目标关节只向真实目标移动 `scale` 比例（阻尼）
//! - 每步先在候选骨骼上试算，通过误差检查后才提交
//! - 出错时 `scale` 减半重试，成功时加倍（上限 1）
//!
//! 求解器持有 `&mut Skeleton`，同一骨骼不能同时被两个求解器修改。
//! 不可重入，不是线程安全的。

use bitflags::bitflags;
use glam::{DMat3, DVec3};
use nalgebra::{DMatrix, DVector};

use crate::config::{get_config, SolverConfig};
use crate::linalg::solve_least_squares;

use super::{DofKind, Skeleton};

// ============================================================================
// 关节分类
// ============================================================================

/// 关节在一次求解中的行为
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointBehavior {
    /// 保持原位置（默认）
    Fixed,
    /// 可被目标带动
    Free,
    /// 可自由移动且没有外部位置约束
    Floating,
    /// 被拖动的目标关节
    Target,
}

bitflags! {
    /// 允许参与求解的 DOF
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct DofMask: u8 {
        const ANGLE1 = 1 << 0;
        const ANGLE2 = 1 << 1;
        const TWIST = 1 << 2;
        const LENGTH = 1 << 3;
    }
}

impl DofMask {
    fn of(kind: DofKind) -> Self {
        match kind {
            DofKind::Angle1 => DofMask::ANGLE1,
            DofKind::Angle2 => DofMask::ANGLE2,
            DofKind::Twist => DofMask::TWIST,
            DofKind::Length => DofMask::LENGTH,
        }
    }
}

/// 雅可比矩阵的一列（一个未知数）
#[derive(Clone, Copy, Debug, PartialEq)]
enum Column {
    /// 关节的一个 DOF
    Dof { joint: usize, kind: DofKind },
    /// 根关节沿世界坐标轴的平移
    Translation { joint: usize, axis: usize },
}

// ============================================================================
// IK 求解器
// ============================================================================

/// IK 求解器
pub struct IkSolver<'a> {
    skeleton: &'a mut Skeleton,
    behavior: Vec<JointBehavior>,
    parent: Vec<Option<usize>>,
    /// 自身及全部后代的索引（自身在首位）
    subtree: Vec<Vec<usize>>,
    enabled: Vec<DofMask>,
    columns: Vec<Column>,
    /// 每个受约束关节在雅可比矩阵中的首行
    row_of: Vec<Option<usize>>,
    row_count: usize,
    original: Vec<DVec3>,
    config: SolverConfig,
}

impl<'a> IkSolver<'a> {
    /// 使用全局配置创建求解器
    ///
    /// `locked`/`moving` 按 `skeleton.joints()` 的顺序给出，长度必须等于关节数。
    pub fn new(skeleton: &'a mut Skeleton, locked: &[bool], moving: &[bool]) -> Self {
        Self::with_config(skeleton, locked, moving, get_config())
    }

    pub fn with_config(
        skeleton: &'a mut Skeleton,
        locked: &[bool],
        moving: &[bool],
        config: SolverConfig,
    ) -> Self {
        let n = skeleton.len();
        assert_eq!(locked.len(), n, "locked flags must match joint count");
        assert_eq!(moving.len(), n, "moving flags must match joint count");

        let parent: Vec<Option<usize>> = (0..n).map(|i| skeleton.parent_index(i)).collect();
        let children = child_indices(&parent);
        let subtree: Vec<Vec<usize>> = (0..n).map(|i| collect_subtree(&children, i)).collect();

        let behavior = classify(&parent, &children, &subtree, locked, moving);
        let enabled = enabled_dofs(skeleton, &behavior, &parent, &children);

        let mut columns = Vec::new();
        for i in 0..n {
            if parent[i].is_none() {
                // 子树中有 Fixed 关节时平移根会拖动它
                let translates = match behavior[i] {
                    JointBehavior::Floating => true,
                    JointBehavior::Target => subtree[i]
                        .iter()
                        .all(|&k| behavior[k] != JointBehavior::Fixed),
                    _ => false,
                };
                if translates {
                    columns.extend((0..3).map(|axis| Column::Translation { joint: i, axis }));
                }
                continue;
            }
            for kind in DofKind::ALL {
                if enabled[i].contains(DofMask::of(kind)) {
                    columns.push(Column::Dof { joint: i, kind });
                }
            }
        }

        let mut row_of = vec![None; n];
        let mut row_count = 0;
        for i in 0..n {
            if matches!(behavior[i], JointBehavior::Fixed | JointBehavior::Target) {
                row_of[i] = Some(row_count);
                row_count += 3;
            }
        }

        let original = skeleton.joints().iter().map(|j| j.position()).collect();

        if config.debug_log {
            log::debug!(
                "[IK] 求解器创建: {} 个关节, {} 个未知数, {} 行",
                n,
                columns.len(),
                row_count
            );
        }

        Self {
            skeleton,
            behavior,
            parent,
            subtree,
            enabled,
            columns,
            row_of,
            row_count,
            original,
            config,
        }
    }

    // ========================================
    // 访问器
    // ========================================

    /// 关节行为（按 `skeleton.joints()` 顺序）
    #[inline]
    pub fn behavior(&self) -> &[JointBehavior] {
        &self.behavior
    }

    #[inline]
    pub fn skeleton(&self) -> &Skeleton {
        &*self.skeleton
    }

    /// 未知数个数
    #[inline]
    pub fn unknown_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub(crate) fn enabled(&self, index: usize) -> DofMask {
        self.enabled[index]
    }

    // ========================================
    // 求解
    // ========================================

    /// 求解
    ///
    /// `targets` 按关节顺序给出，只有目标关节的项被使用。
    /// 收敛返回 true；用完 `max_steps` 返回 false，骨骼保留最后一次被接受的状态。
    pub fn solve(&mut self, targets: &[DVec3], max_steps: usize) -> bool {
        self.solve_with_cancel(targets, max_steps, || false)
    }

    /// 可取消的求解
    ///
    /// `should_stop` 在每次外层迭代开始时调用一次，返回 true 时立即停止并返回 false。
    /// 每步在候选骨骼上完成，骨骼始终处于一致状态。
    pub fn solve_with_cancel<F>(
        &mut self,
        targets: &[DVec3],
        max_steps: usize,
        mut should_stop: F,
    ) -> bool
    where
        F: FnMut() -> bool,
    {
        let n = self.behavior.len();
        assert_eq!(targets.len(), n, "targets must match joint count");

        let target_joints: Vec<usize> = (0..n)
            .filter(|&i| self.behavior[i] == JointBehavior::Target)
            .collect();
        if target_joints.is_empty() {
            return true;
        }

        let mut dist: Vec<f64> = target_joints
            .iter()
            .map(|&i| self.skeleton.joints()[i].position().distance(targets[i]))
            .collect();

        let mut scale = 1.0;
        let mut step_size = 1.0;
        let mut prev_force: Option<Vec<f64>> = None;

        for step in 0..max_steps {
            if should_stop() {
                if self.config.debug_log {
                    log::debug!("[IK] 第 {} 步被取消", step);
                }
                return false;
            }

            let max_dist = dist.iter().copied().fold(0.0, f64::max);
            if scale * max_dist < self.config.convergence_distance {
                if self.config.debug_log {
                    log::debug!("[IK] 第 {} 步收敛: 距离={:.3e}", step, max_dist);
                }
                return true;
            }
            if self.columns.is_empty() {
                return false;
            }

            // 子目标
            let goals: Vec<Option<DVec3>> = (0..n)
                .map(|i| match self.behavior[i] {
                    JointBehavior::Fixed => Some(self.original[i]),
                    JointBehavior::Target => {
                        let current = self.skeleton.joints()[i].position();
                        Some(current + scale * (targets[i] - current))
                    }
                    _ => None,
                })
                .collect();

            let forces = self.calc_forces(&goals);
            let mut candidate = self.skeleton.clone();
            self.apply_forces(&mut candidate, &forces, step_size);

            // 误差检查
            let mut error = false;
            let mut done = true;
            for i in 0..n {
                if self.behavior[i] == JointBehavior::Fixed
                    && candidate.joints()[i].position().distance(self.original[i])
                        > self.config.fixed_tolerance
                {
                    error = true;
                    break;
                }
            }
            let new_dist: Vec<f64> = target_joints
                .iter()
                .map(|&i| candidate.joints()[i].position().distance(targets[i]))
                .collect();
            for (old, new) in dist.iter().zip(&new_dist) {
                if new > old {
                    error = true;
                } else if old - new > self.config.min_progress * old {
                    done = false;
                }
            }

            if error {
                scale *= 0.5;
                step_size = 1.0;
                prev_force = None;
                if self.config.debug_log {
                    log::debug!("[IK] 第 {} 步被拒绝, scale={}", step, scale);
                }
                continue;
            }

            *self.skeleton = candidate;
            dist = new_dist;
            if done && scale >= 1.0 {
                return true;
            }
            scale = (scale * 2.0).min(1.0);

            step_size =
                boosted_step_size(step_size, prev_force.as_deref(), &forces, &self.config);
            prev_force = Some(forces);
        }

        if self.config.debug_log {
            log::debug!("[IK] 达到最大步数 {} 未收敛", max_steps);
        }
        false
    }

    /// 计算每个未知数的增量（角度为度，长度和平移为长度单位）
    fn calc_forces(&self, goals: &[Option<DVec3>]) -> Vec<f64> {
        let joints = self.skeleton.joints();
        let cols = self.columns.len();
        let mut jacobian = DMatrix::<f64>::zeros(self.row_count, cols);
        let mut residual = DVector::<f64>::zeros(self.row_count);

        for (i, goal) in goals.iter().enumerate() {
            if let (Some(row), Some(goal)) = (self.row_of[i], goal) {
                let d = *goal - joints[i].position();
                residual[row] = d.x;
                residual[row + 1] = d.y;
                residual[row + 2] = d.z;
            }
        }

        for (c, column) in self.columns.iter().enumerate() {
            self.fill_column(&mut jacobian, c, column);
        }

        // 按梯度方向计算每列的力缩放（软限位、刚度）
        let gradient = jacobian.transpose() * &residual;
        let scales: Vec<f64> = self
            .columns
            .iter()
            .enumerate()
            .map(|(c, column)| match *column {
                Column::Dof { joint, kind } => joints[joint].dof(kind).force_scale(gradient[c]),
                Column::Translation { .. } => 1.0,
            })
            .collect();
        for (c, &s) in scales.iter().enumerate() {
            for r in 0..self.row_count {
                jacobian[(r, c)] *= s;
            }
        }

        let x = solve_least_squares(&jacobian, &residual, self.config.ik_svd_cutoff);

        self.columns
            .iter()
            .enumerate()
            .map(|(c, column)| {
                let delta = x[c] * scales[c];
                match *column {
                    Column::Dof { joint, kind } => {
                        let delta = if kind.is_angular() { delta.to_degrees() } else { delta };
                        joints[joint].dof(kind).clipped_force(delta)
                    }
                    Column::Translation { .. } => delta,
                }
            })
            .collect()
    }

    /// 一列的解析偏导数（角度按弧度）
    fn fill_column(&self, jacobian: &mut DMatrix<f64>, c: usize, column: &Column) {
        let joints = self.skeleton.joints();
        let mut put = |affected: &[usize], derivative: &dyn Fn(DVec3) -> DVec3| {
            for &k in affected {
                if let Some(row) = self.row_of[k] {
                    let d = derivative(joints[k].position());
                    jacobian[(row, c)] = d.x;
                    jacobian[(row + 1, c)] = d.y;
                    jacobian[(row + 2, c)] = d.z;
                }
            }
        };

        match *column {
            Column::Dof { joint, kind } => {
                let frame = joints[joint].frame;
                let parent = self.parent[joint].map(|p| joints[p].frame).unwrap_or_default();
                let affected = self.subtree[joint].as_slice();
                match kind {
                    DofKind::Angle1 => {
                        let axis = parent.rotation * DVec3::X;
                        put(affected, &|p: DVec3| axis.cross(p - parent.origin));
                    }
                    DofKind::Angle2 => {
                        let bend = DMat3::from_rotation_x(joints[joint].angle1.pos.to_radians());
                        let axis = parent.rotation * bend * DVec3::Y;
                        put(affected, &|p: DVec3| axis.cross(p - parent.origin));
                    }
                    DofKind::Twist => {
                        // 扭转不改变关节自身位置
                        let axis = frame.z_dir();
                        put(&affected[1..], &|p: DVec3| axis.cross(p - frame.origin));
                    }
                    DofKind::Length => {
                        let dir = frame.z_dir();
                        put(affected, &|_: DVec3| dir);
                    }
                }
            }
            Column::Translation { joint, axis } => {
                let mut unit = DVec3::ZERO;
                unit[axis] = 1.0;
                put(self.subtree[joint].as_slice(), &|_: DVec3| unit);
            }
        }
    }

    /// 把力乘以步长应用到候选骨骼上
    fn apply_forces(&self, candidate: &mut Skeleton, forces: &[f64], step_size: f64) {
        let joints = candidate.joints_mut();
        for (column, &force) in self.columns.iter().zip(forces) {
            match *column {
                Column::Dof { joint, kind } => {
                    let dof = joints[joint].dof_mut(kind);
                    let value = dof.pos + dof.clipped_force(force * step_size);
                    dof.set(value);
                }
                Column::Translation { joint, axis } => {
                    joints[joint].frame.origin[axis] += force * step_size;
                }
            }
        }
        candidate.update_coords();
    }
}

// ============================================================================
// 分类辅助函数
// ============================================================================

fn child_indices(parent: &[Option<usize>]) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::new(); parent.len()];
    for (i, p) in parent.iter().enumerate() {
        if let Some(p) = *p {
            children[p].push(i);
        }
    }
    children
}

fn collect_subtree(children: &[Vec<usize>], root: usize) -> Vec<usize> {
    let mut result = vec![root];
    let mut k = 0;
    while k < result.len() {
        result.extend_from_slice(&children[result[k]]);
        k += 1;
    }
    result
}

/// 关节分类
///
/// 从每个目标关节向上下双向扩散，经过的未锁定关节为 Free。
/// Free 关节若上游到根和整个子树都没有 Fixed，或下游全是 Free，则为 Floating。
fn classify(
    parent: &[Option<usize>],
    children: &[Vec<usize>],
    subtree: &[Vec<usize>],
    locked: &[bool],
    moving: &[bool],
) -> Vec<JointBehavior> {
    let n = parent.len();
    let mut behavior: Vec<JointBehavior> = moving
        .iter()
        .map(|&m| if m { JointBehavior::Target } else { JointBehavior::Fixed })
        .collect();

    let mut visited = vec![false; n];
    let mut stack: Vec<usize> = (0..n).filter(|&i| moving[i]).collect();
    for &i in &stack {
        visited[i] = true;
    }
    while let Some(i) = stack.pop() {
        let neighbours = parent[i].into_iter().chain(children[i].iter().copied());
        for j in neighbours {
            if visited[j] || locked[j] {
                continue;
            }
            visited[j] = true;
            behavior[j] = JointBehavior::Free;
            stack.push(j);
        }
    }

    let free_upstream = |i: usize| {
        let mut current = parent[i];
        while let Some(p) = current {
            if behavior[p] == JointBehavior::Fixed {
                return false;
            }
            current = parent[p];
        }
        true
    };
    let floating: Vec<usize> = (0..n)
        .filter(|&i| behavior[i] == JointBehavior::Free)
        .filter(|&i| {
            (free_upstream(i)
                && subtree[i]
                    .iter()
                    .all(|&k| behavior[k] != JointBehavior::Fixed))
                || subtree[i][1..]
                    .iter()
                    .all(|&k| behavior[k] == JointBehavior::Free)
        })
        .collect();
    for i in floating {
        behavior[i] = JointBehavior::Floating;
    }
    behavior
}

/// 每个关节允许求解的 DOF
///
/// 夹在两个 Fixed 关节之间的弯曲和长度会移动 Fixed 关节，禁用；
/// 有 Fixed 子关节的 Fixed 关节不能扭转。
fn enabled_dofs(
    skeleton: &Skeleton,
    behavior: &[JointBehavior],
    parent: &[Option<usize>],
    children: &[Vec<usize>],
) -> Vec<DofMask> {
    let is_fixed = |i: usize| behavior[i] == JointBehavior::Fixed;
    skeleton
        .joints()
        .iter()
        .enumerate()
        .map(|(i, joint)| {
            let Some(p) = parent[i] else {
                return DofMask::empty();
            };
            let forbid = is_fixed(i) && is_fixed(p);
            let forbid_twist = is_fixed(i) && children[i].iter().any(|&c| is_fixed(c));

            let mut mask = DofMask::empty();
            for kind in DofKind::ALL {
                let blocked = match kind {
                    DofKind::Twist => forbid_twist,
                    _ => forbid,
                };
                if !blocked && !joint.dof(kind).fixed {
                    mask |= DofMask::of(kind);
                }
            }
            mask
        })
        .collect()
}

/// 相邻两步方向一致时加大步长（不超过上限），否则复位为 1
fn boosted_step_size(
    step_size: f64,
    prev_force: Option<&[f64]>,
    forces: &[f64],
    config: &SolverConfig,
) -> f64 {
    match prev_force {
        Some(prev) if cosine(prev, forces) > config.step_boost_correlation => {
            (step_size * config.step_boost_factor).min(config.max_step_size)
        }
        _ => 1.0,
    }
}

/// 两个力向量的余弦相似度
fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{CoordinateFrame, Joint};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn add(skeleton: &mut Skeleton, pos: DVec3, parent: Option<i32>) -> i32 {
        let parent_pos = parent
            .and_then(|p| skeleton.joint(p))
            .map(|j| j.position())
            .unwrap_or(pos - DVec3::Z);
        let frame = CoordinateFrame::from_z_up(pos, pos - parent_pos, DVec3::Y);
        skeleton.add_joint(Joint::new(frame, "j"), parent).unwrap()
    }

    fn positions(skeleton: &Skeleton) -> Vec<DVec3> {
        skeleton.joints().iter().map(|j| j.position()).collect()
    }

    #[test]
    fn test_two_joint_chain() {
        init_logger();
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, DVec3::ZERO, None);
        add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(root));

        let target = DVec3::new(0.0, 0.6, 0.8);
        let mut solver = IkSolver::new(&mut skeleton, &[true, false], &[false, true]);
        assert_eq!(
            solver.behavior(),
            &[JointBehavior::Fixed, JointBehavior::Target]
        );
        let converged = solver.solve(&[DVec3::ZERO, target], 100);
        assert!(converged);

        let pos = skeleton.joints()[1].position();
        assert!(pos.distance(target) < 1e-3, "ended at {:?}", pos);
        assert_eq!(skeleton.joints()[0].position(), DVec3::ZERO);
    }

    #[test]
    fn test_locked_joint_preserved() {
        init_logger();
        // R - A - B(locked), R - C - D(moving)
        let mut skeleton = Skeleton::new();
        let r = add(&mut skeleton, DVec3::ZERO, None);
        let a = add(&mut skeleton, DVec3::new(1.0, 0.0, 0.0), Some(r));
        add(&mut skeleton, DVec3::new(2.0, 0.0, 0.0), Some(a));
        let c = add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(r));
        add(&mut skeleton, DVec3::new(0.0, 0.0, 2.0), Some(c));

        let before = positions(&skeleton);
        let locked = [false, false, true, false, false];
        let moving = [false, false, false, false, true];
        let mut targets = before.clone();
        targets[4] = DVec3::new(0.0, 1.0, 1.5);

        let mut solver = IkSolver::new(&mut skeleton, &locked, &moving);
        assert_eq!(solver.behavior()[2], JointBehavior::Fixed);
        assert_eq!(solver.behavior()[4], JointBehavior::Target);
        // 根未锁定但子树里有锁定关节：不平移
        assert_eq!(solver.behavior()[0], JointBehavior::Free);
        assert_eq!(solver.unknown_count(), 12);
        assert!(solver.solve(&targets, 200));

        let after = positions(&skeleton);
        assert!(after[2].distance(before[2]) <= 1e-6);
        assert!(after[4].distance(targets[4]) < 1e-3, "ended at {:?}", after[4]);
    }

    #[test]
    fn test_floating_root_reaches_target() {
        init_logger();
        // 没有锁定关节：根可以平移，目标超出骨骼长度也能到达
        let mut skeleton = Skeleton::new();
        let r = add(&mut skeleton, DVec3::ZERO, None);
        add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(r));
        let target = DVec3::new(0.5, 2.0, 3.0);

        let mut solver = IkSolver::new(&mut skeleton, &[false, false], &[false, true]);
        assert_eq!(solver.behavior()[0], JointBehavior::Floating);
        assert!(solver.solve(&[DVec3::ZERO, target], 200));
        assert!(skeleton.joints()[1].position().distance(target) < 1e-3);
        // 骨骼长度不变
        let bone = skeleton.joints()[1].position() - skeleton.joints()[0].position();
        assert!((bone.length() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_steps_keep_last_state() {
        let mut skeleton = Skeleton::new();
        let r = add(&mut skeleton, DVec3::ZERO, None);
        add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(r));
        let before = skeleton.clone();

        // 容差为负：任何候选步都会被判定为移动了固定关节
        let config = SolverConfig {
            fixed_tolerance: -1.0,
            ..SolverConfig::default()
        };
        let target = DVec3::new(0.0, 0.6, 0.8);
        let mut solver =
            IkSolver::with_config(&mut skeleton, &[true, false], &[false, true], config);
        // 步数不足以让 scale 衰减到收敛阈值以下
        assert!(!solver.solve(&[DVec3::ZERO, target], 10));
        assert_eq!(skeleton, before);
    }

    #[test]
    fn test_step_size_boost() {
        let config = SolverConfig::default();
        let forces = [1.0, 2.0, 0.5];

        // 方向一致时逐步放大，直到上限
        let mut step_size = 1.0;
        let mut sizes = Vec::new();
        for _ in 0..6 {
            step_size = boosted_step_size(step_size, Some(&forces[..]), &forces, &config);
            sizes.push(step_size);
        }
        assert!((sizes[0] - 1.5).abs() < 1e-12);
        assert!((sizes[1] - 2.25).abs() < 1e-12);
        assert!((sizes[2] - 3.375).abs() < 1e-12);
        assert_eq!(sizes[3], config.max_step_size);
        assert_eq!(sizes[5], config.max_step_size);

        // 方向变化或没有上一步时复位
        let reversed = [-1.0, 0.0, 0.0];
        assert_eq!(boosted_step_size(3.0, Some(&reversed[..]), &forces, &config), 1.0);
        assert_eq!(boosted_step_size(3.0, None, &forces, &config), 1.0);
    }

    #[test]
    fn test_classification() {
        // R - A - B - C，B 被拖动
        let mut skeleton = Skeleton::new();
        let r = add(&mut skeleton, DVec3::ZERO, None);
        let a = add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(r));
        let b = add(&mut skeleton, DVec3::new(0.0, 0.0, 2.0), Some(a));
        add(&mut skeleton, DVec3::new(0.0, 0.0, 3.0), Some(b));
        let moving = [false, false, true, false];

        let solver = IkSolver::new(&mut skeleton, &[true, false, false, false], &moving);
        assert_eq!(
            solver.behavior(),
            &[
                JointBehavior::Fixed,
                JointBehavior::Free,
                JointBehavior::Target,
                JointBehavior::Floating
            ]
        );
        // 根固定，没有平移未知数；长度默认锁定
        assert_eq!(solver.unknown_count(), 9);

        let solver = IkSolver::new(&mut skeleton, &[false, true, false, false], &moving);
        assert_eq!(
            solver.behavior(),
            &[
                JointBehavior::Fixed,
                JointBehavior::Fixed,
                JointBehavior::Target,
                JointBehavior::Floating
            ]
        );
        // A 与父关节都固定：弯曲禁用，扭转仍可用
        assert_eq!(solver.enabled(1), DofMask::TWIST);

        // 未锁定的根可以平移
        let solver = IkSolver::new(&mut skeleton, &[false; 4], &moving);
        assert_eq!(solver.behavior()[0], JointBehavior::Floating);
        assert_eq!(solver.unknown_count(), 12);
    }

    #[test]
    fn test_forbid_twist_with_fixed_child() {
        let mut skeleton = Skeleton::new();
        let r = add(&mut skeleton, DVec3::ZERO, None);
        let a = add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(r));
        add(&mut skeleton, DVec3::new(0.0, 1.0, 1.0), Some(a));
        add(&mut skeleton, DVec3::new(1.0, 0.0, 1.0), Some(a));

        // A 的一个子关节被拖动，另一个锁定
        let solver = IkSolver::new(
            &mut skeleton,
            &[true, true, true, false],
            &[false, false, false, true],
        );
        assert!(!solver.enabled(1).contains(DofMask::TWIST));
        assert!(!solver.enabled(1).contains(DofMask::ANGLE1));
        assert!(solver.enabled(3).contains(DofMask::ANGLE1 | DofMask::ANGLE2));
    }

    #[test]
    fn test_cancel_keeps_consistent_state() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, DVec3::ZERO, None);
        let a = add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(root));
        add(&mut skeleton, DVec3::new(0.0, 0.0, 2.0), Some(a));
        let before = skeleton.clone();

        let targets = [DVec3::ZERO, DVec3::ZERO, DVec3::new(1.0, 1.0, 0.5)];
        let locked = [true, false, false];
        let moving = [false, false, true];

        // 立即取消：骨骼不变
        let mut solver = IkSolver::new(&mut skeleton, &locked, &moving);
        assert!(!solver.solve_with_cancel(&targets, 100, || true));
        assert_eq!(skeleton, before);

        // 三步后取消：骨骼与其 DOF 一致
        let mut calls = 0;
        let mut solver = IkSolver::new(&mut skeleton, &locked, &moving);
        let converged = solver.solve_with_cancel(&targets, 100, || {
            calls += 1;
            calls > 3
        });
        assert!(!converged);
        let mut recomputed = skeleton.clone();
        recomputed.update_coords();
        for (p, q) in positions(&skeleton).iter().zip(positions(&recomputed)) {
            assert!(p.distance(q) < 1e-12);
        }
        assert!(
            skeleton.joints()[2].position().distance(targets[2])
                < before.joints()[2].position().distance(targets[2])
        );
    }

    #[test]
    fn test_no_targets() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, DVec3::ZERO, None);
        add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(root));
        let before = skeleton.clone();

        let mut solver = IkSolver::new(&mut skeleton, &[false, false], &[false, false]);
        assert!(solver.solve(&[DVec3::ZERO; 2], 10));
        assert_eq!(skeleton, before);
    }

    #[test]
    fn test_length_dof() {
        let mut skeleton = Skeleton::new();
        let root = add(&mut skeleton, DVec3::ZERO, None);
        let a = add(&mut skeleton, DVec3::new(0.0, 0.0, 1.0), Some(root));
        skeleton.joint_mut(a).unwrap().length.fixed = false;

        // 目标在骨骼延长线上，只能靠伸长到达
        let target = DVec3::new(0.0, 0.0, 1.5);
        let mut solver = IkSolver::new(&mut skeleton, &[true, false], &[false, true]);
        assert!(solver.solve(&[DVec3::ZERO, target], 100));
        assert!(skeleton.joints()[1].position().distance(target) < 1e-3);
        assert!((skeleton.joints()[1].length.pos - 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-12);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-12);
    }
}
