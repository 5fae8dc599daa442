//! Actor - 由命名手势组合姿势的对象
//!
//! 索引 0 永远是构造时创建的 "Default Pose"，作为混合基准，不能删除。

use std::io::{Read, Write};

use nalgebra::{DMatrix, DVector};

use crate::config::get_config;
use crate::linalg::solve_least_squares;
use crate::mesh::Mesh;
use crate::persist::{
    read_count, read_i32, read_string, read_tagged_as, read_version, with_capacity, write_count,
    write_i32, write_string, write_tagged, write_version,
};
use crate::skeleton::{DofKind, Skeleton};
use crate::{PoseError, Result};

use super::{ActorKeyframe, Gesture, MeshGesture};

/// 默认手势 ID
const DEFAULT_GESTURE_ID: i32 = 0;

/// 默认手势名称
const DEFAULT_GESTURE_NAME: &str = "Default Pose";

#[derive(Clone, Debug, PartialEq)]
struct GestureEntry {
    id: i32,
    name: String,
    gesture: MeshGesture,
}

/// Actor
#[derive(Clone, Debug)]
pub struct Actor<M: Mesh> {
    object: M,
    gestures: Vec<GestureEntry>,
    next_gesture_id: i32,
    current_pose: ActorKeyframe,
}

impl<M: Mesh> Actor<M> {
    const VERSION: i16 = 0;

    /// 包装对象，用其当前形状作为默认手势
    pub fn new(object: M) -> Self {
        let default = GestureEntry {
            id: DEFAULT_GESTURE_ID,
            name: DEFAULT_GESTURE_NAME.to_string(),
            gesture: MeshGesture::from_mesh(&object),
        };
        Self {
            object,
            gestures: vec![default],
            next_gesture_id: DEFAULT_GESTURE_ID + 1,
            current_pose: ActorKeyframe::new(),
        }
    }

    // ========================================
    // 对象
    // ========================================

    #[inline]
    pub fn object(&self) -> &M {
        &self.object
    }

    #[inline]
    pub fn object_mut(&mut self) -> &mut M {
        &mut self.object
    }

    pub fn into_object(self) -> M {
        self.object
    }

    // ========================================
    // 手势管理
    // ========================================

    #[inline]
    pub fn gesture_count(&self) -> usize {
        self.gestures.len()
    }

    pub fn gesture(&self, index: usize) -> Option<&MeshGesture> {
        self.gestures.get(index).map(|e| &e.gesture)
    }

    pub fn gesture_name(&self, index: usize) -> Option<&str> {
        self.gestures.get(index).map(|e| e.name.as_str())
    }

    pub fn gesture_id(&self, index: usize) -> Option<i32> {
        self.gestures.get(index).map(|e| e.id)
    }

    pub fn gesture_index(&self, id: i32) -> Option<usize> {
        self.gestures.iter().position(|e| e.id == id)
    }

    pub fn gesture_by_id(&self, id: i32) -> Option<&MeshGesture> {
        self.gesture_index(id).map(|i| &self.gestures[i].gesture)
    }

    /// 默认手势
    pub fn default_gesture(&self) -> &MeshGesture {
        &self.gestures[0].gesture
    }

    /// 添加手势，返回新 ID
    pub fn add_gesture(&mut self, gesture: MeshGesture, name: impl Into<String>) -> i32 {
        let id = self.next_gesture_id;
        self.next_gesture_id += 1;
        self.gestures.push(GestureEntry {
            id,
            name: name.into(),
            gesture,
        });
        id
    }

    /// 替换第 `index` 个手势
    pub fn set_gesture(&mut self, index: usize, gesture: MeshGesture) {
        self.gestures[index].gesture = gesture;
    }

    pub fn set_gesture_name(&mut self, index: usize, name: impl Into<String>) {
        self.gestures[index].name = name.into();
    }

    /// 删除手势（默认手势不能删除）
    ///
    /// 同时从当前姿势中移除该手势。找不到或试图删除默认手势时返回 false。
    pub fn delete_gesture_with_id(&mut self, id: i32) -> bool {
        if id == DEFAULT_GESTURE_ID {
            log::warn!("[actor] 默认手势不能删除");
            return false;
        }
        let Some(index) = self.gesture_index(id) else {
            return false;
        };
        self.gestures.remove(index);
        self.current_pose.remove_gesture(id);
        true
    }

    // ========================================
    // 姿势
    // ========================================

    #[inline]
    pub fn pose_keyframe(&self) -> &ActorKeyframe {
        &self.current_pose
    }

    /// 设置当前姿势并应用到对象
    pub fn set_pose_keyframe(&mut self, key: ActorKeyframe) {
        let gesture = self.blend_gestures(&key);
        gesture.apply_to(&mut self.object);
        self.current_pose = key;
    }

    /// 按关键帧权重混合手势（以默认手势为基准）
    ///
    /// 关键帧中不存在的手势 ID 被忽略。
    pub fn blend_gestures(&self, key: &ActorKeyframe) -> MeshGesture {
        let (gestures, weights) = self.resolve(key);
        self.default_gesture().blend(&gestures, &weights)
    }

    fn resolve(&self, key: &ActorKeyframe) -> (Vec<&MeshGesture>, Vec<f64>) {
        key.iter()
            .filter_map(|(id, weight)| match self.gesture_by_id(id) {
                Some(gesture) => Some((gesture, weight)),
                None => {
                    log::warn!("[actor] 姿势引用了不存在的手势 {}", id);
                    None
                }
            })
            .unzip()
    }

    // ========================================
    // 姿势重建
    // ========================================

    /// 求最能重现 `skeleton` 的非负手势权重
    ///
    /// 每行是一个 DOF 相对默认手势的偏移，每列是一个候选手势对应的偏移。
    /// 截断 SVD 求解后排除所有负权重的手势并重新求解，直到没有负权重。
    /// 这是近似的有效集非负最小二乘。没有可用手势时返回空关键帧（即默认姿势）。
    pub fn fit_pose(&self, skeleton: &Skeleton) -> ActorKeyframe {
        let cutoff = get_config().gesture_svd_cutoff;
        let base = self.default_gesture().skeleton();

        // 非根关节的每个 DOF 一行
        let rows: Vec<(i32, DofKind)> = base
            .joints()
            .iter()
            .filter(|j| !j.is_root())
            .flat_map(|j| DofKind::ALL.into_iter().map(move |k| (j.id(), k)))
            .collect();
        let offsets = |target: &Skeleton| -> DVector<f64> {
            DVector::from_iterator(
                rows.len(),
                rows.iter().map(|&(id, kind)| {
                    match (base.joint(id), target.joint(id)) {
                        (Some(b), Some(t)) => b.dof(kind).find_offset(t.dof(kind)),
                        _ => 0.0,
                    }
                }),
            )
        };

        let goal = offsets(skeleton);
        let candidates: Vec<(i32, DVector<f64>)> = self.gestures[1..]
            .iter()
            .map(|e| (e.id, offsets(e.gesture.skeleton())))
            .collect();

        let mut active: Vec<usize> = (0..candidates.len()).collect();
        while !active.is_empty() {
            let columns: Vec<DVector<f64>> =
                active.iter().map(|&c| candidates[c].1.clone()).collect();
            let a = DMatrix::from_columns(&columns);
            let x = solve_least_squares(&a, &goal, cutoff);

            if x.iter().all(|&w| w >= 0.0) {
                let pairs: Vec<(i32, f64)> = active
                    .iter()
                    .zip(x.iter())
                    .map(|(&c, &w)| (candidates[c].0, w))
                    .collect();
                return ActorKeyframe::from_weights(&pairs);
            }

            active = active
                .iter()
                .zip(x.iter())
                .filter(|(_, w)| **w >= 0.0)
                .map(|(&c, _)| c)
                .collect();
        }

        log::warn!("[actor] 没有可用于重建姿势的手势，使用默认姿势");
        ActorKeyframe::new()
    }

    /// 计算重建后的手势：权重来自 `fit_pose`，骨骼保持 `skeleton` 本身
    fn shaped_gesture(&self, skeleton: &Skeleton) -> (ActorKeyframe, MeshGesture) {
        let key = self.fit_pose(skeleton);
        let (gestures, weights) = self.resolve(&key);

        let base = self.default_gesture();
        let mut average = base.clone();
        average.set_skeleton(skeleton.clone());
        base.blend_surface(&mut average, &gestures, &weights);
        (key, average)
    }

    /// 骨骼被外部修改（例如 IK）后，用手势重建网格表面
    ///
    /// 返回拟合出的关键帧。
    pub fn shape_mesh_from_gestures(&self, mesh: &mut M) -> ActorKeyframe {
        let (key, gesture) = self.shaped_gesture(mesh.skeleton());
        gesture.apply_to(mesh);
        key
    }

    /// 对自身对象执行 `shape_mesh_from_gestures` 并记录为当前姿势
    pub fn shape_from_gestures(&mut self) -> ActorKeyframe {
        let (key, gesture) = self.shaped_gesture(self.object.skeleton());
        gesture.apply_to(&mut self.object);
        self.current_pose = key.clone();
        key
    }

    // ========================================
    // 持久化
    // ========================================

    /// 写入手势表和当前姿势（不含对象本身）
    pub fn write(&self, out: &mut dyn Write) -> Result<()> {
        write_version(out, Self::VERSION)?;
        write_i32(out, self.next_gesture_id)?;
        write_count(out, self.gestures.len())?;
        for entry in &self.gestures {
            write_i32(out, entry.id)?;
            write_string(out, &entry.name)?;
            write_tagged(&entry.gesture, out)?;
        }
        write_tagged(&self.current_pose, out)
    }

    /// 读取并包装 `object`
    pub fn read(input: &mut dyn Read, object: M) -> Result<Self> {
        read_version(input, "Actor", 0..=Self::VERSION)?;
        let next_gesture_id = read_i32(input)?;
        let count = read_count(input)?;
        let mut gestures: Vec<GestureEntry> = with_capacity(count);
        for _ in 0..count {
            let id = read_i32(input)?;
            if gestures.iter().any(|e| e.id == id) {
                return Err(PoseError::Format(format!("Duplicate gesture id {}", id)));
            }
            let name = read_string(input)?;
            let gesture: MeshGesture = read_tagged_as(input)?;
            gestures.push(GestureEntry { id, name, gesture });
        }
        let current_pose: ActorKeyframe = read_tagged_as(input)?;

        if gestures.first().map(|e| e.id) != Some(DEFAULT_GESTURE_ID) {
            return Err(PoseError::Format(
                "Actor has no default gesture".to_string(),
            ));
        }
        let max_id = gestures.iter().map(|e| e.id).max().unwrap_or(DEFAULT_GESTURE_ID);

        Ok(Self {
            object,
            gestures,
            next_gesture_id: next_gesture_id.max(max_id + 1),
            current_pose,
        })
    }
}
