//! 姿势轨道
//!
//! 按帧索引存储关键帧，求值时在相邻关键帧之间混合。

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::ops::Bound::{Excluded, Unbounded};

use crate::gesture::{Actor, ActorKeyframe, Keyframe};
use crate::mesh::Mesh;
use crate::persist::{
    read_bool, read_count, read_string, read_tagged_as, read_u32, read_u8, read_version,
    write_bool, write_count, write_string, write_tagged, write_u32, write_u8, write_version,
    Persist,
};
use crate::{PoseError, Result};

/// 关键帧之间的插值方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Smoothing {
    /// 保持前一个关键帧
    Discrete,
    /// 相邻两帧线性混合
    #[default]
    Linear,
    /// 四帧 Catmull-Rom 混合
    Smooth,
}

impl Smoothing {
    fn to_byte(self) -> u8 {
        match self {
            Smoothing::Discrete => 0,
            Smoothing::Linear => 1,
            Smoothing::Smooth => 2,
        }
    }

    fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Smoothing::Discrete),
            1 => Ok(Smoothing::Linear),
            2 => Ok(Smoothing::Smooth),
            other => Err(PoseError::Format(format!("Invalid smoothing mode: {}", other))),
        }
    }
}

/// Catmull-Rom 基函数权重，顺序为 p0..p3
fn catmull_rom_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t + 2.0 * t2 - t3),
        0.5 * (2.0 - 5.0 * t2 + 3.0 * t3),
        0.5 * (t + 4.0 * t2 - 3.0 * t3),
        0.5 * (-t2 + t3),
    ]
}

/// 姿势轨道
#[derive(Clone, Debug)]
pub struct PoseTrack<K: Keyframe> {
    pub name: String,
    pub enabled: bool,
    pub smoothing: Smoothing,
    /// 关键帧映射（帧索引 -> 关键帧）
    keyframes: BTreeMap<u32, K>,
}

impl<K: Keyframe> PoseTrack<K> {
    const VERSION: i16 = 0;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            smoothing: Smoothing::default(),
            keyframes: BTreeMap::new(),
        }
    }

    /// 插入关键帧，返回被替换的旧关键帧
    pub fn insert_keyframe(&mut self, frame_index: u32, keyframe: K) -> Option<K> {
        self.keyframes.insert(frame_index, keyframe)
    }

    /// 移除关键帧
    pub fn remove_keyframe(&mut self, frame_index: u32) -> Option<K> {
        self.keyframes.remove(&frame_index)
    }

    /// 查找精确帧
    pub fn find(&self, frame_index: u32) -> Option<&K> {
        self.keyframes.get(&frame_index)
    }

    pub fn keyframes(&self) -> impl Iterator<Item = (u32, &K)> + '_ {
        self.keyframes.iter().map(|(&i, k)| (i, k))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// 最大帧索引（空轨道为 0）
    pub fn max_frame_index(&self) -> u32 {
        self.keyframes.keys().next_back().copied().unwrap_or(0)
    }

    /// 查找最近的前后帧索引：`prev <= frame_index < next`
    pub fn search_closest(&self, frame_index: u32) -> (Option<u32>, Option<u32>) {
        let prev = self.keyframes.range(..=frame_index).next_back().map(|(&i, _)| i);
        let next = self
            .keyframes
            .range((Excluded(frame_index), Unbounded))
            .next()
            .map(|(&i, _)| i);
        (prev, next)
    }

    /// 求值指定时刻（可以是帧间的小数）
    ///
    /// 第一个关键帧之前取第一个关键帧，最后一个之后取最后一个。空轨道返回 None。
    pub fn evaluate(&self, frame: f64) -> Option<K> {
        let (first, _) = self.keyframes.first_key_value()?;
        if frame < f64::from(*first) {
            return Some(self.keyframes[first].clone());
        }

        let floor = frame.floor().min(f64::from(u32::MAX)) as u32;
        let (prev, next) = match self.search_closest(floor) {
            (Some(prev), Some(next)) => (prev, next),
            (Some(prev), None) => return Some(self.keyframes[&prev].clone()),
            (None, Some(next)) => return Some(self.keyframes[&next].clone()),
            (None, None) => return None,
        };

        let p1 = &self.keyframes[&prev];
        if self.smoothing == Smoothing::Discrete {
            return Some(p1.clone());
        }

        let p2 = &self.keyframes[&next];
        let t = (frame - f64::from(prev)) / f64::from(next - prev);
        match self.smoothing {
            Smoothing::Linear | Smoothing::Discrete => Some(p1.blend(&[p2], &[1.0 - t, t])),
            Smoothing::Smooth => {
                // 两端重复端点关键帧
                let p0 = self
                    .keyframes
                    .range(..prev)
                    .next_back()
                    .map_or(p1, |(_, k)| k);
                let p3 = self
                    .keyframes
                    .range((Excluded(next), Unbounded))
                    .next()
                    .map_or(p2, |(_, k)| k);
                let [w0, w1, w2, w3] = catmull_rom_weights(t);
                Some(p1.blend(&[p0, p2, p3], &[w1, w0, w2, w3]))
            }
        }
    }
}

impl PoseTrack<ActorKeyframe> {
    /// 把指定时刻的姿势应用到 Actor
    ///
    /// 轨道禁用或为空时不做任何修改，返回 false。
    pub fn apply<M: Mesh>(&self, actor: &mut Actor<M>, frame: f64) -> bool {
        if !self.enabled {
            return false;
        }
        match self.evaluate(frame) {
            Some(key) => {
                actor.set_pose_keyframe(key);
                true
            }
            None => false,
        }
    }
}

impl<K: Keyframe + Persist> PoseTrack<K> {
    /// 写入轨道，关键帧带类型标签
    pub fn write(&self, out: &mut dyn Write) -> Result<()> {
        write_version(out, Self::VERSION)?;
        write_string(out, &self.name)?;
        write_bool(out, self.enabled)?;
        write_u8(out, self.smoothing.to_byte())?;
        write_count(out, self.keyframes.len())?;
        for (&frame_index, key) in &self.keyframes {
            write_u32(out, frame_index)?;
            write_tagged(key, out)?;
        }
        Ok(())
    }

    pub fn read(input: &mut dyn Read) -> Result<Self> {
        read_version(input, "PoseTrack", 0..=Self::VERSION)?;
        let name = read_string(input)?;
        let enabled = read_bool(input)?;
        let smoothing = Smoothing::from_byte(read_u8(input)?)?;
        let count = read_count(input)?;
        let mut keyframes = BTreeMap::new();
        for _ in 0..count {
            let frame_index = read_u32(input)?;
            let key: K = read_tagged_as(input)?;
            if keyframes.insert(frame_index, key).is_some() {
                return Err(PoseError::Format(format!(
                    "Duplicate keyframe at frame {}",
                    frame_index
                )));
            }
        }
        Ok(Self {
            name,
            enabled,
            smoothing,
            keyframes,
        })
    }
}
