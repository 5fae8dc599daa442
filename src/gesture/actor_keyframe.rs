//! Actor 关键帧 - 手势 ID 到权重的稀疏映射

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::persist::{
    read_count, read_f64, read_i32, read_version, with_capacity, write_count, write_f64,
    write_i32, write_version, Persist,
};
use crate::{PoseError, Result};

use super::Keyframe;

/// Actor 关键帧
///
/// `ids` 与 `weights` 平行，ID 不重复。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActorKeyframe {
    ids: Vec<i32>,
    weights: Vec<f64>,
}

impl ActorKeyframe {
    pub const TYPE_TAG: &'static str = "ActorKeyframe";
    const VERSION: i16 = 0;

    /// 空关键帧（即默认姿势）
    pub fn new() -> Self {
        Self::default()
    }

    /// 由 `(id, weight)` 对创建，重复 ID 的权重相加
    pub fn from_weights(pairs: &[(i32, f64)]) -> Self {
        let mut key = Self::new();
        for &(id, weight) in pairs {
            match key.ids.iter().position(|&x| x == id) {
                Some(i) => key.weights[i] += weight,
                None => {
                    key.ids.push(id);
                    key.weights.push(weight);
                }
            }
        }
        key
    }

    #[inline]
    pub fn ids(&self) -> &[i32] {
        &self.ids
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, f64)> + '_ {
        self.ids.iter().copied().zip(self.weights.iter().copied())
    }

    pub fn weight_for(&self, id: i32) -> Option<f64> {
        self.ids
            .iter()
            .position(|&x| x == id)
            .map(|i| self.weights[i])
    }

    /// 设置某个手势的权重（不存在时追加）
    pub fn set_weight(&mut self, id: i32, weight: f64) {
        match self.ids.iter().position(|&x| x == id) {
            Some(i) => self.weights[i] = weight,
            None => {
                self.ids.push(id);
                self.weights.push(weight);
            }
        }
    }

    /// 删除某个手势（删除手势时调用）
    pub fn remove_gesture(&mut self, id: i32) {
        if let Some(i) = self.ids.iter().position(|&x| x == id) {
            self.ids.remove(i);
            self.weights.remove(i);
        }
    }

    fn add_weights_to_table(&self, scale: f64, table: &mut BTreeMap<i32, f64>) {
        for (id, weight) in self.iter() {
            *table.entry(id).or_insert(0.0) += scale * weight;
        }
    }

    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        write_version(out, Self::VERSION)?;
        write_count(out, self.ids.len())?;
        for (id, weight) in self.iter() {
            write_i32(out, id)?;
            write_f64(out, weight)?;
        }
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        read_version(input, "ActorKeyframe", 0..=Self::VERSION)?;
        let count = read_count(input)?;
        let mut ids = with_capacity(count);
        let mut weights = with_capacity(count);
        for _ in 0..count {
            let id = read_i32(input)?;
            if ids.contains(&id) {
                return Err(PoseError::Format(format!(
                    "Duplicate gesture id {} in keyframe",
                    id
                )));
            }
            ids.push(id);
            weights.push(read_f64(input)?);
        }
        Ok(Self { ids, weights })
    }
}

impl Keyframe for ActorKeyframe {
    fn graph_values(&self) -> Vec<f64> {
        self.weights.clone()
    }

    fn set_graph_values(&mut self, values: &[f64]) {
        for (w, &v) in self.weights.iter_mut().zip(values) {
            *w = v;
        }
    }

    /// 累加每个手势的加权权重，去掉恰好为 0 的项
    fn blend(&self, others: &[&Self], weights: &[f64]) -> Self {
        assert_eq!(
            weights.len(),
            others.len() + 1,
            "need one weight per keyframe"
        );

        let mut table = BTreeMap::new();
        self.add_weights_to_table(weights[0], &mut table);
        for (other, &w) in others.iter().zip(&weights[1..]) {
            other.add_weights_to_table(w, &mut table);
        }

        let (ids, weights) = table.into_iter().filter(|&(_, w)| w != 0.0).unzip();
        Self { ids, weights }
    }

    /// 与顺序无关的比较
    fn equals(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(id, w)| other.weight_for(id) == Some(w))
    }
}

impl Persist for ActorKeyframe {
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
