//! 自由度（DOF）
//!
//! 关节的单个可动画标量参数：弯曲角、扭转角或骨骼长度。
//! 角度单位为度。

use std::io::{Read, Write};

use bitflags::bitflags;

use crate::persist::{read_f64, read_u8, read_version, write_f64, write_u8, write_version};
use crate::{PoseError, Result};

bitflags! {
    /// DOF 布尔属性（持久化编码用）
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DofFlags: u8 {
        /// 锁定，不参与 IK
        const FIXED = 1 << 0;
        /// 启用舒适范围
        const COMFORT = 1 << 1;
        /// 循环（整圈回绕）
        const LOOP = 1 << 2;
    }
}

/// 自由度
///
/// 不变量：启用舒适范围时 `min <= min_comfort <= max_comfort <= max`；
/// 循环 DOF 的 `max - min == 360`。
#[derive(Clone, Debug, PartialEq)]
pub struct Dof {
    /// 当前值
    pub pos: f64,
    /// 硬下限
    pub min: f64,
    /// 硬上限
    pub max: f64,
    /// 舒适范围下限
    pub min_comfort: f64,
    /// 舒适范围上限
    pub max_comfort: f64,
    /// 刚度 [0, 1]，1 表示完全不动
    pub stiffness: f64,
    /// 是否锁定
    pub fixed: bool,
    /// 是否启用舒适范围
    pub comfort: bool,
    /// 是否循环
    pub looping: bool,
}

impl Dof {
    const VERSION: i16 = 1;

    /// 创建新的 DOF，舒适范围与硬范围相同
    pub fn new(min: f64, max: f64, pos: f64) -> Self {
        Self {
            pos,
            min,
            max,
            min_comfort: min,
            max_comfort: max,
            stiffness: 0.0,
            fixed: false,
            comfort: false,
            looping: false,
        }
    }

    /// 整圈循环的角度 DOF
    pub fn looping_angle(min: f64, pos: f64) -> Self {
        let mut dof = Self::new(min, min + 360.0, pos);
        dof.looping = true;
        dof.set(pos);
        dof
    }

    /// 设置当前值
    ///
    /// 循环 DOF 回绕到 `[min, max)`，否则钳制到 `[min, max]`。
    /// 上下限颠倒时不会 panic，结果落在 `max`。
    pub fn set(&mut self, value: f64) {
        let range = self.max - self.min;
        self.pos = if value >= self.min && value < self.max {
            value
        } else if self.looping && range > 0.0 && value.is_finite() {
            let wrapped = self.min + (value - self.min).rem_euclid(range);
            // rem_euclid 在极小负数上可能返回 range 本身
            if wrapped >= self.max {
                self.min
            } else {
                wrapped
            }
        } else {
            value.max(self.min).min(self.max)
        };
    }

    /// 从本 DOF 到另一个 DOF 的偏移
    ///
    /// 循环 DOF 的差值回绕到 `[-range/2, range/2)`，走最短路径。
    pub fn find_offset(&self, other: &Dof) -> f64 {
        let diff = other.pos - self.pos;
        if !self.looping {
            return diff;
        }
        let range = self.max - self.min;
        if range <= 0.0 {
            return diff;
        }
        let half = 0.5 * range;
        (diff + half).rem_euclid(range) - half
    }

    /// 舒适范围外的线性衰减系数
    ///
    /// 当前值已超出舒适范围且力继续向外推时，按到硬限位的剩余比例缩放，
    /// 到达硬限位时为 0。
    fn comfort_ramp(&self, force: f64) -> f64 {
        if !self.comfort {
            return 1.0;
        }
        if force > 0.0 && self.pos > self.max_comfort {
            let span = self.max - self.max_comfort;
            if span <= 0.0 {
                return 0.0;
            }
            ((self.max - self.pos) / span).clamp(0.0, 1.0)
        } else if force < 0.0 && self.pos < self.min_comfort {
            let span = self.min_comfort - self.min;
            if span <= 0.0 {
                return 0.0;
            }
            ((self.pos - self.min) / span).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    /// 按刚度和舒适范围缩放后的力（软限位）
    pub fn scaled_force(&self, force: f64) -> f64 {
        force * (1.0 - self.stiffness) * self.comfort_ramp(force)
    }

    /// 力的缩放系数
    ///
    /// 非循环 DOF 在硬限位上继续向外推时为 0，
    /// 否则为 `(1 - stiffness)` 乘舒适范围衰减。用于构造雅可比列缩放。
    pub fn force_scale(&self, force: f64) -> f64 {
        if !self.looping
            && ((force > 0.0 && self.pos >= self.max) || (force < 0.0 && self.pos <= self.min))
        {
            return 0.0;
        }
        (1.0 - self.stiffness) * self.comfort_ramp(force)
    }

    /// 裁剪力，保证 `pos + force` 不越过硬限位（循环 DOF 不裁剪）
    pub fn clipped_force(&self, force: f64) -> f64 {
        if self.looping {
            return force;
        }
        if self.pos + force > self.max {
            self.max - self.pos
        } else if self.pos + force < self.min {
            self.min - self.pos
        } else {
            force
        }
    }

    fn flags(&self) -> DofFlags {
        let mut flags = DofFlags::empty();
        flags.set(DofFlags::FIXED, self.fixed);
        flags.set(DofFlags::COMFORT, self.comfort);
        flags.set(DofFlags::LOOP, self.looping);
        flags
    }

    /// 写入
    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        write_version(out, Self::VERSION)?;
        write_f64(out, self.min)?;
        write_f64(out, self.max)?;
        write_f64(out, self.pos)?;
        write_f64(out, self.min_comfort)?;
        write_f64(out, self.max_comfort)?;
        write_f64(out, self.stiffness)?;
        write_u8(out, self.flags().bits())
    }

    /// 读取
    ///
    /// 版本 0 的记录没有舒适范围和刚度字段。
    /// 违反上下限、舒适范围或循环不变量的记录返回 `PoseError::Format`。
    pub fn read<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        let version = read_version(input, "DOF", 0..=Self::VERSION)?;
        let min = read_f64(input)?;
        let max = read_f64(input)?;
        let pos = read_f64(input)?;
        let (min_comfort, max_comfort, stiffness) = if version >= 1 {
            (read_f64(input)?, read_f64(input)?, read_f64(input)?)
        } else {
            (min, max, 0.0)
        };
        let flags = DofFlags::from_bits_truncate(read_u8(input)?);

        let dof = Self {
            pos,
            min,
            max,
            min_comfort,
            max_comfort,
            stiffness,
            fixed: flags.contains(DofFlags::FIXED),
            comfort: flags.contains(DofFlags::COMFORT),
            looping: flags.contains(DofFlags::LOOP),
        };
        dof.validate()?;
        Ok(dof)
    }

    /// 检查持久化记录的不变量
    fn validate(&self) -> Result<()> {
        let invalid = |what: &str| {
            Err(PoseError::Format(format!(
                "Invalid DOF {}: min={} max={} pos={}",
                what, self.min, self.max, self.pos
            )))
        };
        // 包含 NaN 的比较都为 false
        if !(self.min <= self.max) {
            return invalid("limits");
        }
        if self.pos.is_nan() {
            return invalid("value");
        }
        if !(0.0..=1.0).contains(&self.stiffness) {
            return invalid("stiffness");
        }
        if self.comfort
            && !(self.min <= self.min_comfort
                && self.min_comfort <= self.max_comfort
                && self.max_comfort <= self.max)
        {
            return invalid("comfort range");
        }
        if self.looping && ((self.max - self.min) - 360.0).abs() > 1e-9 {
            return invalid("loop range");
        }
        Ok(())
    }
}
