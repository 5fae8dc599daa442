//! 二进制持久化
//!
//! 所有记录使用小端字节序，开头是 i16 版本号。
//! 读取时先把所有字段读进局部变量，整条记录解析成功后才构造对象。

mod registry;

pub use registry::{
    read_tagged, read_tagged_as, register_keyframe_type, write_tagged, KeyframeRegistry, Persist,
    ReadFn,
};

use std::io::{Read, Write};
use std::ops::RangeInclusive;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{DMat3, DVec3};

use crate::{PoseError, Result};

/// 单次读取允许预分配的最大元素数（防止损坏的计数字段导致巨量分配）
const MAX_PREALLOC: usize = 1 << 16;

/// 写入版本号
pub(crate) fn write_version<W: Write + ?Sized>(out: &mut W, version: i16) -> Result<()> {
    out.write_i16::<LittleEndian>(version)?;
    Ok(())
}

/// 读取并校验版本号
pub(crate) fn read_version<R: Read + ?Sized>(
    input: &mut R,
    kind: &'static str,
    supported: RangeInclusive<i16>,
) -> Result<i16> {
    let version = input.read_i16::<LittleEndian>()?;
    if !supported.contains(&version) {
        log::warn!("[persist] {} 版本 {} 不受支持", kind, version);
        return Err(PoseError::UnsupportedVersion { kind, version });
    }
    Ok(version)
}

pub(crate) fn write_count<W: Write + ?Sized>(out: &mut W, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| PoseError::Format(format!("Too many elements: {}", count)))?;
    out.write_u32::<LittleEndian>(count)?;
    Ok(())
}

pub(crate) fn read_count<R: Read + ?Sized>(input: &mut R) -> Result<usize> {
    Ok(input.read_u32::<LittleEndian>()? as usize)
}

/// 按计数预分配，计数过大时截断到上限
pub(crate) fn with_capacity<T>(count: usize) -> Vec<T> {
    Vec::with_capacity(count.min(MAX_PREALLOC))
}

pub(crate) fn write_string<W: Write + ?Sized>(out: &mut W, value: &str) -> Result<()> {
    write_count(out, value.len())?;
    out.write_all(value.as_bytes())?;
    Ok(())
}

pub(crate) fn read_string<R: Read + ?Sized>(input: &mut R) -> Result<String> {
    let len = read_count(input)?;
    let mut bytes = Vec::new();
    input.take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(PoseError::Format(format!(
            "String truncated: expected {} bytes, got {}",
            len,
            bytes.len()
        )));
    }
    String::from_utf8(bytes).map_err(|e| PoseError::Format(format!("Invalid UTF-8 string: {}", e)))
}

pub(crate) fn write_u8<W: Write + ?Sized>(out: &mut W, value: u8) -> Result<()> {
    out.write_u8(value)?;
    Ok(())
}

pub(crate) fn read_u8<R: Read + ?Sized>(input: &mut R) -> Result<u8> {
    Ok(input.read_u8()?)
}

pub(crate) fn write_bool<W: Write + ?Sized>(out: &mut W, value: bool) -> Result<()> {
    write_u8(out, value as u8)
}

pub(crate) fn read_bool<R: Read + ?Sized>(input: &mut R) -> Result<bool> {
    Ok(read_u8(input)? != 0)
}

pub(crate) fn write_u32<W: Write + ?Sized>(out: &mut W, value: u32) -> Result<()> {
    out.write_u32::<LittleEndian>(value)?;
    Ok(())
}

pub(crate) fn read_u32<R: Read + ?Sized>(input: &mut R) -> Result<u32> {
    Ok(input.read_u32::<LittleEndian>()?)
}

pub(crate) fn write_f64<W: Write + ?Sized>(out: &mut W, value: f64) -> Result<()> {
    out.write_f64::<LittleEndian>(value)?;
    Ok(())
}

pub(crate) fn read_f64<R: Read + ?Sized>(input: &mut R) -> Result<f64> {
    Ok(input.read_f64::<LittleEndian>()?)
}

pub(crate) fn write_i32<W: Write + ?Sized>(out: &mut W, value: i32) -> Result<()> {
    out.write_i32::<LittleEndian>(value)?;
    Ok(())
}

pub(crate) fn read_i32<R: Read + ?Sized>(input: &mut R) -> Result<i32> {
    Ok(input.read_i32::<LittleEndian>()?)
}

pub(crate) fn write_vec3<W: Write + ?Sized>(out: &mut W, v: DVec3) -> Result<()> {
    write_f64(out, v.x)?;
    write_f64(out, v.y)?;
    write_f64(out, v.z)
}

pub(crate) fn read_vec3<R: Read + ?Sized>(input: &mut R) -> Result<DVec3> {
    let x = read_f64(input)?;
    let y = read_f64(input)?;
    let z = read_f64(input)?;
    Ok(DVec3::new(x, y, z))
}

/// 按列写入 3x3 矩阵
pub(crate) fn write_mat3<W: Write + ?Sized>(out: &mut W, m: &DMat3) -> Result<()> {
    write_vec3(out, m.x_axis)?;
    write_vec3(out, m.y_axis)?;
    write_vec3(out, m.z_axis)
}

pub(crate) fn read_mat3<R: Read + ?Sized>(input: &mut R) -> Result<DMat3> {
    let x = read_vec3(input)?;
    let y = read_vec3(input)?;
    let z = read_vec3(input)?;
    Ok(DMat3::from_cols(x, y, z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_version_range() {
        let mut buf = Vec::new();
        write_version(&mut buf, 3).unwrap();
        let err = read_version(&mut Cursor::new(&buf), "Test", 0..=2).unwrap_err();
        assert!(matches!(err, PoseError::UnsupportedVersion { kind: "Test", version: 3 }));
        assert_eq!(read_version(&mut Cursor::new(&buf), "Test", 0..=3).unwrap(), 3);
    }

    #[test]
    fn test_truncated_string() {
        let mut buf = Vec::new();
        write_count(&mut buf, 10).unwrap();
        buf.extend_from_slice(b"abc");
        assert!(matches!(
            read_string(&mut Cursor::new(&buf)),
            Err(PoseError::Format(_))
        ));
    }
}
