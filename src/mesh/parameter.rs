//! 纹理参数值
//!
//! 四种取值方式：常量、逐顶点、逐面、逐面顶点。
//! 混合时按偏移混合：`base + Σ w_i * (other_i - base)`。

use std::io::{Read, Write};

use crate::persist::{
    read_count, read_f64, read_u8, with_capacity, write_count, write_f64, write_u8,
};
use crate::{PoseError, Result};

/// 纹理参数值
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    Constant(f64),
    PerVertex(Vec<f64>),
    PerFace(Vec<f64>),
    /// 每个面的每个顶点
    PerFaceVertex(Vec<Vec<f64>>),
}

impl ParameterValue {
    fn tag(&self) -> u8 {
        match self {
            ParameterValue::Constant(_) => 0,
            ParameterValue::PerVertex(_) => 1,
            ParameterValue::PerFace(_) => 2,
            ParameterValue::PerFaceVertex(_) => 3,
        }
    }

    /// 以自身为基准的加权混合
    ///
    /// 种类或长度与基准不同的项被跳过。
    pub fn blend(&self, others: &[&ParameterValue], weights: &[f64]) -> ParameterValue {
        assert_eq!(others.len(), weights.len(), "value and weight counts differ");

        let mut result = self.clone();
        for (other, &w) in others.iter().zip(weights) {
            match (&mut result, self, *other) {
                (
                    ParameterValue::Constant(out),
                    ParameterValue::Constant(base),
                    ParameterValue::Constant(v),
                ) => {
                    *out += w * (v - base);
                }
                (
                    ParameterValue::PerVertex(out),
                    ParameterValue::PerVertex(base),
                    ParameterValue::PerVertex(v),
                )
                | (
                    ParameterValue::PerFace(out),
                    ParameterValue::PerFace(base),
                    ParameterValue::PerFace(v),
                ) if v.len() == base.len() => {
                    add_offsets(out, base, v, w);
                }
                (
                    ParameterValue::PerFaceVertex(out),
                    ParameterValue::PerFaceVertex(base),
                    ParameterValue::PerFaceVertex(v),
                ) if v.len() == base.len()
                    && v.iter().zip(base).all(|(a, b)| a.len() == b.len()) =>
                {
                    for ((o, b), x) in out.iter_mut().zip(base).zip(v) {
                        add_offsets(o, b, x, w);
                    }
                }
                _ => {
                    log::warn!(
                        "[parameter] 参数值种类不一致，跳过混合项: {} vs {}",
                        self.tag(),
                        other.tag()
                    );
                }
            }
        }
        result
    }

    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        write_u8(out, self.tag())?;
        match self {
            ParameterValue::Constant(v) => write_f64(out, *v)?,
            ParameterValue::PerVertex(values) | ParameterValue::PerFace(values) => {
                write_values(out, values)?;
            }
            ParameterValue::PerFaceVertex(faces) => {
                write_count(out, faces.len())?;
                for face in faces {
                    write_values(out, face)?;
                }
            }
        }
        Ok(())
    }

    pub fn read<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        Ok(match read_u8(input)? {
            0 => ParameterValue::Constant(read_f64(input)?),
            1 => ParameterValue::PerVertex(read_values(input)?),
            2 => ParameterValue::PerFace(read_values(input)?),
            3 => {
                let count = read_count(input)?;
                let mut faces = with_capacity(count);
                for _ in 0..count {
                    faces.push(read_values(input)?);
                }
                ParameterValue::PerFaceVertex(faces)
            }
            other => {
                return Err(PoseError::Format(format!(
                    "Unknown parameter value kind: {}",
                    other
                )))
            }
        })
    }
}

fn add_offsets(out: &mut [f64], base: &[f64], values: &[f64], weight: f64) {
    for ((o, b), v) in out.iter_mut().zip(base).zip(values) {
        *o += weight * (v - b);
    }
}

fn write_values<W: Write + ?Sized>(out: &mut W, values: &[f64]) -> Result<()> {
    write_count(out, values.len())?;
    for &v in values {
        write_f64(out, v)?;
    }
    Ok(())
}

fn read_values<R: Read + ?Sized>(input: &mut R) -> Result<Vec<f64>> {
    let count = read_count(input)?;
    let mut values = with_capacity(count);
    for _ in 0..count {
        values.push(read_f64(input)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_blend_constant() {
        let base = ParameterValue::Constant(1.0);
        let a = ParameterValue::Constant(3.0);
        let b = ParameterValue::Constant(0.0);
        let result = base.blend(&[&a, &b], &[0.5, 0.5]);
        // 1 + 0.5*2 + 0.5*(-1)
        assert_eq!(result, ParameterValue::Constant(1.5));
    }

    #[test]
    fn test_blend_per_face_vertex() {
        let base = ParameterValue::PerFaceVertex(vec![vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]]);
        let other = ParameterValue::PerFaceVertex(vec![vec![1.0, 2.0, 3.0], vec![1.0, 1.0, 3.0]]);
        let result = base.blend(&[&other], &[0.5]);
        assert_eq!(
            result,
            ParameterValue::PerFaceVertex(vec![vec![0.5, 1.0, 1.5], vec![1.0, 1.0, 2.0]])
        );
    }

    #[test]
    fn test_blend_mismatch_keeps_base() {
        let base = ParameterValue::PerVertex(vec![1.0, 2.0]);
        let wrong_kind = ParameterValue::PerFace(vec![5.0, 5.0]);
        let wrong_len = ParameterValue::PerVertex(vec![5.0]);
        let result = base.blend(&[&wrong_kind, &wrong_len], &[1.0, 1.0]);
        assert_eq!(result, base);
    }

    #[test]
    fn test_round_trip() {
        let values = [
            ParameterValue::Constant(-2.5),
            ParameterValue::PerVertex(vec![1.0, 2.0, 3.0]),
            ParameterValue::PerFace(vec![]),
            ParameterValue::PerFaceVertex(vec![vec![0.25; 3], vec![0.5, 0.75, 1.0]]),
        ];
        let mut buf = Vec::new();
        for value in &values {
            value.write(&mut buf).unwrap();
        }
        let mut cursor = Cursor::new(&buf);
        for value in &values {
            assert_eq!(&ParameterValue::read(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn test_unknown_kind() {
        let buf = [9u8];
        assert!(matches!(
            ParameterValue::read(&mut Cursor::new(&buf[..])),
            Err(PoseError::Format(_))
        ));
    }
}
