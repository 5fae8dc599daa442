//! 稠密最小二乘
//!
//! IK 单步与手势权重拟合共用的截断 SVD 求解。

use nalgebra::{DMatrix, DVector};

/// 截断 SVD 最小二乘求解 `a * x ≈ b`
///
/// 小于 `cutoff * σ_max` 的奇异值视为零，得到最小范数解。
/// 矩阵为空或全零时返回零向量。
pub fn solve_least_squares(a: &DMatrix<f64>, b: &DVector<f64>, cutoff: f64) -> DVector<f64> {
    let cols = a.ncols();
    if a.nrows() == 0 || cols == 0 {
        return DVector::zeros(cols);
    }

    let svd = a.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    if !(max_sv > 0.0) || !max_sv.is_finite() {
        return DVector::zeros(cols);
    }

    match svd.solve(b, cutoff * max_sv) {
        Ok(x) => x,
        Err(e) => {
            log::warn!("[linalg] SVD 求解失败: {}", e);
            DVector::zeros(cols)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_system() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        let b = DVector::from_vec(vec![2.0, 2.0]);
        let x = solve_least_squares(&a, &b, 0.01);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_cutoff_drops_weak_direction() {
        // 第二个奇异值只有最大值的 0.5%，被 0.01 截断
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.005]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        let x = solve_least_squares(&a, &b, 0.01);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert_eq!(x[1], 0.0);
    }

    #[test]
    fn test_overdetermined_and_empty() {
        // 三个方程两个未知数，最小二乘
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 1.0, 2.0]);
        let x = solve_least_squares(&a, &b, 0.01);
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] - 1.0).abs() < 1e-9);

        let empty = DMatrix::<f64>::zeros(0, 3);
        let x = solve_least_squares(&empty, &DVector::zeros(0), 0.01);
        assert_eq!(x.len(), 3);
        assert!(x.iter().all(|v| *v == 0.0));
    }
}
