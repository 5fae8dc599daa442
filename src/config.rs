//! 求解器配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 这些阈值都是经验值，调整前先跑一遍求解器测试。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 求解器配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct SolverConfig {
    // ========== 收敛判定 ==========
    /// 收敛距离：scale * 最大目标距离低于此值即停止，默认 1e-4
    pub convergence_distance: f64,
    /// 固定关节允许的最大漂移，默认 1e-6
    pub fixed_tolerance: f64,
    /// 单步最小进展比例（相对上一步距离），默认 0.001
    pub min_progress: f64,

    // ========== SVD 截断 ==========
    /// IK 求解时的奇异值截断比例，默认 0.01
    pub ik_svd_cutoff: f64,
    /// 手势权重拟合时的奇异值截断比例，默认 0.1
    pub gesture_svd_cutoff: f64,

    // ========== 自适应步长 ==========
    /// 相邻两步力向量余弦相似度超过此值时加大步长，默认 0.9
    pub step_boost_correlation: f64,
    /// 步长放大倍率，默认 1.5
    pub step_boost_factor: f64,
    /// 步长上限，默认 4.0
    pub max_step_size: f64,

    // ========== 轨道 ==========
    /// IK 轨道默认最大迭代次数，默认 100
    pub default_max_steps: usize,

    // ========== 调试 ==========
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            convergence_distance: 1e-4,
            fixed_tolerance: 1e-6,
            min_progress: 0.001,

            // IK 的截断比拟合更小：IK 需要尽量利用所有自由度，
            // 拟合则宁可丢掉近似共线的手势
            ik_svd_cutoff: 0.01,
            gesture_svd_cutoff: 0.1,

            step_boost_correlation: 0.9,
            step_boost_factor: 1.5,
            max_step_size: 4.0,

            default_max_steps: 100,

            debug_log: false,
        }
    }
}

/// 全局配置实例
static SOLVER_CONFIG: Lazy<RwLock<SolverConfig>> = Lazy::new(|| {
    RwLock::new(SolverConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> SolverConfig {
    SOLVER_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: SolverConfig) {
    *SOLVER_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *SOLVER_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = SolverConfig::default();
}
