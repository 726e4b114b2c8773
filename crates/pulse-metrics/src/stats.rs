//! 百分位计算

/// 线性插值百分位
///
/// 输入必须已按升序排序。秩为 `p/100 * (n-1)`，
/// 落在两个样本之间时按距离线性插值。
///
/// 空切片返回 0.0，单元素切片返回该元素。
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let max_rank = (sorted.len() - 1) as f64;
    let rank = (p / 100.0 * max_rank).clamp(0.0, max_rank);
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;

    if low == high {
        return sorted[low];
    }

    let weight = rank - low as f64;
    sorted[low] + (sorted[high] - sorted[low]) * weight
}
