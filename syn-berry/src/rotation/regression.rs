//! 一元线性回归的斜率估计.
//!
//! 三种方式都只关心斜率 `dy / dx`. 所有 `x` 相同 (竖直线) 时斜率无定义, 返回 `None`.

use ordered_float::OrderedFloat;

/// 中位数. 偶数长度时取中间两数的平均值. 空切片返回 `None`.
///
/// # 注意
///
/// 会重排 `values`.
pub fn median(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (lower, &mut upper, _) =
        values.select_nth_unstable_by_key(mid, |&v| OrderedFloat(v));
    if n % 2 == 1 {
        return Some(upper);
    }
    let below = lower
        .iter()
        .copied()
        .max_by_key(|&v| OrderedFloat(v))
        .unwrap_or(upper);
    Some((below + upper) / 2.0)
}

/// 普通最小二乘.
pub fn ols(xs: &[f64], ys: &[f64]) -> Option<f64> {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len() as f64;
    if xs.is_empty() {
        return None;
    }
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (&x, &y) in xs.iter().zip(ys) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx) * (x - mx);
    }
    (sxx > 0.0).then(|| sxy / sxx)
}

/// Theil-Sen: 所有 `x` 不同的点对斜率的中位数.
pub fn theil_sen(xs: &[f64], ys: &[f64]) -> Option<f64> {
    debug_assert_eq!(xs.len(), ys.len());
    let mut slopes = Vec::with_capacity(xs.len() * xs.len().saturating_sub(1) / 2);
    for i in 0..xs.len() {
        for j in i + 1..xs.len() {
            let dx = xs[j] - xs[i];
            if dx != 0.0 {
                slopes.push((ys[j] - ys[i]) / dx);
            }
        }
    }
    median(&mut slopes)
}

/// Siegel 重复中位数: 先对每个点求其与其它点斜率的中位数, 再对这些中位数取中位数.
pub fn siegel(xs: &[f64], ys: &[f64]) -> Option<f64> {
    debug_assert_eq!(xs.len(), ys.len());
    let mut medians = Vec::with_capacity(xs.len());
    let mut slopes = Vec::with_capacity(xs.len());
    for i in 0..xs.len() {
        slopes.clear();
        slopes.extend((0..xs.len()).filter_map(|j| {
            let dx = xs[j] - xs[i];
            (dx != 0.0).then(|| (ys[j] - ys[i]) / dx)
        }));
        if let Some(m) = median(&mut slopes) {
            medians.push(m);
        }
    }
    median(&mut medians)
}
