//! Percentile interpolation.
//!
//! Linear interpolation between closest ranks ("type 7", the R and NumPy
//! default): for `n` sorted values and probability `p`, with
//! `h = (n - 1) * p`, the result is `x[⌊h⌋] + (h - ⌊h⌋) * (x[⌊h⌋ + 1] - x[⌊h⌋])`.
//! A single value is its own percentile at every `p`.

use sectorscope_core::Breakpoint;

/// Sort in place with a total order so NaN-free input yields one fixed order
/// regardless of arrival order.
pub fn sort_values(values: &mut [f64]) {
    values.sort_by(|a, b| a.total_cmp(b));
}

/// Interpolated percentile of already-sorted values.
pub fn interpolate_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let h = last as f64 * p.clamp(0.0, 1.0);
    let lo = (h.floor() as usize).min(last);
    let hi = (lo + 1).min(last);
    let frac = h - lo as f64;
    let (a, b) = (sorted[lo], sorted[hi]);
    if frac == 0.0 || a == b {
        return Some(a);
    }
    // Clamp guards against a rounding step past the upper order statistic.
    Some((a + frac * (b - a)).clamp(a, b))
}

/// Breakpoints for every probability in `points`, in the same order.
///
/// `values` is sorted in place. Returns an empty vector for empty input.
pub fn breakpoints(values: &mut [f64], points: &[f64]) -> Vec<Breakpoint> {
    if values.is_empty() {
        return Vec::new();
    }
    sort_values(values);
    points
        .iter()
        .filter_map(|&p| interpolate_sorted(values, p).map(|value| Breakpoint { p, value }))
        .collect()
}
