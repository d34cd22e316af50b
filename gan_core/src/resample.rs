//! Linear re-timing of a sample sequence onto a new length.
//!
//! Both sequences are laid on the half-open unit interval: source sample `i`
//! sits at `i / len(source)` and destination sample `j` at `j / target_len`.
//! Destination values are linearly interpolated between their neighbouring
//! source samples. Past the last source coordinate the last sample is held.

/// Re-time `samples` to exactly `target_len` values.
///
/// Equal lengths return an exact copy so the `final` stage stays bit-stable.
/// An empty input yields `target_len` zeros.
pub fn resample(samples: &[f32], target_len: usize) -> Vec<f32> {
    let src_len = samples.len();
    if src_len == target_len {
        return samples.to_vec();
    }
    if src_len == 0 {
        return vec![0.0; target_len];
    }

    let last = src_len - 1;
    let scale = src_len as f64 / target_len as f64;
    let mut out = Vec::with_capacity(target_len);
    for j in 0..target_len {
        // Destination coordinate expressed in source-index units.
        let pos = j as f64 * scale;
        let k = pos.floor() as usize;
        if k >= last {
            out.push(samples[last]);
            continue;
        }
        let frac = pos - k as f64;
        let a = samples[k] as f64;
        let b = samples[k + 1] as f64;
        out.push((a + (b - a) * frac) as f32);
    }
    out
}
