//! Cosine kernels over packed vectors.
//!
//! The hot kernels accumulate in eight independent lanes so the optimizer
//! can keep the loop in wide vector registers; the scalar reference
//! implementation exists for the accuracy tests. Half-precision vectors are
//! widened lane by lane after the query has itself been converted to half,
//! so both sides carry the same precision loss.

use half::f16;
use tracing::warn;

const LANES: usize = 8;

/// Kernel identifier recorded in the per-project metadata table.
pub fn kernel_name(precision: crate::config::Precision) -> &'static str {
    match precision {
        crate::config::Precision::Single => "unrolled-f32x8",
        crate::config::Precision::Half => "f16-widen-f32x8",
    }
}

/// Eight-lane unrolled cosine similarity over single-precision slices.
pub fn cosine_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = [0f32; LANES];
    let mut norm_a = [0f32; LANES];
    let mut norm_b = [0f32; LANES];

    let chunks = a.len() / LANES;
    for c in 0..chunks {
        let base = c * LANES;
        for l in 0..LANES {
            let x = a[base + l];
            let y = b[base + l];
            dot[l] += x * y;
            norm_a[l] += x * x;
            norm_b[l] += y * y;
        }
    }

    let mut d: f32 = dot.iter().sum();
    let mut na: f32 = norm_a.iter().sum();
    let mut nb: f32 = norm_b.iter().sum();

    for i in chunks * LANES..a.len() {
        d += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }

    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        d / denom
    }
}

/// Cosine over half-precision slices, widening each lane to f32.
pub fn cosine_f16(a: &[f16], b: &[f16]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = [0f32; LANES];
    let mut norm_a = [0f32; LANES];
    let mut norm_b = [0f32; LANES];

    let chunks = a.len() / LANES;
    for c in 0..chunks {
        let base = c * LANES;
        for l in 0..LANES {
            let x = a[base + l].to_f32();
            let y = b[base + l].to_f32();
            dot[l] += x * y;
            norm_a[l] += x * x;
            norm_b[l] += y * y;
        }
    }

    let mut d: f32 = dot.iter().sum();
    let mut na: f32 = norm_a.iter().sum();
    let mut nb: f32 = norm_b.iter().sum();

    for i in chunks * LANES..a.len() {
        let x = a[i].to_f32();
        let y = b[i].to_f32();
        d += x * y;
        na += x * x;
        nb += y * y;
    }

    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        d / denom
    }
}

/// Scalar reference cosine, used by the accuracy tests.
pub fn cosine_reference(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f64;
    let mut na = 0f64;
    let mut nb = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        na += *x as f64 * *x as f64;
        nb += *y as f64 * *y as f64;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

/// Convert a query vector to half precision, zeroing non-finite lanes.
pub fn query_to_f16(query: &[f32]) -> Vec<f16> {
    let mut zeroed = 0usize;
    let converted = query
        .iter()
        .map(|&v| {
            let h = f16::from_f32(v);
            if h.is_finite() {
                h
            } else {
                zeroed += 1;
                f16::ZERO
            }
        })
        .collect();
    if zeroed > 0 {
        warn!(
            "Query conversion to half precision zeroed {} non-finite element(s)",
            zeroed
        );
    }
    converted
}

/// Decode a little-endian f32 blob.
pub fn blob_to_f32(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Decode a little-endian f16 blob.
pub fn blob_to_f16(blob: &[u8]) -> Vec<f16> {
    blob.chunks_exact(2)
        .map(|c| f16::from_bits(u16::from_le_bytes([c[0], c[1]])))
        .collect()
}

/// Encode f32 values as a little-endian blob (test fixtures and load paths).
pub fn f32_to_blob(values: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(values.len() * 4);
    for v in values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Encode f16 values as a little-endian blob.
pub fn f16_to_blob(values: &[f16]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(values.len() * 2);
    for v in values {
        blob.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    blob
}
