//! Dot-product kernels.
//!
//! The SIMD paths use `wide::f32x8` (AVX2/SSE on x86_64, NEON on ARM). SIMD
//! reorders floating-point additions, so results differ from the scalar path by
//! ~1e-7 relative error. Set `COLSTORE_SIMD_DOT=0` to force the scalar path.

use half::f16;
use wide::f32x8;

/// Read once at first use.
static SIMD_DOT_ENABLED: once_cell::sync::Lazy<bool> = once_cell::sync::Lazy::new(|| {
    dotenvy::var("COLSTORE_SIMD_DOT")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true)
});

#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);
    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        let mut arr_a = [0f32; 8];
        let mut arr_b = [0f32; 8];
        arr_a.copy_from_slice(ca);
        arr_b.copy_from_slice(cb);
        sum += f32x8::from(arr_a) * f32x8::from(arr_b);
    }

    let mut scalar_sum: f32 = sum.reduce_add();
    for (a, b) in remainder_a.iter().zip(remainder_b) {
        scalar_sum += a * b;
    }
    scalar_sum
}

/// Dot product of two f32 vectors over their common length.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if *SIMD_DOT_ENABLED {
        dot_product_simd(a, b)
    } else {
        dot_product_scalar(a, b)
    }
}

/// Squared euclidean distance, used by the l2 similarity convention.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if !*SIMD_DOT_ENABLED {
        return a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
    }
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);
    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        let mut arr_a = [0f32; 8];
        let mut arr_b = [0f32; 8];
        arr_a.copy_from_slice(ca);
        arr_b.copy_from_slice(cb);
        let d = f32x8::from(arr_a) - f32x8::from(arr_b);
        sum += d * d;
    }
    let mut scalar_sum = sum.reduce_add();
    for (x, y) in remainder_a.iter().zip(remainder_b) {
        scalar_sum += (x - y) * (x - y);
    }
    scalar_sum
}

/// Converts 8 halves at a time before multiplying.
#[inline]
pub fn dot_f16(a: &[f16], b: &[f32]) -> f32 {
    if !*SIMD_DOT_ENABLED {
        return a.iter().zip(b.iter()).map(|(x, y)| f32::from(*x) * y).sum();
    }
    let len = a.len().min(b.len());
    let chunks = len / 8;
    let mut sum = f32x8::ZERO;
    for i in 0..chunks {
        let base = i * 8;
        let mut a_f32 = [0f32; 8];
        for (dst, src) in a_f32.iter_mut().zip(&a[base..base + 8]) {
            *dst = f32::from(*src);
        }
        let mut b_f32 = [0f32; 8];
        b_f32.copy_from_slice(&b[base..base + 8]);
        sum += f32x8::from(a_f32) * f32x8::from(b_f32);
    }
    let mut scalar_sum = sum.reduce_add();
    for i in chunks * 8..len {
        scalar_sum += f32::from(a[i]) * b[i];
    }
    scalar_sum
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TinyRng(u32);

    impl TinyRng {
        fn next_f32(&mut self) -> f32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0 = x;
            (x as f32 / u32::MAX as f32).mul_add(2.0, -1.0)
        }
    }

    #[test]
    fn simd_matches_scalar_within_tolerance() {
        let mut rng = TinyRng(0x5eed);
        for size in [0usize, 1, 7, 8, 9, 128, 131] {
            let a: Vec<f32> = (0..size).map(|_| rng.next_f32()).collect();
            let b: Vec<f32> = (0..size).map(|_| rng.next_f32()).collect();
            let scalar = dot_product_scalar(&a, &b);
            let simd = dot_product_simd(&a, &b);
            assert!(
                (scalar - simd).abs() <= 1e-4 * scalar.abs().max(1.0),
                "size {size}: scalar={scalar} simd={simd}"
            );
        }
    }

    #[test]
    fn f16_dot_matches_f32_dot() {
        let a: Vec<f32> = (0..128).map(|i| (i as f32 * 0.37).sin() * 0.5).collect();
        let b: Vec<f32> = (0..128).map(|i| (i as f32 * 0.11).cos() * 0.5).collect();
        let a_half: Vec<f16> = a.iter().map(|v| f16::from_f32(*v)).collect();
        let exact = dot(&a, &b);
        let half = dot_f16(&a_half, &b);
        assert!((exact - half).abs() < 1e-2, "exact={exact} half={half}");
    }

    #[test]
    fn squared_l2_basic() {
        assert_eq!(squared_l2(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert!((squared_l2(&[0.0, 0.0, 0.0], &[1.0, 2.0, 2.0]) - 9.0).abs() < 1e-6);
    }
}
