//! Dot-product kernel used by the FIR stage
//!
//! The vectorized path keeps `LANES` independent partial sums so the compiler
//! can map the inner loop onto SIMD registers without intrinsics, then folds
//! the lanes pairwise and adds the scalar tail. Because the summation order
//! differs from strict left-to-right, results are not bit-identical across
//! targets or against [`dotp_scalar`]; they agree within normal `f32`
//! rounding tolerance.

/// Partial sums kept in flight (one AVX register of `f32`)
const LANES: usize = 8;

/// Inner product of two equal-length vectors
#[inline]
pub fn dotp(x: &[f32], y: &[f32]) -> f32 {
    debug_assert_eq!(x.len(), y.len());
    let len = x.len().min(y.len());
    let (x, y) = (&x[..len], &y[..len]);

    let mut acc = [0.0f32; LANES];
    let xs = x.chunks_exact(LANES);
    let ys = y.chunks_exact(LANES);
    let (x_tail, y_tail) = (xs.remainder(), ys.remainder());

    for (a, b) in xs.zip(ys) {
        for lane in 0..LANES {
            acc[lane] += a[lane] * b[lane];
        }
    }

    let mut sum = fold_lanes(&acc);
    for (a, b) in x_tail.iter().zip(y_tail) {
        sum += a * b;
    }
    sum
}

/// Two dot products sharing one coefficient vector, in a single pass
///
/// Used for the stereo FIR path. Each result equals `dotp(h, x0)` and
/// `dotp(h, x1)` respectively.
#[inline]
pub fn dotp2(h: &[f32], x0: &[f32], x1: &[f32]) -> (f32, f32) {
    debug_assert_eq!(h.len(), x0.len());
    debug_assert_eq!(h.len(), x1.len());
    let len = h.len().min(x0.len()).min(x1.len());
    let (h, x0, x1) = (&h[..len], &x0[..len], &x1[..len]);

    let mut acc0 = [0.0f32; LANES];
    let mut acc1 = [0.0f32; LANES];
    let hs = h.chunks_exact(LANES);
    let x0s = x0.chunks_exact(LANES);
    let x1s = x1.chunks_exact(LANES);
    let tail = hs.remainder().len();

    for ((c, a), b) in hs.zip(x0s).zip(x1s) {
        for lane in 0..LANES {
            acc0[lane] += c[lane] * a[lane];
            acc1[lane] += c[lane] * b[lane];
        }
    }

    let mut sum0 = fold_lanes(&acc0);
    let mut sum1 = fold_lanes(&acc1);
    for n in len - tail..len {
        sum0 += h[n] * x0[n];
        sum1 += h[n] * x1[n];
    }
    (sum0, sum1)
}

/// Strict left-to-right reference implementation
pub fn dotp_scalar(x: &[f32], y: &[f32]) -> f32 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).fold(0.0, |sum, (a, b)| sum + a * b)
}

#[inline]
fn fold_lanes(acc: &[f32; LANES]) -> f32 {
    let quad = [
        acc[0] + acc[4],
        acc[1] + acc[5],
        acc[2] + acc[6],
        acc[3] + acc[7],
    ];
    (quad[0] + quad[2]) + (quad[1] + quad[3])
}
