//! Rational-factor polyphase resampling
//!
//! Upsample by `up`, low-pass with a windowed-sinc FIR, downsample by `down`.
//! The input is extended past both ends by the line through its first and last
//! samples, and the filter delay is removed so output sample `i` sits at input
//! time `i * down / up`.

use crate::config::ResampleWindow;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

/// Best rational approximation `p / q` of `value` with `q <= max_denominator`
///
/// `value` is taken as the exact binary fraction of the float, then reduced
/// along its continued fraction. Returns `None` for non-positive, non-finite or
/// out-of-range values.
pub fn limit_denominator(value: f64, max_denominator: u64) -> Option<(u64, u64)> {
    let (num, den) = exact_ratio(value)?;
    let max_den = u128::from(max_denominator.max(1));
    if den <= max_den {
        return Some((u64::try_from(num).ok()?, u64::try_from(den).ok()?));
    }

    let (mut p0, mut q0, mut p1, mut q1) = (0u128, 1u128, 1u128, 0u128);
    let (mut n, mut d) = (num, den);
    loop {
        let a = n / d;
        let q2 = q0 + a * q1;
        if q2 > max_den {
            break;
        }
        (p0, q0, p1, q1) = (p1, q1, p0 + a * p1, q2);
        (n, d) = (d, n - a * d);
    }

    let k = (max_den - q0) / q1;
    let lower = (p0 + k * p1, q0 + k * q1);
    let upper = (p1, q1);

    // |p/q - num/den| compared without division
    let distance = |(p, q): (u128, u128)| (p * den).abs_diff(num * q);
    let nearest = if distance(upper) * lower.1 <= distance(lower) * upper.1 {
        upper
    } else {
        lower
    };
    Some((u64::try_from(nearest.0).ok()?, u64::try_from(nearest.1).ok()?))
}

/// Exact `num / den` of a positive float, reduced
fn exact_ratio(value: f64) -> Option<(u128, u128)> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mantissa, exponent) = if biased == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), biased - 1075)
    };

    if exponent >= 0 {
        if exponent > 64 {
            return None;
        }
        return Some(((mantissa as u128) << exponent, 1));
    }
    let shift = exponent.unsigned_abs();
    let reduce = mantissa.trailing_zeros().min(shift);
    let shift = shift - reduce;
    if shift > 96 {
        return None;
    }
    Some(((mantissa >> reduce) as u128, 1u128 << shift))
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Modified Bessel function of the first kind, order zero
pub fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1.0;
    loop {
        term *= (half / k) * (half / k);
        sum += term;
        if term < sum * 1e-17 {
            return sum;
        }
        k += 1.0;
    }
}

/// Symmetric window of `len` points
pub fn window(kind: ResampleWindow, len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let last = (len - 1) as f64;
    (0..len)
        .map(|n| {
            let n = n as f64;
            match kind {
                ResampleWindow::Kaiser { beta } => {
                    let r = 2.0 * n / last - 1.0;
                    bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / bessel_i0(beta)
                }
                ResampleWindow::Hann => 0.5 - 0.5 * (2.0 * PI * n / last).cos(),
                ResampleWindow::Hamming => 0.54 - 0.46 * (2.0 * PI * n / last).cos(),
                ResampleWindow::Boxcar => 1.0,
            }
        })
        .collect()
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Anti-aliasing filter for one (up, down) pair
#[derive(Debug, Clone)]
pub struct PolyphaseFilter {
    up: usize,
    down: usize,
    half_len: usize,
    /// Windowed-sinc taps with unit DC gain, scaled by `up`
    taps: Vec<f64>,
}

impl PolyphaseFilter {
    /// Low-pass at `1 / max(up, down)` of Nyquist with `20 * max(up, down) + 1` taps
    pub fn design(up: usize, down: usize, kind: ResampleWindow) -> Self {
        let max_rate = up.max(down);
        let cutoff = 1.0 / max_rate as f64;
        let half_len = 10 * max_rate;
        let len = 2 * half_len + 1;

        let mut taps: Vec<f64> = window(kind, len)
            .into_iter()
            .enumerate()
            .map(|(n, w)| cutoff * sinc(cutoff * (n as f64 - half_len as f64)) * w)
            .collect();
        let gain: f64 = taps.iter().sum();
        for tap in &mut taps {
            *tap *= up as f64 / gain;
        }

        Self {
            up,
            down,
            half_len,
            taps,
        }
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len * self.up).div_ceil(self.down)
    }

    /// Resample one channel
    pub fn apply(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let n = x.len();
        if n == 0 {
            return Array1::zeros(0);
        }
        let up = self.up as i64;
        let down = self.down as i64;
        let len = self.taps.len() as i64;
        let pre_pad = (self.down - self.half_len % self.down) as i64;
        let pre_remove = (self.half_len as i64 + pre_pad) / down;

        let last = n as i64 - 1;
        let slope = if n > 1 {
            (x[n - 1] - x[0]) / last as f64
        } else {
            0.0
        };
        let extended = |idx: i64| -> f64 {
            if idx < 0 {
                x[0] + idx as f64 * slope
            } else if idx > last {
                x[n - 1] + (idx - last) as f64 * slope
            } else {
                x[idx as usize]
            }
        };

        Array1::from_iter((0..self.output_len(n) as i64).map(|o| {
            // Tap t multiplies input sample j where t = base - j * up
            let base = (pre_remove + o) * down - pre_pad;
            let j_max = base.div_euclid(up);
            let j_min = -(-(base - len + 1)).div_euclid(up);
            (j_min..=j_max)
                .map(|j| self.taps[(base - j * up) as usize] * extended(j))
                .sum::<f64>()
        }))
    }
}

type FilterKey = (usize, usize, u8, u64);

fn filter_key(up: usize, down: usize, kind: ResampleWindow) -> FilterKey {
    match kind {
        ResampleWindow::Kaiser { beta } => (up, down, 0, beta.to_bits()),
        ResampleWindow::Hann => (up, down, 1, 0),
        ResampleWindow::Hamming => (up, down, 2, 0),
        ResampleWindow::Boxcar => (up, down, 3, 0),
    }
}

/// Designed filters, shared across trials with the same rate pair
#[derive(Debug, Default)]
pub struct FilterCache {
    filters: Mutex<HashMap<FilterKey, Arc<PolyphaseFilter>>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, up: usize, down: usize, kind: ResampleWindow) -> Arc<PolyphaseFilter> {
        let mut filters = self.filters.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            filters
                .entry(filter_key(up, down, kind))
                .or_insert_with(|| Arc::new(PolyphaseFilter::design(up, down, kind))),
        )
    }

    pub fn len(&self) -> usize {
        self.filters.lock().map_or(0, |f| f.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resample every column of `signal` (rows are samples) by `up / down`
pub fn resample_poly(
    signal: &Array2<f64>,
    up: usize,
    down: usize,
    kind: ResampleWindow,
    cache: &FilterCache,
) -> Array2<f64> {
    let g = gcd(up, down).max(1);
    let (up, down) = (up / g, down / g);
    if up == 1 && down == 1 {
        return signal.clone();
    }

    let filter = cache.get(up, down, kind);
    let rows = filter.output_len(signal.nrows());
    let mut out = Array2::zeros((rows, signal.ncols()));
    for (col, mut target) in signal.axis_iter(Axis(1)).zip(out.axis_iter_mut(Axis(1))) {
        target.assign(&filter.apply(col));
    }
    out
}
