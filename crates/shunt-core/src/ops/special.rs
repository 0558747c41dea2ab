//! Special functions evaluated on the host.

use std::f64::consts::PI;

const LANCZOS_G: f64 = 7.0;

const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// `ln(sqrt(2π))`
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Natural log of `|Γ(x)|`.
///
/// Lanczos approximation (g = 7, n = 9) for `x >= 0.5`, reflection formula
/// below that. Poles (non-positive integers) and `±∞` give `+∞`, matching
/// C's `lgamma`.
pub fn ln_gamma(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x.is_infinite() || (x <= 0.0 && x == x.floor()) {
        return f64::INFINITY;
    }
    if x < 0.5 {
        // lnΓ(x) = ln(π / |sin(πx)|) - lnΓ(1 - x)
        return (PI / (PI * x).sin().abs()).ln() - ln_gamma(1.0 - x);
    }

    let z = x - 1.0;
    let mut series = LANCZOS_COEFFS[0];
    for (i, &c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
        series += c / (z + i as f64);
    }
    let t = z + LANCZOS_G + 0.5;
    LN_SQRT_2PI + (z + 0.5) * t.ln() - t + series.ln()
}
