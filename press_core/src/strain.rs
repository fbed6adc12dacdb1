//! Press frame compliance model.
//!
//! The frame deflects elastically under load. A fitted quartic gives force
//! as a function of deflection; the inverse has no closed form and is found
//! with a bounded bracket-and-bisect search whose cost is fixed.

/// Bisection steps after bracketing. 20 halvings of a 2 mm bracket leave
/// a ~2 nm interval.
pub const BISECTION_ITERATIONS: u32 = 20;

/// Growth factor applied to the upper bracket while it is still too small.
pub const BRACKET_GROWTH: f32 = 1.5;

/// The upper bracket never grows past this multiple of the nominal
/// maximum deflection.
pub const BRACKET_CEILING_FACTOR: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrainModel {
    coeffs: [f32; 5],
    max_deflection_mm: f32,
}

impl StrainModel {
    /// `coeffs` are `[c4, c3, c2, c1, c0]`.
    pub const fn new(coeffs: [f32; 5], max_deflection_mm: f32) -> Self {
        Self {
            coeffs,
            max_deflection_mm,
        }
    }

    pub const fn coeffs(&self) -> [f32; 5] {
        self.coeffs
    }

    /// Force in kg at `deflection_mm`; both clamped non-negative.
    pub fn force_at(&self, deflection_mm: f32) -> f32 {
        let d = deflection_mm.max(0.0);
        let [c4, c3, c2, c1, c0] = self.coeffs;
        let f = c4.mul_add(d, c3).mul_add(d, c2).mul_add(d, c1).mul_add(d, c0);
        f.max(0.0)
    }

    /// Deflection in mm that produces `force_kg`.
    ///
    /// Assumes the polynomial is increasing over the bracket. Forces beyond
    /// the bracket ceiling return the ceiling.
    pub fn deflection_for(&self, force_kg: f32) -> f32 {
        if force_kg.is_nan() || force_kg <= 0.0 {
            return 0.0;
        }
        let ceiling = self.max_deflection_mm.max(f32::EPSILON) * BRACKET_CEILING_FACTOR;
        let mut low = 0.0f32;
        let mut high = self.max_deflection_mm.max(f32::EPSILON);
        while self.force_at(high) < force_kg && high < ceiling {
            low = high;
            high = (high * BRACKET_GROWTH).min(ceiling);
        }
        for _ in 0..BISECTION_ITERATIONS {
            let mid = 0.5 * (low + high);
            if self.force_at(mid) < force_kg {
                low = mid;
            } else {
                high = mid;
            }
        }
        high
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::DEFAULT_STRAIN_COEFFS;
    use proptest::prelude::*;

    fn model() -> StrainModel {
        StrainModel::new(DEFAULT_STRAIN_COEFFS, 2.0)
    }

    #[test]
    fn force_is_clamped_at_zero() {
        // c0 is negative in the default fit
        assert_eq!(model().force_at(0.0), 0.0);
        assert_eq!(model().force_at(-1.0), 0.0);
    }

    #[test]
    fn non_positive_force_has_no_deflection() {
        assert_eq!(model().deflection_for(0.0), 0.0);
        assert_eq!(model().deflection_for(-5.0), 0.0);
        assert_eq!(model().deflection_for(f32::NAN), 0.0);
    }

    #[test]
    fn bracket_expands_for_small_nominal_range() {
        // Nominal range far too small; the bracket has to grow to find 500 kg.
        let m = StrainModel::new(DEFAULT_STRAIN_COEFFS, 0.5);
        let d = m.deflection_for(500.0);
        assert!(d > 0.5);
        assert!((m.force_at(d) - 500.0).abs() < 0.01);
    }

    #[test]
    fn unreachable_force_saturates_at_ceiling() {
        let m = StrainModel::new([0.0, 0.0, 0.0, 10.0, 0.0], 1.0);
        let d = m.deflection_for(1000.0);
        assert!((d - BRACKET_CEILING_FACTOR).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn inverse_matches_forward_within_centigram(f in 1.0f32..1200.0) {
            let m = model();
            let d = m.deflection_for(f);
            prop_assert!((m.force_at(d) - f).abs() <= 0.01, "f={f} d={d} back={}", m.force_at(d));
        }

        #[test]
        fn deflection_is_monotonic_in_force(a in 1.0f32..1200.0, b in 1.0f32..1200.0) {
            let m = model();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(m.deflection_for(lo) <= m.deflection_for(hi) + 1e-5);
        }
    }
}
