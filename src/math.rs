use itertools::izip;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `out = x + a * y`
#[inline]
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);
    izip!(x, y, out).for_each(|(x, y, out)| *out = x + a * y);
}

/// `y += a * x`
#[inline]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    assert!(x.len() == y.len());
    x.iter().zip(y.iter_mut()).for_each(|(x, y)| *y += a * x);
}

#[inline]
pub(crate) fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_ulps_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn check_logaddexp(x in -10f64..10f64, y in -10f64..10f64) {
            let a = (x.exp() + y.exp()).ln();
            let b = logaddexp(x, y);
            let neginf = f64::NEG_INFINITY;
            let nan = f64::NAN;
            prop_assert!((a - b).abs() < 1e-10);
            prop_assert_eq!(b, logaddexp(y, x));
            prop_assert_eq!(x, logaddexp(x, neginf));
            prop_assert_eq!(logaddexp(neginf, neginf), neginf);
            prop_assert!(logaddexp(nan, x).is_nan());
        }
    }

    #[test]
    fn vector_ops() {
        let x = [1., 2., 3.];
        let mut y = [1., 1., 1.];
        assert_ulps_eq!(dot(&x, &y), 6.);
        axpy(&x, &mut y, 2.);
        assert_eq!(y, [3., 5., 7.]);
        let mut out = [0.; 3];
        axpy_out(&x, &y, -1., &mut out);
        assert_eq!(out, [-2., -3., -4.]);
        assert!(all_finite(&out));
        assert!(!all_finite(&[1., f64::NAN]));
    }
}
