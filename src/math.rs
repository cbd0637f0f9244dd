#[inline(always)]
pub fn logsumexp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY && b == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

/// Folds [`logsumexp`] over a slice. Empty slices have mass `-inf`.
#[inline(always)]
pub fn logsumexp_all(xs: &[f64]) -> f64 {
    let mut y = f64::NEG_INFINITY;
    for &x in xs {
        y = logsumexp(y, x);
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logsumexp_small_1() {
        let a = 0.5f64;
        let b = 2f64;
        let expected = (a.exp() + b.exp()).ln();
        let result = logsumexp(a, b);
        assert!((expected - result).abs() < f64::EPSILON);
    }

    #[test]
    fn test_logsumexp_small_2() {
        let a = 12f64;
        let b = 5f64;
        let expected = (a.exp() + b.exp()).ln();
        let result = logsumexp(a, b);
        assert!((expected - result).abs() < f64::EPSILON);
    }

    #[test]
    fn test_logsumexp_large_1() {
        let a = 1234f64;
        let b = 1232f64;
        // log(exp(1234) + exp(1232))
        // = log(exp(1232 + 2) + exp(1232 + 0))
        // = log(exp(1232) * (exp(2) + exp(0)))
        // = 1232 + log(exp(2) + 1)
        let expected = 1232.0 + (2f64.exp() + 1.0).ln();
        let result = logsumexp(a, b);
        assert!((expected - result).abs() < f64::EPSILON);

        // The following naive calculation fails
        let naive = (a.exp() + b.exp()).ln();
        assert!(naive.is_infinite());
    }

    #[test]
    fn test_logsumexp_large_2() {
        let a = 1230f64;
        let b = 1235f64;
        // log(exp(1230) + exp(1235))
        // = log(exp(1230 + 0) + exp(1230 + 5))
        // = log(exp(1230) * (exp(0) + exp(5)))
        // = 1230 + log(1 + exp(5))
        let expected = 1230.0 + (1.0 + 5f64.exp()).ln();
        let result = logsumexp(a, b);
        assert!((expected - result).abs() < f64::EPSILON);

        // The following naive calculation fails
        let naive = (a.exp() + b.exp()).ln();
        assert!(naive.is_infinite());
    }

    #[test]
    fn test_logsumexp_inf_1() {
        let a = f64::NEG_INFINITY;
        let b = 2.0;
        let expected = 2.0;
        let result = logsumexp(a, b);
        assert!((expected - result).abs() < f64::EPSILON);
    }

    #[test]
    fn test_logsumexp_inf_2() {
        let a = f64::NEG_INFINITY;
        let b = f64::NEG_INFINITY;
        let result = logsumexp(a, b);
        assert_eq!(f64::NEG_INFINITY, result);
    }

    #[test]
    fn test_logsumexp_all_matches_pairwise() {
        let xs = [0.25, -1.5, 3.0, 0.0];
        let expected = logsumexp(logsumexp(logsumexp(0.25, -1.5), 3.0), 0.0);
        let result = logsumexp_all(&xs);
        assert!((expected - result).abs() < f64::EPSILON);
    }

    #[test]
    fn test_logsumexp_all_empty() {
        assert_eq!(f64::NEG_INFINITY, logsumexp_all(&[]));
    }
}
