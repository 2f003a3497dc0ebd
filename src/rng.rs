use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// The random number generator owned by a single chain.
pub type ChainRng = ChaCha8Rng;

/// Create the random number generator for one chain.
///
/// All chains share the key derived from `seed` and differ only in the
/// ChaCha stream, so the sequences of different chains never overlap.
pub fn create_rng(seed: u64, chain: u64) -> ChainRng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(chain);
    rng
}

#[cfg(test)]
mod tests {
    use super::create_rng;
    use itertools::Itertools;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::Rng;

    fn uniforms(seed: u64, chain: u64, n: usize) -> Vec<f64> {
        let mut rng = create_rng(seed, chain);
        (0..n).map(|_| rng.random::<f64>()).collect()
    }

    fn correlation(a: &[f64], b: &[f64]) -> f64 {
        let n = a.len() as f64;
        let mean_a = a.iter().sum::<f64>() / n;
        let mean_b = b.iter().sum::<f64>() / n;
        let (cov, var_a, var_b) = a.iter().zip(b.iter()).fold(
            (0f64, 0f64, 0f64),
            |(cov, var_a, var_b), (&x, &y)| {
                let dx = x - mean_a;
                let dy = y - mean_b;
                (cov + dx * dy, var_a + dx * dx, var_b + dy * dy)
            },
        );
        cov / (var_a * var_b).sqrt()
    }

    proptest! {
        #[test]
        fn same_arguments_same_sequence(seed in any::<u64>(), chain in 0u64..64) {
            prop_assert_eq!(uniforms(seed, chain, 32), uniforms(seed, chain, 32));
        }
    }

    #[test]
    fn chains_differ() {
        let a = uniforms(42, 1, 16);
        let b = uniforms(42, 2, 16);
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x != y));
        assert_eq!(uniforms(42, 1, 16), a);
    }

    #[test]
    fn chains_uncorrelated_at_short_lags() {
        let n = 20_000;
        let a = uniforms(7, 1, n + 8);
        let b = uniforms(7, 2, n + 8);
        for lag in 0..8 {
            let corr = correlation(&a[..n], &b[lag..n + lag]);
            assert!(corr.abs() < 0.05, "lag {lag}: correlation {corr}");
            let corr = correlation(&b[..n], &a[lag..n + lag]);
            assert!(corr.abs() < 0.05, "lag {lag}: correlation {corr}");
        }
        let first = a.iter().take(4).collect_vec();
        assert_ne!(first, b.iter().take(4).collect_vec());
    }
}
