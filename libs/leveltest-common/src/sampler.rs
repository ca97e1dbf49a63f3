use rand::Rng;

/// Uniform sample without replacement of `min(sample_size, pool_size)` ids
/// from `1..=pool_size`, in ascending order.
pub fn sample_ids<R: Rng + ?Sized>(rng: &mut R, pool_size: u32, sample_size: usize) -> Vec<u32> {
    let pool = pool_size as usize;
    let amount = sample_size.min(pool);

    let mut ids: Vec<u32> = rand::seq::index::sample(rng, pool, amount)
        .into_iter()
        .map(|index| index as u32 + 1)
        .collect();
    ids.sort_unstable();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_sample_is_sorted_unique_and_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let ids = sample_ids(&mut rng, 100, 10);

        assert_eq!(ids.len(), 10);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.iter().all(|id| (1..=100).contains(id)));
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 10);
    }

    #[test]
    fn test_sample_larger_than_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(sample_ids(&mut rng, 4, 10), vec![1, 2, 3, 4]);
        assert!(sample_ids(&mut rng, 0, 10).is_empty());
        assert!(sample_ids(&mut rng, 5, 0).is_empty());
    }

    #[test]
    fn test_sample_covers_the_pool() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.extend(sample_ids(&mut rng, 20, 3));
        }
        assert_eq!(seen.len(), 20);
    }
}
