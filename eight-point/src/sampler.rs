use log::*;
use rand::Rng;

/// Produces the minimal subsets of correspondences that a robust estimator fits models to.
pub trait SubsetSampler {
    /// Fills `subset` with `amount` distinct indices below `population`.
    ///
    /// Returns `false` when no more subsets are available, which ends the search.
    fn sample(&mut self, population: usize, amount: usize, subset: &mut Vec<usize>) -> bool;
}

impl<S> SubsetSampler for &mut S
where
    S: SubsetSampler,
{
    fn sample(&mut self, population: usize, amount: usize, subset: &mut Vec<usize>) -> bool {
        (**self).sample(population, amount, subset)
    }
}

/// Draws subsets uniformly at random.
///
/// Pass a seeded RNG to make the estimation reproducible.
///
/// ```
/// use eight_point::{RandomSubsets, SubsetSampler};
/// use rand::{rngs::SmallRng, SeedableRng};
/// let mut sampler = RandomSubsets::new(SmallRng::seed_from_u64(7));
/// let mut subset = vec![];
/// assert!(sampler.sample(20, 8, &mut subset));
/// subset.sort_unstable();
/// subset.dedup();
/// assert_eq!(subset.len(), 8);
/// assert!(subset.iter().all(|&ix| ix < 20));
/// ```
#[derive(Debug, Clone)]
pub struct RandomSubsets<R> {
    rng: R,
}

impl<R> RandomSubsets<R>
where
    R: Rng,
{
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R> SubsetSampler for RandomSubsets<R>
where
    R: Rng,
{
    fn sample(&mut self, population: usize, amount: usize, subset: &mut Vec<usize>) -> bool {
        if amount > population {
            return false;
        }
        subset.clear();
        subset.extend(rand::seq::index::sample(&mut self.rng, population, amount).iter());
        true
    }
}

/// Replays a predetermined sequence of subsets, which makes estimation fully deterministic.
///
/// Subsets of the wrong size, with repeated indices, or with indices outside of the data are skipped.
/// The search ends when the sequence runs out.
///
/// ```
/// use eight_point::{FixedSubsets, SubsetSampler};
/// let mut sampler = FixedSubsets::new(vec![vec![0, 1, 2], vec![0, 0, 1], vec![3, 4, 5]]);
/// let mut subset = vec![];
/// assert!(sampler.sample(6, 3, &mut subset));
/// assert_eq!(subset, [0, 1, 2]);
/// // The subset with a repeated index is skipped.
/// assert!(sampler.sample(6, 3, &mut subset));
/// assert_eq!(subset, [3, 4, 5]);
/// assert!(!sampler.sample(6, 3, &mut subset));
/// ```
#[derive(Debug, Clone)]
pub struct FixedSubsets<I> {
    subsets: I,
}

impl<I> FixedSubsets<I>
where
    I: Iterator,
    I::Item: IntoIterator<Item = usize>,
{
    pub fn new(subsets: impl IntoIterator<IntoIter = I, Item = I::Item>) -> Self {
        Self {
            subsets: subsets.into_iter(),
        }
    }
}

impl<I> SubsetSampler for FixedSubsets<I>
where
    I: Iterator,
    I::Item: IntoIterator<Item = usize>,
{
    fn sample(&mut self, population: usize, amount: usize, subset: &mut Vec<usize>) -> bool {
        for candidate in &mut self.subsets {
            subset.clear();
            subset.extend(candidate);
            if is_valid_subset(subset, population, amount) {
                return true;
            }
            trace!("skipping invalid subset {:?}", subset);
        }
        false
    }
}

fn is_valid_subset(subset: &[usize], population: usize, amount: usize) -> bool {
    subset.len() == amount
        && subset.iter().all(|&ix| ix < population)
        && subset
            .iter()
            .enumerate()
            .all(|(i, ix)| !subset[..i].contains(ix))
}
