use crate::SubsetSampler;
use cv_core::sample_consensus::{Consensus, Estimator, Model};
use float_ord::FloatOrd;
use log::*;

/// The result of a least-median-of-squares search.
#[derive(Debug, Clone, PartialEq)]
pub struct MedianFit<M> {
    /// The model with the lowest median residual.
    pub model: M,
    /// The median residual of `model` over all data.
    pub median: f64,
    /// The residual at or below which a datum is an inlier.
    pub threshold: f64,
    /// The inlier mask, index-aligned with the data.
    pub inliers: Vec<bool>,
}

impl<M> MedianFit<M> {
    pub fn inlier_indices(&self) -> Vec<usize> {
        self.inliers
            .iter()
            .enumerate()
            .filter_map(|(ix, &inlier)| inlier.then(|| ix))
            .collect()
    }

    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| inlier).count()
    }
}

/// Least median of squares by Rousseeuw.
///
/// Models are fit to minimal subsets drawn from a [`SubsetSampler`] and scored by the median of
/// their residuals over all of the data. The model with the lowest median wins. Unlike RANSAC,
/// no inlier threshold has to be chosen up front; it is derived afterwards from the winning median
/// with the robust standard deviation estimate
///
/// ```text
/// sigma = 2.5 * 1.4826 * (1 + 5 / (n - m)) * sqrt(median)
/// ```
///
/// where `n` is the amount of data and `m` the size of a minimal subset. A datum is an inlier if its
/// residual is no larger than `sigma²`. The residuals are expected to be squared distances.
///
/// The search is only guaranteed to find a good model while fewer than half of the data are outliers.
#[derive(Debug, Clone)]
pub struct LeastMedianSquares<S> {
    sampler: S,
    confidence: f64,
    outlier_ratio: f64,
    max_iterations: usize,
    iterations: Option<usize>,
}

impl<S> LeastMedianSquares<S>
where
    S: SubsetSampler,
{
    /// Creates the estimator with a confidence of `0.99`, an expected outlier ratio of `0.45`
    /// and at most `2000` iterations.
    pub fn new(sampler: S) -> Self {
        Self {
            sampler,
            confidence: 0.99,
            outlier_ratio: 0.45,
            max_iterations: 2000,
            iterations: None,
        }
    }

    /// Set the probability that at least one sampled subset is free of outliers.
    ///
    /// Default is `0.99`.
    #[must_use]
    pub fn with_confidence(self, confidence: f64) -> Self {
        Self { confidence, ..self }
    }

    /// Set the fraction of the data expected to be outliers.
    ///
    /// Default is `0.45`.
    #[must_use]
    pub fn outlier_ratio(self, outlier_ratio: f64) -> Self {
        Self {
            outlier_ratio,
            ..self
        }
    }

    /// Set the cap on the number of iterations derived from the confidence.
    ///
    /// Default is `2000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Run exactly this many iterations instead of deriving the count from the confidence.
    #[must_use]
    pub fn iterations(self, iterations: usize) -> Self {
        Self {
            iterations: Some(iterations),
            ..self
        }
    }

    /// The number of subsets to draw for minimal subsets of `sample_size`.
    ///
    /// ```
    /// use eight_point::{LeastMedianSquares, FixedSubsets};
    /// let lmeds = LeastMedianSquares::new(FixedSubsets::new(Vec::<Vec<usize>>::new()));
    /// assert_eq!(lmeds.trials(8), 548);
    /// assert_eq!(lmeds.clone().with_confidence(0.999).trials(8), 822);
    /// assert_eq!(lmeds.iterations(3).trials(8), 3);
    /// ```
    pub fn trials(&self, sample_size: usize) -> usize {
        if let Some(iterations) = self.iterations {
            return iterations;
        }
        let failure = (1.0 - self.confidence).max(f64::MIN_POSITIVE).ln();
        let clean = 1.0 - (1.0 - self.outlier_ratio).powi(sample_size as i32);
        if clean < f64::MIN_POSITIVE {
            return 1;
        }
        let clean = clean.ln();
        if clean >= 0.0 || -failure >= self.max_iterations as f64 * -clean {
            self.max_iterations
        } else {
            (failure / clean).round() as usize
        }
    }

    /// Searches for the model with the lowest median residual.
    ///
    /// Returns `None` if there is less data than a minimal subset or if no subset produced a model.
    pub fn fit<E, Data>(&mut self, estimator: &E, data: &[Data]) -> Option<MedianFit<E::Model>>
    where
        E: Estimator<Data>,
        Data: Clone,
    {
        let sample_size = E::MIN_SAMPLES;
        if data.len() < sample_size {
            return None;
        }
        let trials = self.trials(sample_size);
        let mut subset = Vec::with_capacity(sample_size);
        let mut residuals = Vec::with_capacity(data.len());
        let mut best: Option<(E::Model, f64)> = None;
        for trial in 0..trials {
            if !self.sampler.sample(data.len(), sample_size, &mut subset) {
                debug!("ran out of subsets after {} trials", trial);
                break;
            }
            for model in estimator.estimate(subset.iter().map(|&ix| data[ix].clone())) {
                residuals.clear();
                residuals.extend(data.iter().map(|datum| model.residual(datum)));
                let median = median(&mut residuals);
                if best.as_ref().map_or(median.is_finite(), |&(_, best)| median < best) {
                    trace!("trial {} improved the median to {}", trial, median);
                    best = Some((model, median));
                }
            }
        }
        let (model, median) = best?;
        let threshold = inlier_threshold(median, data.len(), sample_size);
        let inliers = data
            .iter()
            .map(|datum| model.residual(datum) <= threshold)
            .collect();
        Some(MedianFit {
            model,
            median,
            threshold,
            inliers,
        })
    }
}

/// The squared robust standard deviation of the residuals.
fn inlier_threshold(median: f64, count: usize, sample_size: usize) -> f64 {
    let correction = if count > sample_size {
        1.0 + 5.0 / (count - sample_size) as f64
    } else {
        1.0
    };
    let sigma = (2.5 * 1.4826 * correction * median.sqrt()).max(0.001);
    sigma * sigma
}

fn median(residuals: &mut [f64]) -> f64 {
    let middle = residuals.len() / 2;
    let (_, &mut median, _) = residuals.select_nth_unstable_by_key(middle, |&r| FloatOrd(r));
    median
}

impl<E, S, Data> Consensus<E, Data> for LeastMedianSquares<S>
where
    E: Estimator<Data>,
    S: SubsetSampler,
    Data: Clone,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = Data> + Clone,
    {
        let data: Vec<Data> = data.collect();
        self.fit(estimator, &data).map(|fit| fit.model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = Data> + Clone,
    {
        let data: Vec<Data> = data.collect();
        self.fit(estimator, &data).map(|fit| {
            let inliers = fit.inlier_indices();
            (fit.model, inliers)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedSubsets;

    /// Fits a constant to a single sample; the residual is the squared difference.
    struct Constant;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Level(f64);

    impl Model<f64> for Level {
        fn residual(&self, data: &f64) -> f64 {
            (self.0 - data) * (self.0 - data)
        }
    }

    impl Estimator<f64> for Constant {
        type Model = Level;
        type ModelIter = Option<Level>;
        const MIN_SAMPLES: usize = 1;

        fn estimate<I>(&self, mut data: I) -> Self::ModelIter
        where
            I: Iterator<Item = f64> + Clone,
        {
            data.next().map(Level)
        }
    }

    #[test]
    fn median_picks_middle_element() {
        assert_eq!(median(&mut [5.0, 1.0, 3.0]), 3.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 3.0);
    }

    #[test]
    fn lowest_median_wins() {
        let data = [1.0, 1.0, 1.0, 1.0, 1.0, 9.0, -4.0];
        let subsets = (0..data.len()).map(|ix| vec![ix]);
        let mut lmeds = LeastMedianSquares::new(FixedSubsets::new(subsets)).iterations(100);
        let fit = lmeds.fit(&Constant, &data).unwrap();
        assert_eq!(fit.model, Level(1.0));
        assert_eq!(fit.median, 0.0);
        assert_eq!(fit.threshold, 0.001 * 0.001);
        assert_eq!(fit.inliers, [true, true, true, true, true, false, false]);
        assert_eq!(fit.inlier_indices(), [0, 1, 2, 3, 4]);
    }

    #[test]
    fn consensus_reports_inlier_indices() {
        let data = vec![2.0, 8.0, 2.0, 2.0];
        let mut lmeds = LeastMedianSquares::new(FixedSubsets::new(vec![vec![1], vec![0]]));
        let (model, inliers) = lmeds
            .model_inliers(&Constant, data.iter().copied())
            .unwrap();
        assert_eq!(model, Level(2.0));
        assert_eq!(inliers, [0, 2, 3]);
    }

    #[test]
    fn too_little_data() {
        let mut lmeds = LeastMedianSquares::new(FixedSubsets::new(vec![vec![0]]));
        assert!(lmeds.fit(&Constant, &[] as &[f64]).is_none());
    }
}
