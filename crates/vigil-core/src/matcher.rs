//! Descriptor-set matching: two-nearest-neighbour search plus Lowe's ratio test.

use crate::descriptor::DistanceMetric;
use crate::types::{MatchPair, VerificationResult};

/// A pair is good when `nearest < RATIO_THRESHOLD * second_nearest`.
pub const RATIO_THRESHOLD: f32 = 0.7;

/// A face matches when strictly more than this many pairs are good.
pub const MATCH_COUNT_THRESHOLD: usize = 15;

/// Compares candidate descriptor sets against a reference set.
///
/// Stateless apart from its parameters; build one per session and share it
/// across threads.
#[derive(Debug, Clone)]
pub struct RatioTestMatcher<M> {
    metric: M,
    ratio: f32,
    min_good_matches: usize,
}

impl<M> RatioTestMatcher<M> {
    pub fn new(metric: M) -> Self {
        Self {
            metric,
            ratio: RATIO_THRESHOLD,
            min_good_matches: MATCH_COUNT_THRESHOLD,
        }
    }

    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_min_good_matches(mut self, min_good_matches: usize) -> Self {
        self.min_good_matches = min_good_matches;
        self
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn min_good_matches(&self) -> usize {
        self.min_good_matches
    }

    /// Brute-force two nearest reference descriptors for every candidate descriptor.
    ///
    /// Produces no pairs when the reference has fewer than two descriptors.
    /// Ties keep the lower reference index, so the output is deterministic.
    pub fn nearest_pairs<D>(&self, reference: &[D], candidate: &[D]) -> Vec<MatchPair>
    where
        M: DistanceMetric<D>,
    {
        if reference.len() < 2 {
            return Vec::new();
        }

        candidate
            .iter()
            .enumerate()
            .map(|(candidate_idx, c)| {
                let mut best = (f32::INFINITY, 0usize);
                let mut second = (f32::INFINITY, 0usize);

                for (idx, r) in reference.iter().enumerate() {
                    let d = self.metric.distance(c, r);
                    if d < best.0 {
                        second = best;
                        best = (d, idx);
                    } else if d < second.0 {
                        second = (d, idx);
                    }
                }

                MatchPair {
                    candidate_idx,
                    nearest_idx: best.1,
                    nearest_distance: best.0,
                    second_idx: second.1,
                    second_distance: second.0,
                }
            })
            .collect()
    }

    /// Whether a pair passes the ratio test.
    pub fn is_good(&self, pair: &MatchPair) -> bool {
        pair.nearest_distance < self.ratio * pair.second_distance
    }

    /// Decide whether `candidate` shows the same face as `reference`.
    ///
    /// An empty set on either side never matches.
    pub fn compare<D>(&self, reference: &[D], candidate: &[D]) -> VerificationResult
    where
        M: DistanceMetric<D>,
    {
        if reference.is_empty() || candidate.is_empty() {
            return VerificationResult::no_match();
        }

        let good_matches = self
            .nearest_pairs(reference, candidate)
            .iter()
            .filter(|pair| self.is_good(pair))
            .count();

        VerificationResult {
            matched: good_matches > self.min_good_matches,
            good_matches,
        }
    }
}
