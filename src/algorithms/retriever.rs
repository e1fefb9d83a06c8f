use super::interaction::InteractionMatrix;
use crate::error::{ColdStart, RecError, Result, Stage};
use crate::models::{Candidate, LatentFactors};
use crate::utils::top_k;
use tracing::debug;

/// First stage of the pipeline: produces a recall-oriented short list for a user.
pub trait CandidateSource: Send + Sync {
    /// Top `n` unseen items for `user_id`, best first, ties broken by ascending item id.
    fn get_candidates(&self, user_id: usize, n: usize) -> Result<Vec<Candidate>>;
}

/// Scores items by the inner product of latent factors, skipping items the user already has.
#[derive(Debug, Clone, Copy)]
pub struct FactorRetriever<'a> {
    factors: &'a LatentFactors,
    interactions: &'a InteractionMatrix,
}

impl<'a> FactorRetriever<'a> {
    /// Links factors to the matrix they were fitted on; the two must index the same users
    /// and items.
    pub fn new(factors: &'a LatentFactors, interactions: &'a InteractionMatrix) -> Result<Self> {
        if factors.n_users() != interactions.n_users() {
            return Err(RecError::dimension_mismatch(
                Stage::Retrieval,
                "user factor rows",
                interactions.n_users(),
                factors.n_users(),
            ));
        }
        if factors.n_items() != interactions.n_items() {
            return Err(RecError::dimension_mismatch(
                Stage::Retrieval,
                "item factor rows",
                interactions.n_items(),
                factors.n_items(),
            ));
        }
        Ok(Self {
            factors,
            interactions,
        })
    }

    fn check_user(&self, user_id: usize) -> Result<()> {
        if user_id >= self.interactions.n_users() {
            return Err(RecError::UnknownUser {
                user: user_id,
                reason: ColdStart::OutOfRange,
            });
        }
        if self.interactions.row_len(user_id) == 0 {
            return Err(RecError::UnknownUser {
                user: user_id,
                reason: ColdStart::NoInteractions,
            });
        }
        Ok(())
    }

    /// Raw inner-product scores for the given items, seen or not.
    pub fn score_items(&self, user_id: usize, items: &[usize]) -> Result<Vec<f64>> {
        self.check_user(user_id)?;
        let user = self.factors.user(user_id);
        items
            .iter()
            .map(|&item| {
                if item >= self.factors.n_items() {
                    return Err(RecError::schema(
                        Stage::Retrieval,
                        format!("item_id {} outside [0, {})", item, self.factors.n_items()),
                    ));
                }
                Ok(user.dot(&self.factors.item(item)))
            })
            .collect()
    }
}

impl CandidateSource for FactorRetriever<'_> {
    fn get_candidates(&self, user_id: usize, n: usize) -> Result<Vec<Candidate>> {
        self.check_user(user_id)?;

        // I x K times K: one pass over the item factors
        let scores = self.factors.item_factors.dot(&self.factors.user(user_id));
        let (seen, _) = self.interactions.row(user_id);

        let mut seen_iter = seen.iter().peekable();
        let mut unseen = Vec::with_capacity(scores.len().saturating_sub(seen.len()));
        for (item, &score) in scores.iter().enumerate() {
            // seen is sorted ascending, so a merge walk replaces per-item lookups
            if seen_iter.peek() == Some(&&item) {
                seen_iter.next();
                continue;
            }
            unseen.push((item, score));
        }

        let candidates: Vec<Candidate> = top_k(unseen, n)
            .into_iter()
            .map(|(item_id, score)| Candidate { item_id, score })
            .collect();
        debug!("Retrieved {} candidates for user {}", candidates.len(), user_id);
        Ok(candidates)
    }
}
