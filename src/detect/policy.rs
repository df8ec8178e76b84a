use crate::detect::result::Candidate;

pub const DEFAULT_MAX_RESULTS: usize = 3;
pub const DEFAULT_SCORE_FLOOR: f32 = 0.30;

/// Caller-side thresholding applied to every detector's output.
///
/// Keeps downstream aggregation stable regardless of what a backend enforces
/// on its own: each candidate is reduced to its top class, candidates below
/// `score_floor` are dropped, and at most `max_results` survive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidatePolicy {
    pub max_results: usize,
    pub score_floor: f32,
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            score_floor: DEFAULT_SCORE_FLOOR,
        }
    }
}

impl CandidatePolicy {
    pub fn new(max_results: usize, score_floor: f32) -> Self {
        Self {
            max_results,
            score_floor,
        }
    }

    /// Filter and cap candidates. Ordering is by descending top score;
    /// equal scores keep the detector's order.
    pub fn apply(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut kept: Vec<Candidate> = candidates
            .into_iter()
            .filter_map(Candidate::into_top)
            .filter(|c| c.top_score() >= self.score_floor)
            .collect();
        // sort_by is stable, which preserves detector order on ties
        kept.sort_by(|a, b| b.top_score().total_cmp(&a.top_score()));
        kept.truncate(self.max_results);
        kept
    }
}
