/// One class hypothesis for a predicted region.
#[derive(Clone, Debug, PartialEq)]
pub struct Category {
    pub label: String,
    pub score: f32,
}

/// One predicted object region as returned by a detector.
///
/// Backends may list several categories per region; only the top one is used.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidate {
    pub categories: Vec<Category>,
}

impl Candidate {
    /// Candidate with a single category.
    pub fn single(label: impl Into<String>, score: f32) -> Self {
        Self {
            categories: vec![Category {
                label: label.into(),
                score,
            }],
        }
    }

    /// Highest-scoring category. Ties keep the detector's ordering (first wins).
    pub fn top(&self) -> Option<&Category> {
        self.categories.iter().fold(None, |best, cat| match best {
            Some(b) if b.score >= cat.score => Some(b),
            // NaN scores never displace an earlier category
            Some(b) if cat.score.is_nan() => Some(b),
            _ => Some(cat),
        })
    }

    /// Score of the top category, or 0 for an empty candidate.
    pub fn top_score(&self) -> f32 {
        self.top().map(|c| c.score).unwrap_or(0.0)
    }

    /// Keep only the top category.
    pub fn into_top(mut self) -> Option<Self> {
        let top = self.top()?.clone();
        self.categories = vec![top];
        Some(self)
    }
}
