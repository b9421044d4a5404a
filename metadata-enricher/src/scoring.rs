//! Candidate scoring and merge. Generalizes the `Scored<T>`/fusion-weights
//! shape used for retrieval fusion into the title/year/source-priority
//! weighting this service's candidates need.

use crate::sources::Candidate;

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Weights for the four match signals a candidate can earn. Defaults mirror
/// the fixed bonuses request flow step 3 specifies.
#[derive(Debug, Clone, Copy)]
pub struct MatchWeights {
    pub title_exact: f32,
    pub title_substring: f32,
    pub alt_title_exact: f32,
    pub year_proximity: f32,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            title_exact: 0.3,
            title_substring: 0.2,
            alt_title_exact: 0.25,
            year_proximity: 0.15,
        }
    }
}

/// Source-priority bonus by fan-out rank (0 = highest-priority source that
/// returned this candidate). Flattens to zero beyond the third source.
pub const fn source_priority_bonus(rank: usize) -> f32 {
    match rank {
        0 => 0.10,
        1 => 0.08,
        2 => 0.06,
        _ => 0.0,
    }
}

/// A candidate paired with the score it earned against one request.
#[derive(Debug, Clone)]
pub struct Scored {
    pub candidate: Candidate,
    pub score: f32,
}

pub fn score_candidate(
    candidate: &Candidate,
    requested_title: &str,
    requested_year: Option<i32>,
    source_rank: usize,
    weights: MatchWeights,
) -> f32 {
    let requested_lower = requested_title.to_lowercase();
    let candidate_lower = candidate.title.to_lowercase();

    let mut score = if candidate_lower == requested_lower {
        weights.title_exact
    } else if candidate_lower.contains(&requested_lower) || requested_lower.contains(&candidate_lower) {
        weights.title_substring
    } else {
        0.0
    };

    if candidate
        .alt_titles
        .iter()
        .any(|alt| alt.to_lowercase() == requested_lower)
    {
        score += weights.alt_title_exact;
    }

    if let (Some(requested_year), Some(candidate_year)) = (requested_year, candidate.year) {
        if (requested_year - candidate_year).abs() <= 1 {
            score += weights.year_proximity;
        }
    }

    score += source_priority_bonus(source_rank);
    clamp_unit(score)
}

/// Scores every candidate, sorts descending (ties broken by title for
/// determinism), and returns the ranked list.
pub fn rank_candidates(
    candidates: Vec<(Candidate, usize)>,
    requested_title: &str,
    requested_year: Option<i32>,
    weights: MatchWeights,
) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|(candidate, source_rank)| {
            let score = score_candidate(&candidate, requested_title, requested_year, source_rank, weights);
            Scored { candidate, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate.title.cmp(&b.candidate.title))
    });
    scored
}

/// Merges the ranked list into one record: the top candidate's title/alt
/// titles/year win outright, every other non-null field is filled from the
/// top candidate first and backfilled from lower-ranked candidates in order
/// without overwriting a field the top result already set. Screenshots are
/// capped at 10.
pub fn merge_ranked(ranked: &[Scored]) -> Candidate {
    let Some(top) = ranked.first() else {
        return Candidate::default();
    };

    let mut merged = top.candidate.clone();
    for scored in &ranked[1..] {
        let candidate = &scored.candidate;
        merged.developer = merged.developer.take().or_else(|| candidate.developer.clone());
        merged.publisher = merged.publisher.take().or_else(|| candidate.publisher.clone());
        merged.genre = merged.genre.take().or_else(|| candidate.genre.clone());
        merged.rating = merged.rating.take().or_else(|| candidate.rating.clone());
        merged.description = merged.description.take().or_else(|| candidate.description.clone());
        if merged.artwork_urls.is_empty() {
            merged.artwork_urls = candidate.artwork_urls.clone();
        }
        if merged.screenshots.is_empty() {
            merged.screenshots = candidate.screenshots.clone();
        }
    }
    merged.screenshots.truncate(10);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_title_match_outscores_substring_match() {
        let weights = MatchWeights::default();
        let exact = score_candidate(&Candidate::titled("Chrono Trigger"), "Chrono Trigger", None, 5, weights);
        let substring = score_candidate(&Candidate::titled("Chrono Trigger Remaster"), "Chrono Trigger", None, 5, weights);
        assert!(exact > substring);
    }

    #[test]
    fn year_within_one_earns_proximity_bonus() {
        let weights = MatchWeights::default();
        let mut candidate = Candidate::titled("Game");
        candidate.year = Some(1994);
        let close = score_candidate(&candidate, "Game", Some(1995), 5, weights);
        let far = score_candidate(&candidate, "Game", Some(2010), 5, weights);
        assert!(close > far);
    }

    #[test]
    fn earlier_source_rank_scores_higher_all_else_equal() {
        let weights = MatchWeights::default();
        let candidate = Candidate::titled("Game");
        let first = score_candidate(&candidate, "Other", None, 0, weights);
        let third = score_candidate(&candidate, "Other", None, 2, weights);
        assert!(first > third);
    }

    #[test]
    fn merge_fills_missing_fields_without_overwriting_top_result() {
        let mut top = Candidate::titled("Game");
        top.developer = Some("Top Dev".to_string());
        let mut filler = Candidate::titled("Game Alt");
        filler.developer = Some("Other Dev".to_string());
        filler.publisher = Some("Filler Publisher".to_string());
        filler.screenshots = vec!["a".to_string(), "b".to_string()];

        let ranked = vec![
            Scored { candidate: top, score: 0.9 },
            Scored { candidate: filler, score: 0.1 },
        ];
        let merged = merge_ranked(&ranked);
        assert_eq!(merged.developer.as_deref(), Some("Top Dev"));
        assert_eq!(merged.publisher.as_deref(), Some("Filler Publisher"));
        assert_eq!(merged.screenshots, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn merge_caps_screenshots_at_ten() {
        let mut top = Candidate::titled("Game");
        top.screenshots = (0..15).map(|n| n.to_string()).collect();
        let ranked = vec![Scored { candidate: top, score: 1.0 }];
        let merged = merge_ranked(&ranked);
        assert_eq!(merged.screenshots.len(), 10);
    }

    #[test]
    fn merge_of_empty_ranked_list_is_the_default_candidate() {
        let merged = merge_ranked(&[]);
        assert_eq!(merged, Candidate::default());
    }
}
