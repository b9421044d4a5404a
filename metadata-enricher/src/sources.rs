//! Candidate metadata sources. A `Source` is anything that can answer
//! "what do you know about this title on this platform" with zero or more
//! [`Candidate`] guesses; [`FallbackSource`] is the one guaranteed to never
//! come up empty.

use async_trait::async_trait;
use common::error::AppError;

/// A single source's guess at a title's metadata. Fields a source has no
/// opinion on stay `None`/empty rather than being invented.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub alt_titles: Vec<String>,
    pub year: Option<i32>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub genre: Option<String>,
    pub rating: Option<String>,
    pub description: Option<String>,
    pub artwork_urls: Vec<String>,
    pub screenshots: Vec<String>,
}

impl Candidate {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// A ranked metadata provider. `priority` determines both fan-out order and
/// the source-priority scoring bonus; lower values rank first.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> usize;

    async fn search(
        &self,
        title: &str,
        platform_id: &str,
        region: Option<&str>,
        declared_digest: Option<&str>,
    ) -> Result<Vec<Candidate>, AppError>;
}

/// The source that is "always present": returns the sanitized title as its
/// only candidate, no enrichment, confidence reflected by its low priority
/// rank rather than a field on `Candidate` itself. Guarantees request flow
/// step 5's "minimal record with the sanitized title only" even when every
/// other source fails or is disabled.
pub struct FallbackSource;

#[async_trait]
impl Source for FallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    fn priority(&self) -> usize {
        usize::MAX
    }

    async fn search(
        &self,
        title: &str,
        _platform_id: &str,
        _region: Option<&str>,
        _declared_digest: Option<&str>,
    ) -> Result<Vec<Candidate>, AppError> {
        Ok(vec![Candidate::titled(title)])
    }
}

/// Confidence assigned to a result that came only from [`FallbackSource`].
pub const FALLBACK_CONFIDENCE: f32 = 0.3;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_source_echoes_the_requested_title() {
        let source = FallbackSource;
        let candidates = source
            .search("Super Game", "snes", None, None)
            .await
            .expect("fallback never fails");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Super Game");
    }
}
