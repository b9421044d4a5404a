pub mod scoring;
pub mod sources;

use std::{collections::HashMap, sync::Arc, time::Duration};

use common::utils::config::AppConfig;
use lru::LruCache;
use scoring::MatchWeights;
use sources::{Candidate, FallbackSource, Source, FALLBACK_CONFIDENCE};
use tokio::sync::{Mutex, Semaphore};
use tracing::{instrument, warn};

/// What a stage asks the enricher to look up.
#[derive(Debug, Clone)]
pub struct EnrichRequest {
    pub title: String,
    pub platform_id: String,
    pub region: Option<String>,
    pub year: Option<i32>,
    pub declared_digest: Option<String>,
}

/// The merged record handed back to the caller. `confidence` reflects
/// whether anything beyond the fallback source contributed.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
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
    pub confidence: f32,
}

impl Metadata {
    fn from_candidate(candidate: Candidate, confidence: f32) -> Self {
        Self {
            title: candidate.title,
            alt_titles: candidate.alt_titles,
            year: candidate.year,
            developer: candidate.developer,
            publisher: candidate.publisher,
            genre: candidate.genre,
            rating: candidate.rating,
            description: candidate.description,
            artwork_urls: candidate.artwork_urls,
            screenshots: candidate.screenshots,
            confidence,
        }
    }
}

type CacheKey = (String, String);

/// Fans a request out across ranked sources, scores and merges the
/// candidates, and caches the result. `enrich` never fails: absence is
/// handled internally by falling back to the sanitized title.
pub struct Enricher {
    sources: Vec<Arc<dyn Source>>,
    semaphore: Arc<Semaphore>,
    per_source_timeout: Duration,
    weights: MatchWeights,
    cache: Mutex<LruCache<CacheKey, Metadata>>,
}

impl Enricher {
    pub fn new(
        mut sources: Vec<Arc<dyn Source>>,
        max_concurrent_sources: usize,
        cache_capacity: usize,
        per_source_timeout: Duration,
    ) -> Self {
        sources.sort_by_key(|source| source.priority());
        let cache_capacity = std::num::NonZeroUsize::new(cache_capacity.max(1))
            .unwrap_or(std::num::NonZeroUsize::MIN);
        Self {
            sources,
            semaphore: Arc::new(Semaphore::new(max_concurrent_sources.max(1))),
            per_source_timeout,
            weights: MatchWeights::default(),
            cache: Mutex::new(LruCache::new(cache_capacity)),
        }
    }

    /// Builds the enricher from `config.metadata_sources`: each enabled name
    /// is resolved against the process's source registry, and `FallbackSource`
    /// is appended if the configured list didn't already include it, so "at
    /// least one fallback source" always holds regardless of configuration.
    pub fn from_config(config: &AppConfig, extra_sources: Vec<Arc<dyn Source>>) -> Self {
        let mut sources = extra_sources;
        let has_fallback = config
            .metadata_sources
            .iter()
            .any(|name| name.eq_ignore_ascii_case("fallback"));
        if has_fallback || sources.is_empty() {
            sources.push(Arc::new(FallbackSource));
        }

        Self::new(
            sources,
            config.max_metadata_sources_concurrent,
            config.metadata_cache_capacity,
            Duration::from_secs(config.metadata_source_timeout_secs),
        )
    }

    fn cache_key(platform_id: &str, title: &str) -> CacheKey {
        (platform_id.to_string(), title.to_lowercase())
    }

    #[instrument(level = "debug", skip(self), fields(platform_id = %request.platform_id))]
    pub async fn enrich(&self, request: EnrichRequest) -> Metadata {
        let key = Self::cache_key(&request.platform_id, &request.title);
        if let Some(hit) = self.cache.lock().await.get(&key).cloned() {
            return hit;
        }

        let candidates = self.collect_candidates(&request).await;
        let metadata = if candidates.is_empty() {
            Metadata::from_candidate(Candidate::titled(request.title.clone()), FALLBACK_CONFIDENCE)
        } else {
            let ranked = scoring::rank_candidates(candidates, &request.title, request.year, self.weights);
            let confidence = ranked
                .first()
                .map_or(FALLBACK_CONFIDENCE, |top| top.score.max(FALLBACK_CONFIDENCE));
            let merged = scoring::merge_ranked(&ranked);
            Metadata::from_candidate(merged, confidence)
        };

        self.cache.lock().await.put(key, metadata.clone());
        metadata
    }

    async fn collect_candidates(&self, request: &EnrichRequest) -> Vec<(Candidate, usize)> {
        let mut handles = Vec::with_capacity(self.sources.len());
        for (rank, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let semaphore = Arc::clone(&self.semaphore);
            let timeout = self.per_source_timeout;
            let title = request.title.clone();
            let platform_id = request.platform_id.clone();
            let region = request.region.clone();
            let declared_digest = request.declared_digest.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let result = tokio::time::timeout(
                    timeout,
                    source.search(&title, &platform_id, region.as_deref(), declared_digest.as_deref()),
                )
                .await;
                match result {
                    Ok(Ok(candidates)) => Some((rank, candidates)),
                    Ok(Err(error)) => {
                        warn!(source = source.name(), %error, "metadata source failed");
                        None
                    }
                    Err(_) => {
                        warn!(source = source.name(), "metadata source timed out");
                        None
                    }
                }
            }));
        }

        let mut out = Vec::new();
        for handle in handles {
            if let Ok(Some((rank, candidates))) = handle.await {
                out.extend(candidates.into_iter().map(|candidate| (candidate, rank)));
            }
        }
        out
    }
}

/// Small registry of built-in source names resolvable purely from
/// configuration, mirroring the way `platform-registry` resolves extensions
/// from a static table rather than requiring callers to hand-wire every
/// entry point.
#[must_use]
pub fn builtin_source_registry() -> HashMap<&'static str, fn() -> Arc<dyn Source>> {
    let mut registry: HashMap<&'static str, fn() -> Arc<dyn Source>> = HashMap::new();
    registry.insert("fallback", || Arc::new(FallbackSource));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::error::AppError;

    struct StaticSource {
        priority: usize,
        candidates: Vec<Candidate>,
    }

    #[async_trait]
    impl Source for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        fn priority(&self) -> usize {
            self.priority
        }

        async fn search(
            &self,
            _title: &str,
            _platform_id: &str,
            _region: Option<&str>,
            _declared_digest: Option<&str>,
        ) -> Result<Vec<Candidate>, AppError> {
            Ok(self.candidates.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl Source for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn priority(&self) -> usize {
            0
        }

        async fn search(
            &self,
            _title: &str,
            _platform_id: &str,
            _region: Option<&str>,
            _declared_digest: Option<&str>,
        ) -> Result<Vec<Candidate>, AppError> {
            Err(AppError::InternalError("source unavailable".to_string()))
        }
    }

    fn enricher_with(sources: Vec<Arc<dyn Source>>) -> Enricher {
        Enricher::new(sources, 4, 32, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn falls_back_to_sanitized_title_when_no_source_matches() {
        let enricher = enricher_with(vec![Arc::new(FallbackSource)]);
        let metadata = enricher
            .enrich(EnrichRequest {
                title: "Some Game".to_string(),
                platform_id: "nes".to_string(),
                region: None,
                year: None,
                declared_digest: None,
            })
            .await;
        assert_eq!(metadata.title, "Some Game");
        assert_eq!(metadata.confidence, FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn a_failing_source_does_not_prevent_enrichment() {
        let mut top = Candidate::titled("Chrono Trigger");
        top.developer = Some("Square".to_string());
        let sources: Vec<Arc<dyn Source>> = vec![
            Arc::new(FailingSource),
            Arc::new(StaticSource { priority: 1, candidates: vec![top] }),
            Arc::new(FallbackSource),
        ];
        let enricher = enricher_with(sources);
        let metadata = enricher
            .enrich(EnrichRequest {
                title: "Chrono Trigger".to_string(),
                platform_id: "snes".to_string(),
                region: None,
                year: None,
                declared_digest: None,
            })
            .await;
        assert_eq!(metadata.developer.as_deref(), Some("Square"));
        assert!(metadata.confidence > FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn repeated_requests_hit_the_cache() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        struct CountingSource {
            calls: Arc<std::sync::atomic::AtomicUsize>,
        }

        #[async_trait]
        impl Source for CountingSource {
            fn name(&self) -> &str {
                "counting"
            }

            fn priority(&self) -> usize {
                0
            }

            async fn search(
                &self,
                title: &str,
                _platform_id: &str,
                _region: Option<&str>,
                _declared_digest: Option<&str>,
            ) -> Result<Vec<Candidate>, AppError> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![Candidate::titled(title)])
            }
        }

        let enricher = enricher_with(vec![Arc::new(CountingSource { calls: Arc::clone(&calls) })]);
        let request = EnrichRequest {
            title: "Game".to_string(),
            platform_id: "gba".to_string(),
            region: None,
            year: None,
            declared_digest: None,
        };
        enricher.enrich(request.clone()).await;
        enricher.enrich(request).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_key_is_case_insensitive_on_title() {
        let enricher = enricher_with(vec![Arc::new(FallbackSource)]);
        enricher
            .enrich(EnrichRequest {
                title: "Game".to_string(),
                platform_id: "gba".to_string(),
                region: None,
                year: None,
                declared_digest: None,
            })
            .await;
        let cached = enricher
            .cache
            .lock()
            .await
            .contains(&Enricher::cache_key("gba", "GAME"));
        assert!(cached);
    }
}
