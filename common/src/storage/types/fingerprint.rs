use crate::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::upload::Upload,
};

/// Dedup key used at `initiate` time. Not a persisted row: it's derived
/// from the request and matched against the `upload` table directly.
/// Prefers the caller-declared digest when present; falls back to the
/// `(sanitized_name, declared_size)` pair so that clients uploading the
/// same file twice without a precomputed digest still collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Digest(String),
    NameAndSize { sanitized_name: String, declared_size: u64 },
}

impl Fingerprint {
    pub fn compute(declared_digest: Option<&str>, sanitized_name: &str, declared_size: u64) -> Self {
        match declared_digest {
            Some(digest) => Self::Digest(digest.to_string()),
            None => Self::NameAndSize {
                sanitized_name: sanitized_name.to_string(),
                declared_size,
            },
        }
    }

    /// Finds a non-terminal upload already in flight with this fingerprint,
    /// used by `initiate` to return the existing upload instead of starting
    /// a duplicate (section 8 idempotence).
    pub async fn find_in_flight_upload(
        &self,
        db: &SurrealDbClient,
    ) -> Result<Option<Upload>, AppError> {
        let mut found: Vec<Upload> = match self {
            Self::Digest(digest) => {
                db.query(
                    "SELECT * FROM upload
                     WHERE declared_digest = $digest
                        AND state != 'Completed' AND state != 'Failed'
                        AND state != 'Cancelled' AND state != 'Expired'
                     LIMIT 1",
                )
                .bind(("digest", digest.clone()))
                .await?
                .take(0)?
            }
            Self::NameAndSize { sanitized_name, declared_size } => {
                db.query(
                    "SELECT * FROM upload
                     WHERE sanitized_name = $name AND declared_size = $size
                        AND state != 'Completed' AND state != 'Failed'
                        AND state != 'Cancelled' AND state != 'Expired'
                     LIMIT 1",
                )
                .bind(("name", sanitized_name.clone()))
                .bind(("size", *declared_size))
                .await?
                .take(0)?
            }
        };

        Ok(found.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_digest_over_name_and_size() {
        let fp = Fingerprint::compute(Some("abc"), "game.nes", 40);
        assert_eq!(fp, Fingerprint::Digest("abc".into()));
    }

    #[test]
    fn falls_back_to_name_and_size_without_digest() {
        let fp = Fingerprint::compute(None, "game.nes", 40);
        assert_eq!(
            fp,
            Fingerprint::NameAndSize {
                sanitized_name: "game.nes".into(),
                declared_size: 40,
            }
        );
    }
}
