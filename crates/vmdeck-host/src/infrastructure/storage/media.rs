//! Boot-media resolution.
//!
//! A machine's boot media is either a plain filesystem path, a `file://`
//! URI, or a reference in some other scheme (for example a document
//! provider URI on a mobile host) that the emulator cannot open directly.
//! References of the last kind are copied once into
//! `images/iso_<hash>.iso` through a [`ContentResolver`] and the local copy
//! is reused on every later start.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors from boot-media resolution.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no resolver for {scheme}:// references")]
    Unsupported { scheme: String },

    #[error("I/O error caching boot media at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not fetch {reference}: {reason}")]
    Fetch { reference: String, reason: String },
}

/// Copies the content behind a non-file reference to a local path.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Writes the full content of `reference` to `dest`.
    async fn copy_to(&self, reference: &str, dest: &Path) -> Result<(), MediaError>;
}

/// Resolver for hosts without any content provider: every reference is
/// refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContentResolver;

#[async_trait]
impl ContentResolver for NoContentResolver {
    async fn copy_to(&self, reference: &str, _dest: &Path) -> Result<(), MediaError> {
        Err(MediaError::Unsupported {
            scheme: scheme_of(reference).unwrap_or_default().to_string(),
        })
    }
}

/// Turns boot-media references into local paths, caching remote content.
#[derive(Clone)]
pub struct MediaCache {
    images_dir: PathBuf,
    resolver: Arc<dyn ContentResolver>,
}

impl MediaCache {
    pub fn new(images_dir: impl Into<PathBuf>, resolver: Arc<dyn ContentResolver>) -> Self {
        Self {
            images_dir: images_dir.into(),
            resolver,
        }
    }

    /// Local cache path for `reference`, keyed by a stable hash of the full
    /// reference string.
    pub fn cache_path(&self, reference: &str) -> PathBuf {
        let key = Uuid::new_v5(&Uuid::NAMESPACE_URL, reference.as_bytes());
        self.images_dir.join(format!("iso_{}.iso", key.simple()))
    }

    /// Resolves `reference` to a path the emulator can open.
    ///
    /// Plain paths are returned unchanged without checking that they exist;
    /// the command builder skips missing media on its own.
    pub async fn resolve(&self, reference: &str) -> Result<PathBuf, MediaError> {
        let Some(scheme) = scheme_of(reference) else {
            return Ok(PathBuf::from(reference));
        };
        if scheme.eq_ignore_ascii_case("file") {
            return Ok(PathBuf::from(&reference[scheme.len() + 3..]));
        }

        let cached = self.cache_path(reference);
        if cached.is_file() {
            debug!(reference, path = %cached.display(), "using cached boot media");
            return Ok(cached);
        }

        tokio::fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|source| MediaError::Io {
                path: self.images_dir.clone(),
                source,
            })?;

        // Copy next to the final name so an interrupted copy is never mistaken
        // for a complete one.
        let partial = cached.with_extension("iso.part");
        if let Err(e) = self.resolver.copy_to(reference, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, &cached)
            .await
            .map_err(|source| MediaError::Io {
                path: cached.clone(),
                source,
            })?;
        info!(reference, path = %cached.display(), "cached boot media");
        Ok(cached)
    }
}

/// The `scheme` of a `scheme://rest` reference.
fn scheme_of(reference: &str) -> Option<&str> {
    let (scheme, _) = reference.split_once("://")?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}
