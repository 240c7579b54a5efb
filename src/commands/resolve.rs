use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{info, warn};

use super::{load_store, manifest_path, resolved_manifest_path, save_store};
use crate::cli::ResolveArgs;
use crate::dedup::{derive_entry_id, fingerprint_image_ref};
use crate::manifest::{CacheLookup, ManifestStore};
use crate::util::{ensure_directory, write_json_pretty};

const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

/// Image cache laid out as one file per image, named after the image's
/// fingerprint. Remote images must already be downloaded into it; local files
/// are used in place or copied in.
pub struct DirectoryCache {
    cache_dir: PathBuf,
    copy_local: bool,
    remote_pattern: Regex,
    extension_pattern: Regex,
}

impl DirectoryCache {
    pub fn new(cache_dir: &Path, copy_local: bool) -> Result<Self> {
        let remote_pattern =
            Regex::new(r"(?i)^https?://").context("failed to compile remote ref regex")?;
        let extension_pattern = Regex::new(r"\.([a-zA-Z0-9]{2,6})(?:[?#].*)?$")
            .context("failed to compile extension regex")?;

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            copy_local,
            remote_pattern,
            extension_pattern,
        })
    }

    /// Where the cached copy of `image_ref` lives, whether or not it exists yet.
    pub fn cache_file(&self, image_ref: &str) -> PathBuf {
        let extension = self
            .extension_pattern
            .captures(image_ref)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string());
        let name = derive_entry_id(&fingerprint_image_ref(image_ref));
        self.cache_dir.join(format!("{name}.{extension}"))
    }

    fn local_source(&self, image_ref: &str) -> Option<PathBuf> {
        if self.remote_pattern.is_match(image_ref) {
            return None;
        }
        let trimmed = image_ref.trim();
        if trimmed.to_ascii_lowercase().starts_with("file://") {
            let path = &trimmed["file://".len()..];
            return Some(PathBuf::from(path.strip_prefix("localhost").unwrap_or(path)));
        }
        Some(PathBuf::from(trimmed))
    }

    fn copy_into_cache(&self, source: &Path, target: &Path) -> Result<()> {
        ensure_directory(&self.cache_dir)?;
        fs::copy(source, target).with_context(|| {
            format!(
                "failed to copy {} into cache {}",
                source.display(),
                target.display()
            )
        })?;
        Ok(())
    }
}

impl CacheLookup for DirectoryCache {
    fn lookup(&self, image_ref: &str) -> Option<PathBuf> {
        let cached = self.cache_file(image_ref);
        if cached.is_file() {
            return Some(cached);
        }

        let source = self.local_source(image_ref)?;
        if !source.is_file() {
            return None;
        }
        if !self.copy_local {
            return Some(source);
        }

        match self.copy_into_cache(&source, &cached) {
            Ok(()) => Some(cached),
            Err(err) => {
                warn!(error = %err, image_ref = %image_ref, "local image not cached");
                None
            }
        }
    }
}

pub fn run(args: ResolveArgs) -> Result<()> {
    let manifest_path = manifest_path(&args.bench_root, args.manifest_path);
    let resolved_path = resolved_manifest_path(&args.bench_root, args.resolved_path);
    let cache_dir = args
        .cache_dir
        .unwrap_or_else(|| args.bench_root.join("images"));

    let store = load_store(&manifest_path)?;
    let cache = DirectoryCache::new(&cache_dir, args.copy_local)?;
    let resolved = store.resolve(&cache);

    info!(
        cache_dir = %cache_dir.display(),
        resolved = resolved.resolved_count,
        unresolved = resolved.unresolved.len(),
        skipped = resolved.skipped_count,
        "resolve completed"
    );
    for entry in &resolved.unresolved {
        warn!(id = %entry.id, image_ref = %entry.image_ref, "entry not found in image cache");
    }

    write_json_pretty(&resolved_path, &resolved)?;
    info!(path = %resolved_path.display(), "wrote resolved manifest");

    let next = ManifestStore::from_manifest(resolved.to_manifest())?;
    save_store(&manifest_path, &next)?;

    if args.strict && !resolved.unresolved.is_empty() {
        bail!(
            "{} labeled entries could not be resolved; see {}",
            resolved.unresolved.len(),
            resolved_path.display()
        );
    }

    Ok(())
}
