//! YAML manifest directory loader.
//!
//! Scans a directory tree for `*.yaml`/`*.yml`/`*.json` files, parses every
//! document into an [`Object`], and keeps the resource store in sync with the
//! files: new or edited documents are applied, documents that disappear are
//! deleted. A file that fails to read or parse is skipped for that pass and
//! the objects it produced earlier stay in place.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use super::ResourceStore;
use crate::resources::{Kind, Object, ObjectRef};

/// Field manager recorded on objects applied from manifest files.
pub const MANIFEST_FIELD_MANAGER: &str = "agentplane-manifests";

const DEFAULT_NAMESPACE: &str = "default";

/// Parse every document in one YAML (or JSON) source.
///
/// Empty documents are skipped; documents with an unknown `kind` are skipped
/// with a warning so one foreign object does not block the rest of the file.
pub fn parse_documents(source: &str, origin: &Path) -> anyhow::Result<Vec<Object>> {
    let mut out = Vec::new();
    for (idx, doc) in serde_yaml::Deserializer::from_str(source).enumerate() {
        let value = serde_yaml::Value::deserialize(doc)
            .with_context(|| format!("{}: document {} is not valid YAML", origin.display(), idx))?;
        if value.is_null() {
            continue;
        }
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or("")
            .to_string();
        if kind.parse::<Kind>().is_err() {
            tracing::warn!(
                "{}: skipping document {} with unsupported kind '{}'",
                origin.display(),
                idx,
                kind
            );
            continue;
        }
        let mut object: Object = serde_yaml::from_value(value)
            .with_context(|| format!("{}: document {} ({})", origin.display(), idx, kind))?;
        if object.metadata().namespace.is_empty() {
            object.metadata_mut().namespace = DEFAULT_NAMESPACE.to_string();
        }
        out.push(object);
    }
    Ok(out)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read dir {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml" | "json")
        ) {
            out.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct ManifestScan {
    /// Parsed objects with the file each came from, in path order.
    pub objects: Vec<(PathBuf, Object)>,
    /// Files that could not be read or parsed this pass.
    pub failed: BTreeSet<PathBuf>,
}

/// Read every manifest under `dir`. A broken file is logged and recorded in
/// [`ManifestScan::failed`]; the remaining files are still read.
pub fn read_manifests(dir: &Path) -> anyhow::Result<ManifestScan> {
    let mut scan = ManifestScan::default();
    if !dir.exists() {
        tracing::debug!("manifest dir {} does not exist", dir.display());
        return Ok(scan);
    }
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();
    for file in files {
        let parsed = fs::read_to_string(&file)
            .with_context(|| format!("failed to read {}", file.display()))
            .and_then(|source| parse_documents(&source, &file));
        match parsed {
            Ok(objects) => {
                tracing::debug!("{}: {} object(s)", file.display(), objects.len());
                scan.objects
                    .extend(objects.into_iter().map(|o| (file.clone(), o)));
            }
            Err(e) => {
                tracing::warn!("skipping manifest file: {:#}", e);
                scan.failed.insert(file);
            }
        }
    }
    Ok(scan)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub applied: usize,
    pub deleted: usize,
}

/// Keeps the store in line with a manifest directory.
pub struct ManifestLoader {
    dir: PathBuf,
    store: Arc<dyn ResourceStore>,
    /// Objects applied by earlier passes and the file each came from.
    loaded: BTreeMap<(Kind, ObjectRef), PathBuf>,
}

impl ManifestLoader {
    pub fn new(dir: PathBuf, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            dir,
            store,
            loaded: BTreeMap::new(),
        }
    }

    /// One pass: apply everything on disk, delete what vanished since the
    /// previous pass. Objects whose file failed to parse are left alone.
    pub async fn sync(&mut self) -> anyhow::Result<SyncSummary> {
        let scan = read_manifests(&self.dir)?;
        let mut summary = SyncSummary::default();
        let mut seen = BTreeMap::new();
        for (file, object) in scan.objects {
            let key = (object.kind(), object.object_ref());
            if let Some(previous) = seen.insert(key.clone(), file) {
                tracing::warn!(
                    "duplicate manifest for {} {} (also in {}); last one wins",
                    key.0,
                    key.1,
                    previous.display()
                );
            }
            match self.store.apply(object, MANIFEST_FIELD_MANAGER, true).await {
                Ok(_) => summary.applied += 1,
                Err(e) => tracing::warn!("failed to apply {} {}: {}", key.0, key.1, e),
            }
        }
        for (key, file) in &self.loaded {
            if seen.contains_key(key) {
                continue;
            }
            if scan.failed.contains(file) {
                tracing::debug!("keeping {} {}: {} did not parse", key.0, key.1, file.display());
                seen.insert(key.clone(), file.clone());
                continue;
            }
            match self.store.delete(key.0, &key.1).await {
                Ok(true) => {
                    tracing::info!("manifest removed: deleted {} {}", key.0, key.1);
                    summary.deleted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("failed to delete {} {}: {}", key.0, key.1, e);
                    seen.insert(key.clone(), file.clone());
                }
            }
        }
        self.loaded = seen;
        Ok(summary)
    }

    /// Re-sync every `interval` until the task is aborted.
    pub async fn run(mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.sync().await {
                Ok(s) if s.deleted > 0 => {
                    tracing::info!("manifest sync: applied={} deleted={}", s.applied, s.deleted)
                }
                Ok(s) => tracing::trace!("manifest sync: applied={}", s.applied),
                Err(e) => tracing::warn!("manifest sync failed: {:#}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const TWO_DOCS: &str = r#"
kind: ModelConfig
metadata:
  name: default-model
spec:
  model: gpt-4o
  provider: OpenAI
  apiKeySecret: openai
  apiKeySecretKey: key
---
kind: Secret
metadata:
  name: openai
  namespace: team
stringData:
  key: sk-test
---
kind: Pod
metadata:
  name: ignored
"#;

    #[test]
    fn parses_multi_document_files_and_defaults_namespace() {
        let objects = parse_documents(TWO_DOCS, Path::new("inline.yaml")).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].object_ref(), ObjectRef::new("default", "default-model"));
        let Object::Secret(secret) = &objects[1] else {
            panic!("expected secret");
        };
        assert_eq!(secret.data.get("key").map(String::as_str), Some("sk-test"));
    }

    #[tokio::test]
    async fn sync_applies_and_deletes_removed_documents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("models");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("all.yaml"), TWO_DOCS).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a manifest").unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut loader = ManifestLoader::new(dir.path().to_path_buf(), store.clone());
        let first = loader.sync().await.unwrap();
        assert_eq!(first, SyncSummary { applied: 2, deleted: 0 });
        assert!(
            store
                .get(Kind::Secret, &ObjectRef::new("team", "openai"))
                .await
                .unwrap()
                .is_some()
        );

        let only_model = TWO_DOCS.split("---").next().unwrap();
        std::fs::write(nested.join("all.yaml"), only_model).unwrap();
        let second = loader.sync().await.unwrap();
        assert_eq!(second, SyncSummary { applied: 1, deleted: 1 });
        assert!(
            store
                .get(Kind::Secret, &ObjectRef::new("team", "openai"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn broken_file_is_skipped_and_keeps_its_objects() {
        let dir = tempfile::tempdir().unwrap();
        let good = "kind: Secret\nmetadata:\n  name: good\nstringData:\n  k: v\n";
        let kept = "kind: Secret\nmetadata:\n  name: kept\nstringData:\n  k: v\n";
        std::fs::write(dir.path().join("a-good.yaml"), good).unwrap();
        std::fs::write(dir.path().join("b-kept.yaml"), kept).unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut loader = ManifestLoader::new(dir.path().to_path_buf(), store.clone());
        assert_eq!(loader.sync().await.unwrap().applied, 2);

        std::fs::write(dir.path().join("b-kept.yaml"), "metadata: [oops").unwrap();
        let scan = read_manifests(dir.path()).unwrap();
        assert_eq!(scan.objects.len(), 1);
        assert!(scan.failed.contains(&dir.path().join("b-kept.yaml")));

        let summary = loader.sync().await.unwrap();
        assert_eq!(summary, SyncSummary { applied: 1, deleted: 0 });
        for name in ["good", "kept"] {
            assert!(
                store
                    .get(Kind::Secret, &ObjectRef::new("default", name))
                    .await
                    .unwrap()
                    .is_some(),
                "{name} should still be stored"
            );
        }

        std::fs::remove_file(dir.path().join("b-kept.yaml")).unwrap();
        assert_eq!(loader.sync().await.unwrap().deleted, 1);
    }

    #[test]
    fn missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scan = read_manifests(&dir.path().join("absent")).unwrap();
        assert!(scan.objects.is_empty());
        assert!(scan.failed.is_empty());
    }
}
