use anyhow::Result;
use tracing::info;

use super::{load_store, manifest_path, save_store};
use crate::cli::ReopenArgs;

pub fn run(args: ReopenArgs) -> Result<()> {
    let manifest_path = manifest_path(&args.bench_root, args.manifest_path);
    let mut store = load_store(&manifest_path)?;

    for id in &args.ids {
        store = store.reopen(id)?;
        info!(id = %id, "reopened entry for relabeling");
    }

    save_store(&manifest_path, &store)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cli::ReopenArgs;
    use crate::commands::{load_store, manifest_path, save_store};
    use crate::manifest::ManifestStore;
    use crate::manifest::test_support::labeled_entry;
    use crate::model::EntryStatus;

    #[test]
    fn run_reopens_resolved_entries_and_rejects_others() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = manifest_path(dir.path(), None);
        let mut resolved = labeled_entry("https://example.com/a.jpg", "bottle", EntryStatus::Resolved);
        resolved.cache_path = Some("images/a.jpg".into());
        let ready = labeled_entry("https://example.com/b.jpg", "can", EntryStatus::Ready);
        let store = ManifestStore::from_entries(vec![resolved.clone(), ready.clone()])
            .expect("store loads");
        save_store(&path, &store).expect("manifest should be written");

        super::run(ReopenArgs {
            bench_root: dir.path().to_path_buf(),
            manifest_path: None,
            ids: vec![resolved.id.clone()],
        })
        .expect("reopen should succeed");

        let reopened = load_store(&path).expect("manifest should load");
        let entry = reopened.get(&resolved.id).expect("entry should remain");
        assert_eq!(entry.status, EntryStatus::Pending);
        assert!(entry.cache_path.is_none());

        let err = super::run(ReopenArgs {
            bench_root: dir.path().to_path_buf(),
            manifest_path: None,
            ids: vec![ready.id.clone()],
        });
        assert!(err.is_err());
        assert_eq!(load_store(&path).expect("manifest should load"), reopened);
    }
}
