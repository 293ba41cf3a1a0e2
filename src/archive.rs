//! Uploaded archive import with zip-slip protection
//!
//! Every entry is checked before anything is written: if one entry would land
//! outside the destination, nothing is extracted. The check covers both the
//! entry name and any symlinks already present under the destination.

use crate::error::DeployError;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Extract `archive` into `dest`, then delete the archive.
///
/// Returns the number of entries written. On a rejected entry the archive is
/// left where it is.
pub async fn import(archive: &Path, dest: &Path) -> Result<usize, DeployError> {
    info!(archive = %archive.display(), dest = %dest.display(), "Extracting archive");

    let (archive_path, dest_path) = (archive.to_path_buf(), dest.to_path_buf());
    let count = tokio::task::spawn_blocking(move || extract(&archive_path, &dest_path))
        .await
        .map_err(|e| DeployError::Archive {
            path: archive.to_path_buf(),
            reason: format!("extraction task failed: {}", e),
        })??;

    // Uploads are single-use
    if let Err(e) = tokio::fs::remove_file(archive).await {
        warn!(archive = %archive.display(), error = %e, "Failed to remove imported archive");
    }

    info!(entries = count, "Archive extracted");
    Ok(count)
}

/// Validate all entries of the zip at `archive_path`, then extract them into `dest`.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<usize, DeployError> {
    let archive_err = |reason: String| DeployError::Archive {
        path: archive_path.to_path_buf(),
        reason,
    };

    let file = File::open(archive_path).map_err(|e| archive_err(e.to_string()))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| archive_err(format!("not a valid zip: {}", e)))?;
    let root = std::fs::canonicalize(dest)
        .map_err(|e| archive_err(format!("destination {}: {}", dest.display(), e)))?;

    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| archive_err(format!("entry {}: {}", index, e)))?;
        let name = entry.name().to_string();

        let target = resolve_entry(&root, &name)
            .filter(|target| stays_inside(&root, target))
            .ok_or_else(|| DeployError::PathTraversal {
                entry: name.clone(),
                dest: dest.to_path_buf(),
            })?;
        plan.push((index, target, entry.is_dir()));
    }

    for (index, target, is_dir) in &plan {
        if *is_dir {
            std::fs::create_dir_all(target).map_err(|e| archive_err(e.to_string()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| archive_err(e.to_string()))?;
        }
        let mut entry = archive
            .by_index(*index)
            .map_err(|e| archive_err(format!("entry {}: {}", index, e)))?;
        let mut out = File::create(target)
            .map_err(|e| archive_err(format!("{}: {}", target.display(), e)))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| archive_err(format!("{}: {}", target.display(), e)))?;

        debug!(path = %target.display(), "Extracted");
    }

    Ok(plan.len())
}

/// Where an entry named `name` would land under `root`, or `None` if that is
/// outside `root`. `root` must already be absolute.
///
/// Accepted paths are `root` itself or start with `root` followed by a
/// separator; `Path::starts_with` compares whole components, so `/srv/data2`
/// is not inside `/srv/data`.
pub fn resolve_entry(root: &Path, name: &str) -> Option<PathBuf> {
    let candidate = normalize(&root.join(name));
    if candidate.starts_with(root) {
        Some(candidate)
    } else {
        None
    }
}

/// Whether writing `target` stays under `root` once existing symlinks are
/// followed. The deepest path that already exists (the target itself or an
/// ancestor) is resolved on disk; a dangling symlink never counts as inside.
fn stays_inside(root: &Path, target: &Path) -> bool {
    let mut existing = target;
    loop {
        if std::fs::symlink_metadata(existing).is_ok() {
            return match std::fs::canonicalize(existing) {
                Ok(real) => real.starts_with(root),
                Err(_) => false,
            };
        }
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return false,
        }
    }
}

/// Lexically resolve `.` and `..` (the entries don't exist on disk yet)
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, content) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_resolve_entry() {
        let root = Path::new("/srv/u1/blog/data");

        assert_eq!(
            resolve_entry(root, "index.html"),
            Some(PathBuf::from("/srv/u1/blog/data/index.html"))
        );
        assert_eq!(
            resolve_entry(root, "css/../js/app.js"),
            Some(PathBuf::from("/srv/u1/blog/data/js/app.js"))
        );
        assert_eq!(resolve_entry(root, "./"), Some(root.to_path_buf()));
        assert_eq!(resolve_entry(root, "../../etc/passwd"), None);
        assert_eq!(resolve_entry(root, "/etc/passwd"), None);
        assert_eq!(resolve_entry(root, "a/../../data2/x"), None);
        assert_eq!(resolve_entry(root, "a/../../../../../../x"), None);
    }

    #[tokio::test]
    async fn test_import_extracts_and_removes_archive() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("data");
        std::fs::create_dir(&dest).unwrap();
        let archive = tmp.path().join("upload.zip");
        write_zip(
            &archive,
            &[
                ("index.html", "<h1>hello</h1>"),
                ("assets/", ""),
                ("assets/site.css", "body {}"),
            ],
        );

        let count = import(&archive, &dest).await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(std::fs::read_to_string(dest.join("index.html")).unwrap(), "<h1>hello</h1>");
        assert_eq!(std::fs::read_to_string(dest.join("assets/site.css")).unwrap(), "body {}");
        assert!(!archive.exists());
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_any_write() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("a").join("data");
        std::fs::create_dir_all(&dest).unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(&archive, &[("good.txt", "ok"), ("../../escaped.txt", "pwned")]);

        let err = import(&archive, &dest).await.unwrap_err();

        assert!(matches!(err, DeployError::PathTraversal { ref entry, .. } if entry == "../../escaped.txt"));
        assert!(!dest.join("good.txt").exists());
        assert!(!tmp.path().join("escaped.txt").exists());
        assert!(archive.exists());
    }

    #[test]
    fn test_absolute_entry_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("data");
        std::fs::create_dir(&dest).unwrap();
        let archive = tmp.path().join("abs.zip");
        write_zip(&archive, &[("/etc/passwd", "root:x:0:0")]);

        let err = extract(&archive, &dest).unwrap_err();
        assert!(matches!(err, DeployError::PathTraversal { .. }));
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_entry_through_symlink_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("data");
        let outside = tmp.path().join("outside");
        std::fs::create_dir(&dest).unwrap();
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink("../outside", dest.join("link")).unwrap();
        let archive = tmp.path().join("redeploy.zip");
        write_zip(&archive, &[("index.html", "ok"), ("link/pwned.txt", "pwned")]);

        let err = extract(&archive, &dest).unwrap_err();

        assert!(matches!(err, DeployError::PathTraversal { ref entry, .. } if entry == "link/pwned.txt"));
        assert!(!outside.join("pwned.txt").exists());
        assert!(!dest.join("index.html").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_and_dangling_link_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("data");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(tmp.path().join("secret"), "keep").unwrap();
        std::os::unix::fs::symlink("../secret", dest.join("config.php")).unwrap();
        std::os::unix::fs::symlink("../not-there", dest.join("dangling")).unwrap();

        let archive = tmp.path().join("a.zip");
        write_zip(&archive, &[("config.php", "overwritten")]);
        assert!(matches!(extract(&archive, &dest), Err(DeployError::PathTraversal { .. })));
        assert_eq!(std::fs::read_to_string(tmp.path().join("secret")).unwrap(), "keep");

        let archive = tmp.path().join("b.zip");
        write_zip(&archive, &[("dangling", "created")]);
        assert!(matches!(extract(&archive, &dest), Err(DeployError::PathTraversal { .. })));
        assert!(!tmp.path().join("not-there").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_destination_allowed() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("data");
        std::fs::create_dir_all(dest.join("public")).unwrap();
        std::os::unix::fs::symlink("public", dest.join("www")).unwrap();
        let archive = tmp.path().join("site.zip");
        write_zip(&archive, &[("www/index.html", "<p>hi</p>")]);

        assert_eq!(extract(&archive, &dest).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(dest.join("public/index.html")).unwrap(),
            "<p>hi</p>"
        );
    }

    #[test]
    fn test_not_a_zip() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("data");
        std::fs::create_dir(&dest).unwrap();
        let archive = tmp.path().join("broken.zip");
        std::fs::write(&archive, "definitely not a zip").unwrap();

        let err = extract(&archive, &dest).unwrap_err();
        assert!(matches!(err, DeployError::Archive { .. }));
    }

    #[test]
    fn test_missing_archive() {
        let tmp = TempDir::new().unwrap();
        let err = extract(&tmp.path().join("nope.zip"), tmp.path()).unwrap_err();
        assert!(matches!(err, DeployError::Archive { .. }));
    }
}
