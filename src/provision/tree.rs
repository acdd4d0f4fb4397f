//! Directory-tree helpers: recursive copy, ownership, content manifests.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::errors::{DeployError, Result};
use crate::platform::pal::Platform;
use crate::provision::Owner;

/// Totals from a [`copy_tree`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    /// Regular files copied.
    pub files: u64,
    /// Directories created.
    pub dirs: u64,
    /// Symlinks recreated.
    pub symlinks: u64,
    /// Bytes of regular-file content copied.
    pub bytes: u64,
}

/// Recursively copy `src` into `dst`, creating `dst` if needed.
///
/// Symlinks are recreated as symlinks, existing files are overwritten, and
/// entries whose file name appears in `exclude` are skipped at every depth.
///
/// # Errors
/// `Io` naming the path that could not be read or written.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[String]) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    copy_dir(src, dst, exclude, &mut stats)?;
    Ok(stats)
}

fn copy_dir(src: &Path, dst: &Path, exclude: &[String], stats: &mut CopyStats) -> Result<()> {
    if !dst.is_dir() {
        fs::create_dir_all(dst).map_err(|e| DeployError::io(dst, e))?;
        stats.dirs += 1;
    }
    let mut entries: Vec<_> = fs::read_dir(src)
        .map_err(|e| DeployError::io(src, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| DeployError::io(src, e))?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name();
        if exclude.iter().any(|x| name.to_str() == Some(x.as_str())) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type().map_err(|e| DeployError::io(&from, e))?;

        if file_type.is_symlink() {
            let target = fs::read_link(&from).map_err(|e| DeployError::io(&from, e))?;
            remove_existing(&to)?;
            std::os::unix::fs::symlink(&target, &to).map_err(|e| DeployError::io(&to, e))?;
            stats.symlinks += 1;
        } else if file_type.is_dir() {
            if fs::symlink_metadata(&to).is_ok_and(|m| !m.is_dir()) {
                remove_existing(&to)?;
            }
            copy_dir(&from, &to, exclude, stats)?;
        } else {
            if fs::symlink_metadata(&to).is_ok_and(|m| m.is_symlink() || m.is_dir()) {
                remove_existing(&to)?;
            }
            stats.bytes += fs::copy(&from, &to).map_err(|e| DeployError::io(&to, e))?;
            stats.files += 1;
        }
    }
    Ok(())
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(|e| DeployError::io(path, e)),
        Ok(_) => fs::remove_file(path).map_err(|e| DeployError::io(path, e)),
        Err(_) => Ok(()),
    }
}

/// Remove `path` whatever it is. Returns whether anything was there.
///
/// # Errors
/// `Io` when the entry exists but cannot be removed.
pub fn remove_path(path: &Path) -> Result<bool> {
    let existed = fs::symlink_metadata(path).is_ok();
    remove_existing(path)?;
    Ok(existed)
}

/// Apply `owner` to `root` and everything below it. Symlinks are changed
/// themselves, never followed.
///
/// # Errors
/// `Io` on the first path that cannot be read or chowned.
pub fn chown_tree(platform: &dyn Platform, root: &Path, owner: Owner) -> Result<u64> {
    let mut count = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let meta = fs::symlink_metadata(&path).map_err(|e| DeployError::io(&path, e))?;
        platform.set_owner(&path, owner.uid, owner.gid)?;
        count += 1;
        if meta.is_dir() {
            for entry in fs::read_dir(&path).map_err(|e| DeployError::io(&path, e))? {
                stack.push(entry.map_err(|e| DeployError::io(&path, e))?.path());
            }
        }
    }
    Ok(count)
}

/// Size and SHA-256 of one file in a manifest; symlinks record their target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    /// Regular file.
    File { size: u64, sha256: String },
    /// Symbolic link.
    Symlink { target: PathBuf },
    /// Directory.
    Dir,
}

/// Content manifest keyed by path relative to the tree root.
pub type Manifest = BTreeMap<PathBuf, ManifestEntry>;

/// Build a manifest of everything below `root`.
///
/// # Errors
/// `Io` on unreadable entries.
pub fn manifest(root: &Path) -> Result<Manifest> {
    let mut out = Manifest::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).map_err(|e| DeployError::io(&dir, e))? {
            let entry = entry.map_err(|e| DeployError::io(&dir, e))?;
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let file_type = entry.file_type().map_err(|e| DeployError::io(&path, e))?;
            if file_type.is_symlink() {
                let target = fs::read_link(&path).map_err(|e| DeployError::io(&path, e))?;
                out.insert(rel, ManifestEntry::Symlink { target });
            } else if file_type.is_dir() {
                out.insert(rel, ManifestEntry::Dir);
                stack.push(path);
            } else {
                let (size, sha256) = digest_file(&path)?;
                out.insert(rel, ManifestEntry::File { size, sha256 });
            }
        }
    }
    Ok(out)
}

fn digest_file(path: &Path) -> Result<(u64, String)> {
    let mut file = fs::File::open(path).map_err(|e| DeployError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| DeployError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, format!("{:x}", hasher.finalize())))
}

/// Number of regular files and their total size in a manifest.
#[must_use]
pub fn manifest_totals(manifest: &Manifest) -> (u64, u64) {
    manifest.values().fold((0, 0), |(files, bytes), entry| match entry {
        ManifestEntry::File { size, .. } => (files + 1, bytes + size),
        _ => (files, bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("pkg/sub")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("pkg/__pycache__")).unwrap();
        fs::write(root.join("setup.py"), "from setuptools import setup\n").unwrap();
        fs::write(root.join("pkg/__init__.py"), "").unwrap();
        fs::write(root.join("pkg/sub/mod.py"), "x = 1\n").unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(root.join("pkg/__pycache__/mod.pyc"), [0u8; 16]).unwrap();
        std::os::unix::fs::symlink("pkg/sub/mod.py", root.join("alias.py")).unwrap();
    }

    #[test]
    fn copy_skips_excluded_names_and_keeps_symlinks() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        sample_tree(&src);

        let exclude = vec![".git".to_string(), "__pycache__".to_string()];
        let stats = copy_tree(&src, &dst, &exclude).unwrap();

        assert_eq!(stats.files, 3);
        assert_eq!(stats.symlinks, 1);
        assert!(dst.join("pkg/sub/mod.py").is_file());
        assert!(!dst.join(".git").exists());
        assert!(!dst.join("pkg/__pycache__").exists());
        assert_eq!(
            fs::read_link(dst.join("alias.py")).unwrap(),
            PathBuf::from("pkg/sub/mod.py")
        );
    }

    #[test]
    fn copy_overwrites_previous_content() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        sample_tree(&src);
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("setup.py"), "old").unwrap();

        copy_tree(&src, &dst, &[]).unwrap();
        assert_eq!(
            fs::read_to_string(dst.join("setup.py")).unwrap(),
            "from setuptools import setup\n"
        );
    }

    #[test]
    fn remove_path_handles_trees_and_absence() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("tree");
        sample_tree(&root);
        assert!(remove_path(&root).unwrap());
        assert!(!root.exists());
        assert!(!remove_path(&root).unwrap());
        assert!(tmp.path().is_dir());
    }

    #[test]
    fn chown_tree_visits_every_entry() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("tree");
        sample_tree(&root);
        let platform = MockPlatform::new();
        let owner = Owner { uid: 990, gid: 991 };

        let count = chown_tree(&platform, &root, owner).unwrap();
        assert_eq!(count, 1 + manifest(&root).unwrap().len() as u64);
        assert_eq!(platform.owner_of(&root.join("alias.py")), Some((990, 991)));
        assert_eq!(platform.owner_of(&root), Some((990, 991)));
    }

    #[test]
    fn manifest_detects_content_change() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        sample_tree(&a);
        copy_tree(&a, &b, &[]).unwrap();
        assert_eq!(manifest(&a).unwrap(), manifest(&b).unwrap());

        fs::write(b.join("pkg/sub/mod.py"), "x = 2\n").unwrap();
        assert_ne!(manifest(&a).unwrap(), manifest(&b).unwrap());
    }

    #[test]
    fn totals_count_regular_files_only() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("d")).unwrap();
        fs::write(tmp.path().join("d/one"), "12345").unwrap();
        fs::write(tmp.path().join("two"), "123").unwrap();
        let (files, bytes) = manifest_totals(&manifest(tmp.path()).unwrap());
        assert_eq!((files, bytes), (2, 8));
    }
}
