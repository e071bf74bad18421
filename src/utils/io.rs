use anyhow::Result;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Copy a tree, skipping any entry whose name matches `exclude_names`.
/// Returns the number of files copied.
pub fn copy_dir_recursive_excluding(from: &Path, to: &Path, exclude_names: &[&str]) -> Result<usize> {
    if !to.exists() {
        fs::create_dir_all(to)?;
    }

    let should_include = |e: &walkdir::DirEntry| {
        if e.depth() == 0 {
            return true;
        }
        let name = match e.file_name().to_str() { Some(n) => n, None => return true };
        !exclude_names.iter().any(|ex| name.eq_ignore_ascii_case(ex))
    };

    let mut copied = 0;
    for entry in WalkDir::new(from).into_iter().filter_entry(|e| should_include(e)) {
        let entry = entry?;
        let path = entry.path();
        let rel = match path.strip_prefix(from) { Ok(r) => r, Err(_) => continue };
        let dest = to.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() { fs::create_dir_all(parent)?; }
            fs::copy(path, &dest)?;
            copied += 1;
        } else if entry.file_type().is_symlink() {
            copy_symlink(path, &dest)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy a working copy without its version-control metadata.
pub fn copy_tree_excluding_vcs(from: &Path, to: &Path) -> Result<usize> {
    copy_dir_recursive_excluding(from, to, &[".git"])
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    let target = fs::read_link(src)?;
    if let Some(parent) = dest.parent() { fs::create_dir_all(parent)?; }
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() { fs::create_dir_all(parent)?; }
    fs::copy(src, dest)?;
    Ok(())
}

pub fn is_dir_empty(dir: &Path) -> Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// Forward-slash form of a path, used for every path handed to a subprocess.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Absolute, lexically normalized path. Symlinks are resolved when the path exists.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(dunce(fs::canonicalize(path)?));
    }
    let base = if path.is_absolute() { PathBuf::new() } else { std::env::current_dir()? };
    let full = normalize(&base.join(path));
    // canonicalize the deepest existing ancestor so symlinked parents compare equal
    for ancestor in full.ancestors().skip(1) {
        if ancestor.exists() {
            let rest = full.strip_prefix(ancestor).unwrap_or(full.as_path());
            return Ok(dunce(fs::canonicalize(ancestor)?).join(rest));
        }
    }
    Ok(full)
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => { out.pop(); }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `a` equals `b` or one contains the other.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

// canonicalize on Windows yields verbatim `\\?\` paths that git rejects
fn dunce(path: PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix(r"\\?\") {
        Some(rest) => PathBuf::from(rest),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_skips_git_metadata() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join(".git/objects")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::create_dir_all(src.path().join("app/views")).unwrap();
        fs::write(src.path().join("app/views/index.php"), "<?php echo 1;").unwrap();
        fs::write(src.path().join(".env"), "DB_NAME=live").unwrap();

        let target = dst.path().join("sandbox");
        let copied = copy_tree_excluding_vcs(src.path(), &target).unwrap();

        assert_eq!(copied, 2);
        assert!(target.join("app/views/index.php").is_file());
        assert!(target.join(".env").is_file());
        assert!(!target.join(".git").exists());
    }

    #[test]
    fn normalize_and_overlap() {
        assert_eq!(normalize(Path::new("/srv/app/../app/./web")), PathBuf::from("/srv/app/web"));
        assert!(paths_overlap(Path::new("/srv/app"), Path::new("/srv/app/sandbox")));
        assert!(paths_overlap(Path::new("/srv"), Path::new("/srv/app")));
        assert!(!paths_overlap(Path::new("/srv/app"), Path::new("/srv/app-copy")));
    }

    #[test]
    fn slash_form() {
        assert_eq!(to_slash(Path::new(r"C:\work\site")), "C:/work/site");
        assert_eq!(to_slash(Path::new("/srv/site")), "/srv/site");
    }
}
