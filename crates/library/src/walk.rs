use std::path::Path;

use walkdir::{DirEntry, WalkDir};

/// Visits every regular file under `root` in file-name order, skipping any
/// directory that contains `exclude_file_name`. Walk errors are reported with
/// the failing path. Returns `false` when `visit` stopped the walk.
pub fn explore_files_recursive<F>(root: &Path, exclude_file_name: &str, mut visit: F) -> bool
where
    F: FnMut(Option<&walkdir::Error>, &Path) -> bool,
{
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded_dir(entry, exclude_file_name));

    for entry in walker {
        let keep_going = match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }
                visit(None, entry.path())
            }
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                visit(Some(&err), &path)
            }
        };
        if !keep_going {
            return false;
        }
    }
    true
}

fn is_excluded_dir(entry: &DirEntry, exclude_file_name: &str) -> bool {
    if exclude_file_name.is_empty() || !entry.file_type().is_dir() {
        return false;
    }
    entry.path().join(exclude_file_name).exists()
}

/// True when `path` lies under `root` and no directory between them carries
/// the exclusion marker.
pub fn is_path_in_root(path: &Path, root: &Path, exclude_file_name: &str) -> bool {
    if !path.starts_with(root) {
        return false;
    }
    if exclude_file_name.is_empty() {
        return true;
    }
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.join(exclude_file_name).exists() {
            return false;
        }
        if dir == root {
            break;
        }
        current = dir.parent();
    }
    true
}
