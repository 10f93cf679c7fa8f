//! Filesystem primitives shared by the format classifiers.
//!
//! Every helper here treats a missing or unreadable directory as "nothing
//! there" rather than an error.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A session file and the mtime it had when listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Regular files in `dir` whose name passes `keep`, newest first.
///
/// Equal mtimes keep directory-listing order.
pub fn recent_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<Candidate> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<Candidate> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            if !keep(name) {
                return None;
            }
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(Candidate {
                path: entry.path(),
                modified: metadata.modified().ok()?,
            })
        })
        .collect();

    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    files
}

/// Newest file in `dir` whose name passes `keep`
pub fn most_recent_file(dir: &Path, keep: impl Fn(&str) -> bool) -> Option<Candidate> {
    recent_files(dir, keep).into_iter().next()
}

pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok()?.modified().ok()
}

/// True when `modified` is less than `threshold` before `now`.
///
/// An mtime in the future (clock skew between writer and reader) counts as
/// fresh.
pub fn is_fresh(modified: SystemTime, now: SystemTime, threshold: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age < threshold,
        Err(_) => true,
    }
}

/// Lexically normalised path: no `.` components, `..` folded into its
/// parent, no trailing separator. `..` never climbs above the root; leading
/// `..` of a relative path is kept.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            _ => parts.push(component),
        }
    }
    parts.into_iter().collect()
}

/// `cwd` is the worktree itself or somewhere underneath it
pub fn cwd_matches(cwd: &Path, worktree: &Path) -> bool {
    let cwd = clean_path(cwd);
    let worktree = clean_path(worktree);
    if cwd.as_os_str().is_empty() || worktree.as_os_str().is_empty() {
        return false;
    }
    cwd.starts_with(&worktree)
}

/// Read at most `max_bytes` from the end of `path`, split into lines.
///
/// When the read starts mid-file the first (partial) line is dropped.
pub fn read_tail_lines(path: &Path, max_bytes: u64) -> io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size == 0 {
        return Ok(Vec::new());
    }

    let start = size.saturating_sub(max_bytes);
    if start > 0 {
        file.seek(SeekFrom::Start(start))?;
    }

    let mut data = Vec::with_capacity((size - start) as usize);
    file.read_to_end(&mut data)?;

    let text = String::from_utf8_lossy(&data);
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    Ok(lines)
}
