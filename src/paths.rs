//! Path utilities for shaderfarm working and dump directories.

use std::path::{Path, PathBuf};

/// Request file the parent writes and the worker consumes.
pub const REQUEST_FILENAME: &str = "WorkerInput.bin";

/// Response file the worker writes and the parent consumes.
pub const RESPONSE_FILENAME: &str = "WorkerOutput.bin";

/// Log file a worker process keeps in its working directory.
pub const WORKER_LOG_FILENAME: &str = "WorkerLog.txt";

/// Get the data directory for shaderfarm.
///
/// Uses the platform data directory:
/// - Linux: `~/.local/share/shaderfarm`
/// - macOS: `~/Library/Application Support/shaderfarm`
/// - Windows: `%APPDATA%\shaderfarm`
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("shaderfarm"))
        .unwrap_or_else(|| PathBuf::from(".shaderfarm"))
}

/// Default root under which per-thread worker directories are created.
pub fn default_working_root() -> PathBuf {
    get_data_dir().join("working")
}

/// Default root for debug dumps.
pub fn default_dump_dir() -> PathBuf {
    get_data_dir().join("dump")
}

/// Working directory for the channel owned by `thread_id` in process `pid`.
///
/// The (pid, thread id) pair makes concurrent channels collision-free without
/// any coordination, across threads and across scheduler processes sharing
/// the same root.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use shaderfarm::paths::working_directory;
///
/// let dir = working_directory(Path::new("/tmp/farm"), 4242, 3);
/// assert_eq!(dir, PathBuf::from("/tmp/farm/4242/3"));
/// ```
pub fn working_directory(root: &Path, pid: u32, thread_id: usize) -> PathBuf {
    root.join(pid.to_string()).join(thread_id.to_string())
}

/// Temporary sibling used for write-then-rename.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Expands a leading `~` in a path to the user's home directory.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use shaderfarm::paths::expand_tilde;
///
/// let path = PathBuf::from("/tmp/foo");
/// assert_eq!(expand_tilde(&path), path);
/// ```
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}
