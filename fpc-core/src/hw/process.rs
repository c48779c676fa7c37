//! Process priority backend
//!
//! Finds a process by its `comm` name under `/proc` and changes its nice
//! value with `setpriority(2)`.

use std::fs;
use std::path::PathBuf;

use tracing::trace;

use crate::constants::{paths, sched};
use crate::engine::priority::PriorityControl;
use crate::error::{FpcError, Result};

pub struct ProcfsPriority {
    proc_root: PathBuf,
}

impl ProcfsPriority {
    pub fn new() -> Self {
        Self::with_root(paths::PROC)
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// First process whose `comm` equals `name`.
    ///
    /// `comm` is truncated by the kernel, so `name` is compared the same way.
    pub fn find_pid(&self, name: &str) -> Option<i32> {
        let max = sched::TASK_COMM_LEN - 1;
        let wanted = &name.as_bytes()[..name.len().min(max)];

        let entries = fs::read_dir(&self.proc_root).ok()?;
        for entry in entries.flatten() {
            let pid = match entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            // Processes can exit between readdir and read
            let comm = match fs::read(entry.path().join("comm")) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let comm = comm.strip_suffix(b"\n").unwrap_or(&comm);
            if comm == wanted {
                trace!(pid, name, "Found dependent process");
                return Some(pid);
            }
        }
        None
    }
}

impl Default for ProcfsPriority {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityControl for ProcfsPriority {
    fn set_named_nice(&self, name: &str, nice: i32) -> Result<bool> {
        if !(sched::MIN_NICE..=sched::MAX_NICE).contains(&nice) {
            return Err(FpcError::invalid_argument(format!("nice {} out of range", nice)));
        }
        let pid = match self.find_pid(name) {
            Some(pid) => pid,
            None => return Ok(false),
        };

        // SAFETY: plain syscall with integer arguments
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            // Gone since the scan
            Some(libc::ESRCH) => Ok(false),
            Some(libc::EPERM) | Some(libc::EACCES) => Err(FpcError::PermissionDenied(format!(
                "setpriority({}, {}): {}",
                pid, nice, err
            ))),
            _ => Err(FpcError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_proc(procs: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (pid, comm) in procs {
            let dir = tmp.path().join(pid);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("comm"), format!("{}\n", comm)).unwrap();
        }
        fs::create_dir(tmp.path().join("self")).unwrap();
        fs::write(tmp.path().join("uptime"), "1.0 1.0\n").unwrap();
        tmp
    }

    #[test]
    fn test_exact_name_match() {
        let tmp = fake_proc(&[("10", "fingerprintd-x"), ("20", "fingerprintd"), ("30", "init")]);
        let procs = ProcfsPriority::with_root(tmp.path());
        assert_eq!(procs.find_pid("fingerprintd"), Some(20));
        assert_eq!(procs.find_pid("fingerprint"), None);
    }

    #[test]
    fn test_long_names_compare_truncated() {
        let tmp = fake_proc(&[("42", "a_very_long_pro")]);
        let procs = ProcfsPriority::with_root(tmp.path());
        assert_eq!(procs.find_pid("a_very_long_process_name"), Some(42));
    }

    #[test]
    fn test_absent_process_is_not_an_error() {
        let tmp = fake_proc(&[("1", "init")]);
        let procs = ProcfsPriority::with_root(tmp.path());
        assert_eq!(procs.set_named_nice("fingerprintd", -20).unwrap(), false);
    }

    #[test]
    fn test_nice_range_checked() {
        let tmp = fake_proc(&[]);
        let procs = ProcfsPriority::with_root(tmp.path());
        assert!(procs.set_named_nice("fingerprintd", 20).is_err());
        assert!(procs.set_named_nice("fingerprintd", -21).is_err());
    }

    #[test]
    fn test_missing_proc_root() {
        let procs = ProcfsPriority::with_root("/nonexistent/proc");
        assert_eq!(procs.find_pid("init"), None);
    }
}
