//! Process inspection helpers over procfs and `kill(2)`.

use std::fs;
use std::io;

/// Whether a process with this pid currently exists.
///
/// `kill(pid, 0)` performs the permission and existence checks without
/// delivering a signal; EPERM still proves the process exists.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let ret = unsafe { libc::kill(pid as i32, 0) };
    if ret == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Number of threads of a process, 0 when it cannot be read.
///
/// Parsed from field 20 of `/proc/<pid>/stat`; the comm field may contain
/// spaces and parentheses, so parsing starts after the last `)`.
pub fn thread_count(pid: u32) -> u32 {
    read_thread_count(pid).unwrap_or(0)
}

fn read_thread_count(pid: u32) -> io::Result<u32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat"))?;
    let rest = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed stat line"))?;

    // after the comm field: state is field 3, num_threads is field 20
    rest.split_whitespace()
        .nth(17)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing num_threads field"))
}
