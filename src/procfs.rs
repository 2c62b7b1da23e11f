//! Live process information read from `/proc`.
//!
//! Every query is a best-effort instantaneous sample: the process may exit
//! between opening and reading the file, in which case the caller just gets a
//! zero (or `None`) back.

use std::{fs::File, io::Read, time::Duration};

use libc::pid_t;

use crate::utils::Memory;

/// `/proc/<pid>/status` is around 1.5 KB; the fields we want sit near the top.
const STATUS_READ_LIMIT: u64 = 4096;

fn read_bounded(path: &str) -> Option<String> {
  let file = File::open(path).ok()?;
  let mut buf = Vec::with_capacity(STATUS_READ_LIMIT as usize);
  file.take(STATUS_READ_LIMIT).read_to_end(&mut buf).ok()?;
  Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Find `label` at the start of a line and parse the integer after it.
pub fn parse_status_field(status: &str, label: &str) -> Option<u64> {
  status
    .lines()
    .find_map(|line| line.strip_prefix(label))
    .and_then(|rest| rest.split_whitespace().next())
    .and_then(|value| value.parse().ok())
}

/// Parse utime + stime (in clock ticks) out of `/proc/<pid>/stat`.
///
/// The command name in field 2 may contain spaces and parentheses, so the
/// remaining fields are counted from the last `)`.
pub fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
  let rest = &stat[stat.rfind(')')? + 1..];
  let mut fields = rest.split_whitespace().skip(11);
  let utime: u64 = fields.next()?.parse().ok()?;
  let stime: u64 = fields.next()?.parse().ok()?;
  Some(utime + stime)
}

/// Current resident memory of `pid`, or zero when it cannot be read.
pub fn resident_memory(pid: pid_t) -> Memory {
  read_bounded(&format!("/proc/{pid}/status"))
    .and_then(|status| parse_status_field(&status, "VmRSS:"))
    .map(Memory::from_kilobytes)
    .unwrap_or_default()
}

pub fn thread_count(pid: pid_t) -> Option<u64> {
  read_bounded(&format!("/proc/{pid}/status"))
    .and_then(|status| parse_status_field(&status, "Threads:"))
}

/// CPU time (user + system) consumed so far by the live process.
pub fn cpu_time(pid: pid_t) -> Duration {
  read_bounded(&format!("/proc/{pid}/stat"))
    .and_then(|stat| parse_stat_cpu_ticks(&stat))
    .map(ticks_to_duration)
    .unwrap_or_default()
}

fn ticks_to_duration(ticks: u64) -> Duration {
  // SAFETY: sysconf has no preconditions
  let hz = match unsafe { libc::sysconf(libc::_SC_CLK_TCK) } {
    hz if hz > 0 => hz as u64,
    _ => 100,
  };
  Duration::from_millis(ticks * 1000 / hz)
}
