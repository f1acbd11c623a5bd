//! Minimal `/proc/<pid>/stat` reader.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStat {
    pub state: char,
    /// Field 22: start time in clock ticks since boot.
    pub start_ticks: u64,
}

pub fn parse_proc_stat(raw: &str) -> Option<ProcStat> {
    // The command name (field 2) may itself contain spaces and parentheses.
    let after_comm = &raw[raw.rfind(')')? + 1..];
    let mut fields = after_comm.split_whitespace();
    let state = fields.next()?.chars().next()?;
    // state is field 3, so starttime (22) is 19 fields further on.
    let start_ticks = fields.nth(18)?.parse().ok()?;
    Some(ProcStat { state, start_ticks })
}

pub fn read_proc_stat(pid: u32) -> Option<ProcStat> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_proc_stat(&raw)
}
