//! Time, load, memory, CPU and other kernel-wide counters.

use crate::error::{ExporterError, Result};
use crate::metrics::data::{MetricKind, MetricRecord};
use crate::metrics::procfs::{as_float, as_integer, as_key_value, as_tokens};
use chrono::{FixedOffset, NaiveDateTime};

pub const RTC_FILE: &str = "/proc/driver/rtc";
pub const SYSTEM_TIME_FILE: &str = "/etc/storage/system_time";
pub const LOADAVG_FILE: &str = "/proc/loadavg";
pub const FILE_NR_FILE: &str = "/proc/sys/fs/file-nr";
pub const CONNTRACK_COUNT_FILE: &str = "/proc/sys/net/netfilter/nf_conntrack_count";
pub const CONNTRACK_MAX_FILE: &str = "/proc/sys/net/netfilter/nf_conntrack_max";
pub const ENTROPY_FILE: &str = "/proc/sys/kernel/random/entropy_avail";
pub const MEMINFO_FILE: &str = "/proc/meminfo";
pub const VMSTAT_FILE: &str = "/proc/vmstat";
pub const STAT_FILE: &str = "/proc/stat";

/// Prints the remote clock as seconds since the epoch.
pub const EPOCH_COMMAND: &str = "date +%s";

/// Column names of a per-core `/proc/stat` row, in order.
pub const CPU_MODES: [&str; 10] = [
    "user",
    "nice",
    "system",
    "idle",
    "iowait",
    "irq",
    "softirq",
    "steal",
    "guest",
    "guest_nice",
];

/// Scalar `/proc/stat` fields: key, metric name, type, help.
const STAT_FIELDS: [(&str, &str, MetricKind, &str); 6] = [
    ("btime", "node_boot_time", MetricKind::Gauge, "Node boot time, in unixtime"),
    ("ctxt", "node_context_switches", MetricKind::Counter, "Total number of context switches"),
    ("processes", "node_forks", MetricKind::Counter, "Total number of forks"),
    ("intr", "node_intr", MetricKind::Counter, "Total number of interrupts serviced"),
    (
        "procs_blocked",
        "node_procs_blocked",
        MetricKind::Gauge,
        "Number of processes blocked waiting for I/O to complete",
    ),
    (
        "procs_running",
        "node_procs_running",
        MetricKind::Gauge,
        "Number of processes in runnable state",
    ),
];

/// Seconds since the epoch from the RTC driver's `rtc_date`/`rtc_time`,
/// shifted by the remote clock offset. `None` when absent or zero.
pub fn parse_rtc(text: &str, offset: FixedOffset) -> Option<i64> {
    let table = as_key_value(text, ":", 0);
    let date = table.get("rtc_date")?;
    let time = table.get("rtc_time")?;
    let naive =
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S").ok()?;
    let secs = naive.and_utc().timestamp() + i64::from(offset.local_minus_utc());
    (secs != 0).then_some(secs)
}

/// Seconds since the epoch from a bare number. `None` when absent or zero.
pub fn parse_epoch(text: &str) -> Option<i64> {
    as_integer(text)
        .ok()
        .or_else(|| as_float(text).ok().map(|secs| secs as i64))
        .filter(|secs| *secs != 0)
}

/// `node_time` for `secs` since the epoch.
pub fn time(secs: i64) -> MetricRecord {
    MetricRecord::counter("node_time")
        .with_help("System time in seconds since epoch (1970)")
        .with_value(secs)
}

/// The 1-minute load average, the first field of `/proc/loadavg`.
pub fn loadavg(text: &str) -> Result<Vec<MetricRecord>> {
    let tokens = as_tokens(text);
    let first = tokens
        .first()
        .ok_or_else(|| ExporterError::format_error(format!("unknown loadavg {:?}", text)))?;
    let load1 = as_float(first)?;
    Ok(vec![MetricRecord::gauge("node_load1")
        .with_help("1m load average")
        .with_value(load1)])
}

/// Allocated and maximum file handles from `/proc/sys/fs/file-nr`.
pub fn filefd(text: &str) -> Result<Vec<MetricRecord>> {
    let tokens = as_tokens(text);
    if tokens.len() < 3 {
        return Err(ExporterError::format_error(format!("unknown file-nr {:?}", text)));
    }

    let mut records = Vec::new();
    if let Ok(allocated) = as_integer(tokens[0]) {
        records.push(
            MetricRecord::gauge("node_filefd_allocated")
                .with_help("File descriptor statistics: allocated")
                .with_value(allocated),
        );
    }
    if let Ok(maximum) = as_integer(tokens[2]) {
        records.push(
            MetricRecord::gauge("node_filefd_maximum")
                .with_help("File descriptor statistics: maximum")
                .with_value(maximum),
        );
    }
    Ok(records)
}

/// Either file may be missing (no netfilter module); each is emitted on its own.
pub fn conntrack(count: &str, max: &str) -> Result<Vec<MetricRecord>> {
    let mut records = Vec::new();
    if let Ok(entries) = as_integer(count) {
        records.push(
            MetricRecord::gauge("node_nf_conntrack_entries")
                .with_help("Number of currently allocated flow entries for connection tracking")
                .with_value(entries),
        );
    }
    if let Ok(limit) = as_integer(max) {
        records.push(
            MetricRecord::gauge("node_nf_conntrack_entries_limit")
                .with_help("Maximum size of connection tracking table")
                .with_value(limit),
        );
    }
    Ok(records)
}

/// Bits of entropy in the kernel pool.
pub fn entropy(text: &str) -> Result<Vec<MetricRecord>> {
    let bits = as_integer(text)?;
    Ok(vec![MetricRecord::gauge("node_entropy_available_bits")
        .with_help("Bits of available entropy")
        .with_value(bits)])
}

/// `/proc/meminfo`: `Active(anon)` becomes `Active_anon`, and values with a
/// `kB` unit are scaled to bytes.
pub fn memory(text: &str) -> Result<Vec<MetricRecord>> {
    let cleaned = text.replace('(', "_").replace(')', "");
    let table = as_key_value(&cleaned, ":", 0);

    let mut records = Vec::new();
    for (key, value) in table.iter() {
        let tokens = as_tokens(value);
        let Some(Ok(mut size)) = tokens.first().map(|t| as_integer(t)) else {
            continue;
        };
        // `<key>: <n> kB` is three tokens on the line
        if tokens.len() == 2 {
            size *= 1024;
        }
        records.push(MetricRecord::gauge(format!("node_memory_{}", key)).with_value(size));
    }
    Ok(records)
}

/// Every numeric `/proc/vmstat` line as `node_vmstat_<name>`.
pub fn vmstat(text: &str) -> Result<Vec<MetricRecord>> {
    let table = as_key_value(text, " ", 0);
    Ok(table
        .iter()
        .filter_map(|(key, value)| {
            as_integer(value)
                .ok()
                .map(|n| MetricRecord::gauge(format!("node_vmstat_{}", key)).with_value(n))
        })
        .collect())
}

/// `/proc/stat` scalar fields plus per-core CPU time.
///
/// Per-core counters are divided by 100, the unit convention of the
/// embedded targets this exporter is aimed at.
pub fn stat(text: &str) -> Result<Vec<MetricRecord>> {
    let table = as_key_value(text, " ", 0);
    let mut records = Vec::new();

    for (key, name, kind, help) in STAT_FIELDS {
        let value = table
            .get(key)
            .and_then(|v| as_tokens(v).first().and_then(|t| as_integer(t).ok()));
        if let Some(value) = value {
            records.push(MetricRecord::new(name, kind).with_help(help).with_value(value));
        }
    }

    let mut cores: Vec<(u32, &str, &String)> = table
        .iter()
        .filter_map(|(key, value)| {
            let index = key.strip_prefix("cpu")?.parse::<u32>().ok()?;
            Some((index, key, value))
        })
        .collect();
    cores.sort_by_key(|(index, _, _)| *index);

    let mut cpu =
        MetricRecord::counter("node_cpu").with_help("Seconds the cpus spent in each mode");
    for (_, core, values) in cores {
        for (mode, token) in CPU_MODES.into_iter().zip(as_tokens(values)) {
            if let Ok(ticks) = as_integer(token) {
                cpu.push(&[("cpu", core), ("mode", mode)], ticks as f64 / 100.0);
            }
        }
    }
    if !cpu.is_empty() {
        records.push(cpu);
    }

    Ok(records)
}
