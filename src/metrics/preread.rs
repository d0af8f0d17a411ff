//! One-round-trip batch read of every fixed input file.
//!
//! `fgrep ""` with several file arguments prints every line of every file
//! prefixed with `path:`, reading each file to completion before the next.
//! With a single file argument grep drops that prefix, so `/dev/null` is
//! always passed as well. Splitting each output line on its first colon and
//! grouping contiguous runs by path recovers the individual files. If the remote tool ever
//! interleaved lines from different files this grouping would be wrong, so
//! the search command must keep that file-by-file ordering.

use crate::error::Result;
use crate::remote::CommandRunner;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Matches every line and prefixes it with the file name.
pub const SEARCH_COMMAND: &str = "/bin/fgrep \"\"";

/// Files fetched on every scrape.
pub const PREREAD_FILES: [&str; 17] = [
    "/etc/storage/system_time",
    "/proc/diskstats",
    "/proc/driver/rtc",
    "/proc/loadavg",
    "/proc/meminfo",
    "/proc/mounts",
    "/proc/net/arp",
    "/proc/net/dev",
    "/proc/net/netstat",
    "/proc/net/snmp",
    "/proc/net/sockstat",
    "/proc/stat",
    "/proc/sys/fs/file-nr",
    "/proc/sys/kernel/random/entropy_avail",
    "/proc/sys/net/netfilter/nf_conntrack_count",
    "/proc/sys/net/netfilter/nf_conntrack_max",
    "/proc/vmstat",
];

/// Always searched, so grep sees at least two files and keeps the prefix.
pub const NULL_FILE: &str = "/dev/null";

/// Build the combined search over `files` plus an optional extra target.
pub fn build_command(files: &[&str], extra: Option<&str>) -> String {
    let mut command = String::from(SEARCH_COMMAND);
    for file in std::iter::once(NULL_FILE).chain(files.iter().copied()).chain(extra) {
        command.push(' ');
        command.push_str(file);
    }
    command
}

/// Split combined `path:line` output back into per-file text.
///
/// Every line is re-terminated with `\n`. Lines without a colon are ignored.
pub fn demultiplex(output: &str) -> BTreeMap<String, String> {
    let mut files: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<&str> = None;
    let mut buffer = String::new();

    for line in output.lines() {
        let Some((path, rest)) = line.split_once(':') else {
            continue;
        };
        let path = path.trim();

        if current != Some(path) {
            if let Some(previous) = current {
                files.entry(previous.to_string()).or_default().push_str(&buffer);
            }
            buffer.clear();
            current = Some(path);
        }

        buffer.push_str(rest);
        buffer.push('\n');
    }

    if let Some(previous) = current {
        files.entry(previous.to_string()).or_default().push_str(&buffer);
    }

    files
}

/// Raw text of the files read in this scrape.
#[derive(Debug, Clone, Default)]
pub struct PreReadCache {
    files: BTreeMap<String, String>,
}

impl PreReadCache {
    /// An empty cache: every lookup goes to the remote host.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the cache from combined search output. Every fixed file gets
    /// an entry, empty when it was absent from the output.
    pub fn from_output(output: &str) -> Self {
        let mut files = demultiplex(output);
        for path in PREREAD_FILES {
            files.entry(path.to_string()).or_default();
        }
        Self { files }
    }

    /// Run the batch read. A failed read is logged and leaves the cache
    /// empty so each file falls back to its own remote read.
    pub async fn load<R>(runner: &R, extra: Option<&str>) -> (Self, bool)
    where
        R: CommandRunner + ?Sized,
    {
        let command = build_command(&PREREAD_FILES, extra);
        match runner.execute(&command).await {
            Ok(output) => {
                let cache = Self::from_output(&output);
                debug!(files = cache.len(), bytes = output.len(), "Pre-read finished");
                (cache, true)
            }
            Err(e) => {
                warn!(error = %e, "Pre-read failed, falling back to per-file reads");
                (Self::empty(), false)
            }
        }
    }

    /// Cached text for `path`, if the batch captured it.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Cached text for `path`, or an individual remote read when absent.
    pub async fn read_file<R>(&self, runner: &R, path: &str) -> Result<String>
    where
        R: CommandRunner + ?Sized,
    {
        match self.get(path) {
            Some(text) => Ok(text.to_string()),
            None => runner.execute(&format!("/bin/cat {}", path)).await,
        }
    }

    /// All cached entries, ordered by path.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ScriptedRunner;

    #[test]
    fn test_build_command() {
        assert_eq!(
            build_command(&["/proc/loadavg", "/proc/stat"], Some("/opt/metrics/*.prom")),
            "/bin/fgrep \"\" /dev/null /proc/loadavg /proc/stat /opt/metrics/*.prom"
        );
        assert_eq!(
            build_command(&[], Some("/opt/metrics/a.prom")),
            "/bin/fgrep \"\" /dev/null /opt/metrics/a.prom"
        );
    }

    #[test]
    fn test_demultiplex_contiguous_runs() {
        let output = "/proc/loadavg:0.15 0.10 0.05 1/98 1234\n\
                      /proc/driver/rtc:rtc_time\t: 12:34:56\n\
                      /proc/driver/rtc:rtc_date\t: 2024-01-02\n\
                      garbage without separator\n\
                      /proc/vmstat:pgfault 99\n";
        let files = demultiplex(output);
        assert_eq!(files.len(), 3);
        assert_eq!(files["/proc/loadavg"], "0.15 0.10 0.05 1/98 1234\n");
        assert_eq!(files["/proc/driver/rtc"], "rtc_time\t: 12:34:56\nrtc_date\t: 2024-01-02\n");
        assert_eq!(files["/proc/vmstat"], "pgfault 99\n");
    }

    #[test]
    fn test_fixed_files_are_always_present() {
        let cache = PreReadCache::from_output("/proc/loadavg:1.00 0.50 0.25 1/1 1\n");
        assert_eq!(cache.len(), PREREAD_FILES.len());
        assert_eq!(cache.get("/proc/loadavg"), Some("1.00 0.50 0.25 1/1 1\n"));
        assert_eq!(cache.get("/proc/net/arp"), Some(""));
        assert_eq!(cache.get("/not/fixed"), None);
    }

    #[tokio::test]
    async fn test_read_file_fallback_only_for_unknown_paths() {
        let runner = ScriptedRunner::new()
            .with_file("/proc/loadavg", "0.15 0.10 0.05 1/98 1234\n")
            .with_file("/proc/net/arp", "IP address HW type\n")
            .with_file("/proc/cpuinfo", "processor : 0\n");
        let cache = PreReadCache::from_output("/proc/loadavg:0.15 0.10 0.05 1/98 1234\n");

        assert_eq!(cache.read_file(&runner, "/proc/net/arp").await.unwrap(), "");
        assert!(runner.calls().is_empty());

        assert_eq!(cache.read_file(&runner, "/proc/cpuinfo").await.unwrap(), "processor : 0\n");
        assert_eq!(runner.calls(), vec!["/bin/cat /proc/cpuinfo"]);
    }

    #[tokio::test]
    async fn test_load_degrades_to_empty_cache() {
        let runner = ScriptedRunner::new().offline();
        let (cache, ok) = PreReadCache::load(&runner, None).await;
        assert!(!ok);
        assert!(cache.is_empty());
        assert!(cache.read_file(&runner, "/proc/loadavg").await.is_err());
    }

    #[tokio::test]
    async fn test_load_is_independent_of_other_files() {
        let alone = ScriptedRunner::new().with_file("/proc/stat", "ctxt 10\nbtime 5\n");
        let crowded = ScriptedRunner::new()
            .with_file("/proc/loadavg", "1 1 1 1/1 1\n")
            .with_file("/proc/stat", "ctxt 10\nbtime 5\n")
            .with_file("/proc/vmstat", "pgfault 99\n");

        let (a, _) = PreReadCache::load(&alone, None).await;
        let (b, _) = PreReadCache::load(&crowded, None).await;
        assert_eq!(a.get("/proc/stat"), Some("ctxt 10\nbtime 5\n"));
        assert_eq!(a.get("/proc/stat"), b.get("/proc/stat"));
        assert_eq!(alone.calls().len(), 1);
    }
}
