//! Scrape orchestration: one batch read, then every collector in order.

use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};
use crate::metrics::collectors::{network, storage, system};
use crate::metrics::data::MetricRecord;
use crate::metrics::preread::{build_command, demultiplex, PreReadCache};
use crate::metrics::traits::MetricsProvider;
use crate::metrics::writer::MetricsWriter;
use crate::remote::CommandRunner;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// The metric subsystems, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collector {
    Time,
    LoadAvg,
    Stat,
    Vmstat,
    Memory,
    FileFd,
    Conntrack,
    Netstat,
    Sockstat,
    NetDev,
    DiskStats,
    Textfile,
    Arp,
    Entropy,
    Filesystem,
}

impl Collector {
    pub const ALL: [Collector; 15] = [
        Collector::Time,
        Collector::LoadAvg,
        Collector::Stat,
        Collector::Vmstat,
        Collector::Memory,
        Collector::FileFd,
        Collector::Conntrack,
        Collector::Netstat,
        Collector::Sockstat,
        Collector::NetDev,
        Collector::DiskStats,
        Collector::Textfile,
        Collector::Arp,
        Collector::Entropy,
        Collector::Filesystem,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collector::Time => "time",
            Collector::LoadAvg => "loadavg",
            Collector::Stat => "stat",
            Collector::Vmstat => "vmstat",
            Collector::Memory => "memory",
            Collector::FileFd => "filefd",
            Collector::Conntrack => "conntrack",
            Collector::Netstat => "netstat",
            Collector::Sockstat => "sockstat",
            Collector::NetDev => "netdev",
            Collector::DiskStats => "diskstats",
            Collector::Textfile => "textfile",
            Collector::Arp => "arp",
            Collector::Entropy => "entropy",
            Collector::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one collector contributes to the exposition.
#[derive(Debug)]
enum Output {
    Records(Vec<MetricRecord>),
    /// Pre-formatted exposition text, copied through unchanged
    Raw(String),
}

impl Output {
    fn is_empty(&self) -> bool {
        match self {
            Output::Records(records) => records.is_empty(),
            Output::Raw(text) => text.trim().is_empty(),
        }
    }
}

/// Every collector's output for one scrape, in order.
struct Scrape {
    outputs: Vec<(Collector, Output)>,
}

/// Node metrics for one remote host.
pub struct NodeCollector<R: ?Sized> {
    runner: Arc<R>,
    textfile_path: Option<String>,
    textfile_target: Option<String>,
}

impl<R: CommandRunner + ?Sized> NodeCollector<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            textfile_path: None,
            textfile_target: None,
        }
    }

    /// Collector for `config`'s host, including its textfile location.
    pub fn from_config(runner: Arc<R>, config: &ExporterConfig) -> Self {
        Self {
            runner,
            textfile_path: config.textfile_path.clone(),
            textfile_target: config.textfile_target(),
        }
    }

    /// Render one full scrape in the Prometheus text format.
    pub async fn scrape(&self) -> Result<String> {
        let scrape = self.run_all().await?;

        let mut writer = MetricsWriter::new();
        for (_, output) in &scrape.outputs {
            match output {
                Output::Records(records) => {
                    for record in records {
                        writer.write_record(record);
                    }
                }
                Output::Raw(text) => writer.push_raw(text),
            }
        }
        Ok(writer.finish())
    }

    /// One full scrape as structured records. Textfile passthrough is
    /// not parsed and therefore left out.
    pub async fn collect_records(&self) -> Result<Vec<MetricRecord>> {
        let scrape = self.run_all().await?;
        Ok(scrape
            .outputs
            .into_iter()
            .flat_map(|(_, output)| match output {
                Output::Records(records) => records,
                Output::Raw(_) => Vec::new(),
            })
            .collect())
    }

    async fn run_all(&self) -> Result<Scrape> {
        let started = Instant::now();
        let (cache, preread_ok) =
            PreReadCache::load(self.runner.as_ref(), self.textfile_target.as_deref()).await;

        let mut outputs = Vec::with_capacity(Collector::ALL.len());
        let mut produced = 0;
        for collector in Collector::ALL {
            match self.collect(collector, &cache).await {
                Ok(output) => {
                    if !output.is_empty() {
                        produced += 1;
                    }
                    outputs.push((collector, output));
                }
                Err(e) => warn!(
                    collector = collector.name(),
                    transport = e.is_transport(),
                    error = %e,
                    "Collector failed"
                ),
            }
        }

        if !preread_ok && produced == 0 {
            return Err(ExporterError::exec_error(
                "remote host unavailable: pre-read and every collector failed",
            ));
        }

        debug!(
            collectors = outputs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scrape finished"
        );
        Ok(Scrape { outputs })
    }

    async fn collect(&self, collector: Collector, cache: &PreReadCache) -> Result<Output> {
        let records = match collector {
            Collector::Time => vec![self.collect_time(cache).await?],
            Collector::LoadAvg => system::loadavg(&self.read(cache, system::LOADAVG_FILE).await?)?,
            Collector::Stat => system::stat(&self.read(cache, system::STAT_FILE).await?)?,
            Collector::Vmstat => system::vmstat(&self.read(cache, system::VMSTAT_FILE).await?)?,
            Collector::Memory => system::memory(&self.read(cache, system::MEMINFO_FILE).await?)?,
            Collector::FileFd => system::filefd(&self.read(cache, system::FILE_NR_FILE).await?)?,
            Collector::Conntrack => {
                let count = self.read(cache, system::CONNTRACK_COUNT_FILE).await?;
                let max = self.read(cache, system::CONNTRACK_MAX_FILE).await?;
                system::conntrack(&count, &max)?
            }
            Collector::Netstat => {
                let netstat = self.read(cache, network::NETSTAT_FILE).await?;
                let snmp = self.read(cache, network::SNMP_FILE).await?;
                network::netstat(&netstat, &snmp)?
            }
            Collector::Sockstat => {
                network::sockstat(&self.read(cache, network::SOCKSTAT_FILE).await?)?
            }
            Collector::NetDev => network::netdev(&self.read(cache, network::NETDEV_FILE).await?)?,
            Collector::DiskStats => {
                storage::diskstats(&self.read(cache, storage::DISKSTATS_FILE).await?)?
            }
            Collector::Textfile => return self.collect_textfile(cache).await.map(Output::Raw),
            Collector::Arp => network::arp(&self.read(cache, network::ARP_FILE).await?)?,
            Collector::Entropy => system::entropy(&self.read(cache, system::ENTROPY_FILE).await?)?,
            Collector::Filesystem => {
                let mounts = self.read(cache, storage::MOUNTS_FILE).await?;
                let df = self.runner.execute(storage::DF_COMMAND).await?;
                storage::filesystem(&storage::correlate(&mounts, &df))
            }
        };
        Ok(Output::Records(records))
    }

    async fn read(&self, cache: &PreReadCache, path: &str) -> Result<String> {
        cache.read_file(self.runner.as_ref(), path).await
    }

    /// RTC first, then the stored system time, then the remote `date`.
    async fn collect_time(&self, cache: &PreReadCache) -> Result<MetricRecord> {
        let offset = self.runner.clock_offset();
        if let Some(secs) = self
            .read(cache, system::RTC_FILE)
            .await
            .ok()
            .and_then(|text| system::parse_rtc(&text, offset))
        {
            return Ok(system::time(secs));
        }

        if let Some(secs) = self
            .read(cache, system::SYSTEM_TIME_FILE)
            .await
            .ok()
            .and_then(|text| system::parse_epoch(&text))
        {
            return Ok(system::time(secs));
        }

        let output = self.runner.execute(system::EPOCH_COMMAND).await?;
        system::parse_epoch(&output)
            .map(system::time)
            .ok_or_else(|| ExporterError::format_error(format!("unknown date output {:?}", output)))
    }

    /// Concatenated `*.prom` files under the textfile path, in path order.
    async fn collect_textfile(&self, cache: &PreReadCache) -> Result<String> {
        let (Some(path), Some(target)) = (&self.textfile_path, &self.textfile_target) else {
            return Ok(String::new());
        };

        if cache.is_empty() {
            let command = build_command(&[], Some(target.as_str()));
            let output = self.runner.execute(&command).await?;
            let files = demultiplex(&output);
            return Ok(textfile_text(
                files.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                path,
            ));
        }
        Ok(textfile_text(cache.iter(), path))
    }
}

fn textfile_text<'a>(files: impl Iterator<Item = (&'a str, &'a str)>, path: &str) -> String {
    let prefix = format!("{}/", path);
    files
        .filter(|(file, _)| *file == path || file.starts_with(&prefix))
        .map(|(_, contents)| contents)
        .collect()
}

impl<R: CommandRunner + ?Sized + 'static> MetricsProvider for NodeCollector<R> {
    async fn scrape(&self) -> Result<String> {
        NodeCollector::scrape(self).await
    }

    async fn records(&self) -> Result<Vec<MetricRecord>> {
        self.collect_records().await
    }
}
