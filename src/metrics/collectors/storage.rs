//! Block device I/O and mounted filesystem capacity.

use crate::error::Result;
use crate::metrics::data::{FilesystemEntry, MetricRecord};
use crate::metrics::procfs::{as_integer, as_tokens};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

pub const DISKSTATS_FILE: &str = "/proc/diskstats";
pub const MOUNTS_FILE: &str = "/proc/mounts";

/// POSIX-format usage report in 1 KiB blocks.
pub const DF_COMMAND: &str = "df -Pk";

/// `/proc/diskstats` columns after major, minor and device name.
pub const DISK_STATS: [&str; 11] = [
    "reads_completed",
    "reads_merged",
    "sectors_read",
    "read_time_ms",
    "writes_completed",
    "writes_merged",
    "sectors_written",
    "write_time_ms",
    "io_now",
    "io_time_ms",
    "io_time_weighted",
];

lazy_static! {
    static ref IGNORED_MOUNT_POINTS: Regex =
        Regex::new(r"^/(dev|proc|sys)($|/)").expect("mount point pattern is valid");
    static ref IGNORED_FS_TYPES: Regex = Regex::new(concat!(
        r"^(autofs|binfmt_misc|bpf|cgroup2?|configfs|debugfs|devpts|devtmpfs|fusectl|",
        r"hugetlbfs|iso9660|mqueue|nsfs|overlay|proc|procfs|pstore|rpc_pipefs|",
        r"securityfs|selinuxfs|squashfs|sysfs|tracefs)$",
    ))
    .expect("filesystem type pattern is valid");
}

/// `/proc/diskstats`: one family per counter column, labelled by device.
/// Lines with too few columns are skipped.
pub fn diskstats(text: &str) -> Result<Vec<MetricRecord>> {
    let rows: Vec<(&str, Vec<&str>)> = text
        .lines()
        .filter_map(|line| {
            let tokens = as_tokens(line);
            if tokens.len() < 3 + DISK_STATS.len() {
                return None;
            }
            Some((tokens[2], tokens[3..3 + DISK_STATS.len()].to_vec()))
        })
        .collect();

    let mut records = Vec::new();
    for (column, stat) in DISK_STATS.iter().enumerate() {
        let mut record = MetricRecord::gauge(format!("node_disk_{}", stat));
        for (device, values) in &rows {
            if let Ok(n) = as_integer(values[column]) {
                record.push(&[("device", *device)], n);
            }
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

/// Whether a mount should be left out of the filesystem metrics.
pub fn is_ignored(mount_point: &str, fs_type: &str) -> bool {
    IGNORED_MOUNT_POINTS.is_match(mount_point) || IGNORED_FS_TYPES.is_match(fs_type)
}

/// Join the mount table with the usage report on mount point.
///
/// A mount that appears in only one of the two is dropped.
pub fn correlate(mounts: &str, df: &str) -> Vec<FilesystemEntry> {
    let mut candidates: BTreeMap<String, (&str, &str)> = BTreeMap::new();
    for line in mounts.lines() {
        let tokens = as_tokens(line);
        if tokens.len() < 3 {
            continue;
        }
        let mount_point = tokens[1].replace("\\040", " ");
        if is_ignored(&mount_point, tokens[2]) {
            continue;
        }
        candidates.insert(mount_point, (tokens[0], tokens[2]));
    }

    let mut entries: BTreeMap<String, FilesystemEntry> = BTreeMap::new();
    for line in df.lines().skip(1) {
        let tokens = as_tokens(line);
        if tokens.len() < 6 {
            continue;
        }
        let mount_point = tokens[5..].join(" ");
        let Some((device, fs_type)) = candidates.get(&mount_point) else {
            continue;
        };
        let (Some(size), Some(used), Some(available)) =
            (kibibytes(tokens[1]), kibibytes(tokens[2]), kibibytes(tokens[3]))
        else {
            continue;
        };

        entries.insert(
            mount_point.clone(),
            FilesystemEntry {
                mount_point,
                fs_type: fs_type.to_string(),
                device: device.to_string(),
                size_bytes: size,
                used_bytes: used,
                available_bytes: available,
            },
        );
    }

    entries.into_values().collect()
}

fn kibibytes(token: &str) -> Option<u64> {
    as_integer(token)
        .ok()
        .and_then(|n| u64::try_from(n).ok())
        .map(|n| n.saturating_mul(1024))
}

/// Size, free and available bytes per correlated mount.
pub fn filesystem(entries: &[FilesystemEntry]) -> Vec<MetricRecord> {
    let mut size =
        MetricRecord::gauge("node_filesystem_size").with_help("Filesystem size in bytes");
    let mut free = MetricRecord::gauge("node_filesystem_free")
        .with_help("Filesystem free space in bytes");
    let mut avail = MetricRecord::gauge("node_filesystem_avail")
        .with_help("Filesystem space available to non-root users in bytes");

    for entry in entries {
        let labels = [
            ("device", entry.device.as_str()),
            ("fstype", entry.fs_type.as_str()),
            ("mountpoint", entry.mount_point.as_str()),
        ];
        size.push(&labels, clamp(entry.size_bytes));
        free.push(&labels, clamp(entry.free_bytes()));
        avail.push(&labels, clamp(entry.available_bytes));
    }

    [size, free, avail]
        .into_iter()
        .filter(|record| !record.is_empty())
        .collect()
}

fn clamp(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::data::MetricValue;

    const MOUNTS: &str = "\
rootfs / rootfs rw 0 0
/dev/root /rom squashfs ro,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,noatime 0 0
sysfs /sys sysfs rw,nosuid,nodev,noexec,noatime 0 0
tmpfs /dev tmpfs rw,nosuid,relatime,size=512k 0 0
/dev/sda1 /data ext4 rw,relatime 0 0
/dev/sdb1 /mnt/usb\\040disk vfat rw,relatime 0 0
/dev/mtdblock5 /jffs jffs2 rw,noatime 0 0
";

    const DF: &str = "\
Filesystem           1024-blocks    Used Available Capacity Mounted on
/dev/root                   4096    4096         0 100% /rom
tmpfs                        512       0       512   0% /dev
/dev/sda1                   1000     400       550  42% /data
/dev/sdb1                   2000    1000      1000  50% /mnt/usb disk
/dev/sdc1                   3000       0      3000   0% /mnt/unlisted
";

    #[test]
    fn test_diskstats() {
        let text = "   8       0 sda 100 5 2000 30 50 6 800 40 0 60 70\n\
                    \x20  8       1 sda1 10 0 200 3 5 0 80 4 1 6 7 0 0 0 0\n\
                    \x20short line\n";
        let records = diskstats(text).unwrap();
        assert_eq!(records.len(), DISK_STATS.len());
        assert_eq!(records[0].name, "node_disk_reads_completed");
        assert_eq!(records[0].samples[0].labels[0].1, "sda");
        assert_eq!(records[0].value_for(&[("device", "sda")]), Some(MetricValue::Int(100)));
        assert_eq!(records[8].name, "node_disk_io_now");
        assert_eq!(records[8].value_for(&[("device", "sda1")]), Some(MetricValue::Int(1)));
        assert_eq!(records[10].value_for(&[("device", "sda")]), Some(MetricValue::Int(70)));
    }

    #[test]
    fn test_ignored_mounts() {
        assert!(is_ignored("/proc", "proc"));
        assert!(is_ignored("/sys/fs/cgroup", "tmpfs"));
        assert!(is_ignored("/dev", "tmpfs"));
        assert!(is_ignored("/rom", "squashfs"));
        assert!(!is_ignored("/device", "ext4"));
        assert!(!is_ignored("/", "rootfs"));
    }

    #[test]
    fn test_correlate_and_scale() {
        let entries = correlate(MOUNTS, DF);
        let mounts: Vec<&str> = entries.iter().map(|e| e.mount_point.as_str()).collect();
        assert_eq!(mounts, vec!["/data", "/mnt/usb disk"]);

        let data = &entries[0];
        assert_eq!(data.device, "/dev/sda1");
        assert_eq!(data.fs_type, "ext4");
        assert_eq!(data.size_bytes, 1_024_000);
        assert_eq!(data.free_bytes(), 614_400);
        assert_eq!(data.available_bytes, 563_200);
    }

    #[test]
    fn test_filesystem_records() {
        let entries = correlate(MOUNTS, DF);
        let records = filesystem(&entries);
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["node_filesystem_size", "node_filesystem_free", "node_filesystem_avail"]
        );
        assert_eq!(
            records[1].value_for(&[("mountpoint", "/data"), ("fstype", "ext4")]),
            Some(MetricValue::Int(614_400))
        );
        assert_eq!(records[0].value_for(&[("mountpoint", "/jffs")]), None);
    }

    #[test]
    fn test_no_matching_mounts() {
        let header_only = "Filesystem 1024-blocks Used Available Capacity Mounted on\n";
        assert!(correlate(MOUNTS, header_only).is_empty());
        assert!(filesystem(&[]).is_empty());
    }
}
