//! Protocol counters, socket usage, interface traffic and the ARP table.

use crate::error::{ExporterError, Result};
use crate::metrics::data::MetricRecord;
use crate::metrics::procfs::{
    as_integer, as_key_value, as_key_value_list, as_tokens, as_tokens_by,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

pub const NETSTAT_FILE: &str = "/proc/net/netstat";
pub const SNMP_FILE: &str = "/proc/net/snmp";
pub const SOCKSTAT_FILE: &str = "/proc/net/sockstat";
pub const NETDEV_FILE: &str = "/proc/net/dev";
pub const ARP_FILE: &str = "/proc/net/arp";

lazy_static! {
    static ref NETDEV_GROUP_SEPARATOR: Regex =
        Regex::new(r"\s*\|\s*").expect("net/dev separator pattern is valid");
}

/// `/proc/net/netstat` and `/proc/net/snmp` come in header/value line
/// pairs per protocol section, so both are read as one table.
pub fn netstat(netstat: &str, snmp: &str) -> Result<Vec<MetricRecord>> {
    let mut combined = String::with_capacity(netstat.len() + snmp.len() + 1);
    combined.push_str(netstat);
    if !combined.is_empty() && !combined.ends_with('\n') {
        combined.push('\n');
    }
    combined.push_str(snmp);

    let table = as_key_value_list(&combined, ":", 0);
    let mut records = Vec::new();
    for (section, rows) in table.iter() {
        if rows.len() != 2 {
            continue;
        }
        let names = as_tokens(&rows[0]);
        let values = as_tokens(&rows[1]);
        for (name, value) in names.into_iter().zip(values) {
            if let Ok(n) = as_integer(value) {
                records.push(
                    MetricRecord::gauge(format!("node_netstat_{}_{}", section, name)).with_value(n),
                );
            }
        }
    }
    Ok(records)
}

/// `TCP: inuse 5 orphan 0 ...` becomes `node_sockstat_TCP_inuse` and so on.
pub fn sockstat(text: &str) -> Result<Vec<MetricRecord>> {
    let table = as_key_value(text, ":", 0);
    let mut records = Vec::new();
    for (protocol, value) in table.iter() {
        for pair in as_tokens(value).chunks_exact(2) {
            if let Ok(n) = as_integer(pair[1]) {
                records.push(
                    MetricRecord::gauge(format!("node_sockstat_{}_{}", protocol, pair[0]))
                        .with_value(n),
                );
            }
        }
    }
    Ok(records)
}

/// `/proc/net/dev`: the second header line names the receive and transmit
/// columns between `|` separators. One family per column, labelled by device.
pub fn netdev(text: &str) -> Result<Vec<MetricRecord>> {
    let table = as_key_value(text, ":", 2);
    let header = table
        .header
        .get(1)
        .ok_or_else(|| ExporterError::format_error("net/dev is missing its column header"))?;

    let groups = as_tokens_by(header, &NETDEV_GROUP_SEPARATOR);
    if groups.len() < 3 {
        return Err(ExporterError::format_error(format!(
            "unknown net/dev header {:?}",
            header
        )));
    }
    let columns = as_tokens(groups[1])
        .into_iter()
        .map(|field| ("receive", field))
        .chain(as_tokens(groups[2]).into_iter().map(|field| ("transmit", field)));

    let devices: Vec<(&str, Vec<&str>)> = table
        .iter()
        .map(|(device, values)| (device, as_tokens(values)))
        .collect();

    let mut records = Vec::new();
    for (index, (direction, field)) in columns.enumerate() {
        let mut record = MetricRecord::gauge(format!("node_network_{}_{}", direction, field));
        for (device, values) in &devices {
            if let Some(Ok(n)) = values.get(index).map(|v| as_integer(v)) {
                record.push(&[("device", *device)], n);
            }
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

/// Count ARP entries per interface, the last column of `/proc/net/arp`.
pub fn arp(text: &str) -> Result<Vec<MetricRecord>> {
    let mut entries: BTreeMap<&str, i64> = BTreeMap::new();
    for line in text.lines().skip(1) {
        if let Some(device) = as_tokens(line).last().copied() {
            *entries.entry(device).or_default() += 1;
        }
    }

    let mut record = MetricRecord::gauge("node_arp_entries").with_help("ARP entries by device");
    for (device, count) in entries {
        record.push(&[("device", device)], count);
    }
    Ok(if record.is_empty() { Vec::new() } else { vec![record] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::data::MetricValue;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:    1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
  eth0:  500000    4000    1    0    0     0          0        12   250000    2000    0    0    0     0       0          0
";

    #[test]
    fn test_netdev() {
        let records = netdev(NET_DEV).unwrap();
        assert_eq!(records.len(), 16);
        assert_eq!(records[0].name, "node_network_receive_bytes");
        assert_eq!(records[8].name, "node_network_transmit_bytes");

        let rx = &records[0];
        assert_eq!(rx.value_for(&[("device", "eth0")]), Some(MetricValue::Int(500_000)));
        assert_eq!(rx.value_for(&[("device", "lo")]), Some(MetricValue::Int(1000)));

        let tx_packets = records
            .iter()
            .find(|r| r.name == "node_network_transmit_packets")
            .unwrap();
        assert_eq!(tx_packets.value_for(&[("device", "eth0")]), Some(MetricValue::Int(2000)));
    }

    #[test]
    fn test_netdev_header_spacing() {
        let text = "Inter- | Receive | Transmit\n\
                     face | bytes packets | bytes packets\n\
                     wan0: 7 1 9 2\n";
        let records = netdev(text).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "node_network_receive_bytes",
                "node_network_receive_packets",
                "node_network_transmit_bytes",
                "node_network_transmit_packets",
            ]
        );
        assert_eq!(records[2].value_for(&[("device", "wan0")]), Some(MetricValue::Int(9)));
    }

    #[test]
    fn test_netdev_without_header_is_an_error() {
        assert!(netdev("").is_err());
        assert!(netdev("one\ntwo without bars\n eth0: 1 2\n").is_err());
    }

    #[test]
    fn test_netstat_pairs_only() {
        let netstat_text = "TcpExt: SyncookiesSent SyncookiesRecv\nTcpExt: 0 3";
        let snmp_text = "Ip: Forwarding DefaultTTL\nIp: 1 64\n\
                         Tcp: RtoAlgorithm MaxConn\nTcp: 1 -1\n\
                         Odd: Lonely\n";
        let records = netstat(netstat_text, snmp_text).unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "node_netstat_Ip_Forwarding",
                "node_netstat_Ip_DefaultTTL",
                "node_netstat_Tcp_RtoAlgorithm",
                "node_netstat_Tcp_MaxConn",
                "node_netstat_TcpExt_SyncookiesSent",
                "node_netstat_TcpExt_SyncookiesRecv",
            ]
        );
        assert_eq!(records[3].first_value(), Some(MetricValue::Int(-1)));
        assert_eq!(records[5].first_value(), Some(MetricValue::Int(3)));
    }

    #[test]
    fn test_sockstat() {
        let text = "sockets: used 120\n\
                    TCP: inuse 5 orphan 0 tw 2 alloc 7 mem 1\n\
                    UDP: inuse 3 mem 2\n";
        let records = sockstat(text).unwrap();
        assert_eq!(records.len(), 8);
        let inuse = records.iter().find(|r| r.name == "node_sockstat_TCP_inuse").unwrap();
        assert_eq!(inuse.first_value(), Some(MetricValue::Int(5)));
        assert!(records.iter().any(|r| r.name == "node_sockstat_sockets_used"));
    }

    #[test]
    fn test_arp_counts_by_device() {
        let text = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.2.10     0x1         0x2         aa:bb:cc:dd:ee:01     *        br0
192.168.2.11     0x1         0x2         aa:bb:cc:dd:ee:02     *        br0
10.0.0.1         0x1         0x2         aa:bb:cc:dd:ee:03     *        eth0
";
        let records = arp(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value_for(&[("device", "br0")]), Some(MetricValue::Int(2)));
        assert_eq!(records[0].value_for(&[("device", "eth0")]), Some(MetricValue::Int(1)));

        assert!(arp("IP address HW type Flags HW address Mask Device\n").unwrap().is_empty());
    }
}
