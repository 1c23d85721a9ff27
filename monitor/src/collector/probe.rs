//! Remote probe script and its output schema.
//!
//! The probe is a self-contained Python 3 script uploaded to the host on
//! every collection. It prints a single JSON object on stdout and degrades
//! gracefully when optional system utilities are absent.

use crate::database::{DiskUsage, InterfaceIo};
use serde::Deserialize;
use std::collections::HashMap;

/// Virtual filesystems the probe must not report. Kept here as well so the
/// collector rejects them even if a stale probe version slips through.
pub const IGNORED_FSTYPES: &[&str] = &[
    "squashfs", "tmpfs", "devtmpfs", "proc", "sysfs", "cgroup", "cgroup2", "ramfs", "overlay",
    "udev",
];

/// The probe script. Samples CPU over one second and uses the same window to
/// derive disk and network I/O rates from the cumulative counters.
pub const PROBE_SCRIPT: &str = r##"
import json
import os
import subprocess
import time

import psutil

IGNORED_FSTYPES = {
    "squashfs", "tmpfs", "devtmpfs", "proc", "sysfs",
    "cgroup", "cgroup2", "ramfs", "overlay", "udev",
}

metrics = {}

disk_before = psutil.disk_io_counters()
net_before = psutil.net_io_counters()
window_start = time.monotonic()

metrics["cpu_percent"] = psutil.cpu_percent(interval=1)
metrics["cpu_count"] = psutil.cpu_count()

elapsed = max(time.monotonic() - window_start, 0.001)
disk_after = psutil.disk_io_counters()
net_after = psutil.net_io_counters()

if disk_before and disk_after:
    metrics["disk_io_read"] = (disk_after.read_bytes - disk_before.read_bytes) / elapsed
    metrics["disk_io_write"] = (disk_after.write_bytes - disk_before.write_bytes) / elapsed
else:
    metrics["disk_io_read"] = None
    metrics["disk_io_write"] = None

if net_before and net_after:
    metrics["net_io_sent"] = (net_after.bytes_sent - net_before.bytes_sent) / elapsed
    metrics["net_io_recv"] = (net_after.bytes_recv - net_before.bytes_recv) / elapsed
else:
    metrics["net_io_sent"] = None
    metrics["net_io_recv"] = None

try:
    load_avg = psutil.getloadavg()
    metrics["load_avg_1m"] = load_avg[0]
    metrics["load_avg_5m"] = load_avg[1]
    metrics["load_avg_15m"] = load_avg[2]
except (AttributeError, OSError):
    metrics["load_avg_1m"] = None
    metrics["load_avg_5m"] = None
    metrics["load_avg_15m"] = None

mem = psutil.virtual_memory()
metrics["memory_percent"] = mem.percent

swap = psutil.swap_memory()
metrics["swap_percent"] = swap.percent if swap.total > 0 else None

def detect_disk_types():
    types = {}
    try:
        result = subprocess.run(
            ["lsblk", "-d", "-o", "NAME,TYPE"],
            capture_output=True, text=True, timeout=5,
        )
        for line in result.stdout.splitlines()[1:]:
            parts = line.split()
            if len(parts) >= 2 and parts[1] == "disk":
                name = parts[0]
                rotational_path = "/sys/block/%s/queue/rotational" % name
                disk_type = "Unknown"
                if os.path.exists(rotational_path):
                    with open(rotational_path) as f:
                        if f.read().strip() == "0":
                            disk_type = "NVMe" if "nvme" in name.lower() else "SSD"
                        else:
                            disk_type = "HDD"
                types[name] = disk_type
    except Exception:
        pass
    return types

def detect_raid():
    if os.path.exists("/proc/mdstat"):
        try:
            with open("/proc/mdstat") as f:
                if "md" in f.read():
                    return "configured"
        except Exception:
            pass
    return "none"

disk_types = detect_disk_types()
raid_status = detect_raid()

disk_usage = {}
for partition in psutil.disk_partitions():
    if partition.fstype.lower() in IGNORED_FSTYPES:
        continue
    try:
        usage = psutil.disk_usage(partition.mountpoint)
    except (PermissionError, OSError):
        continue

    device_name = os.path.basename(partition.device)
    physical = "unknown"
    disk_type = "Unknown"
    for name, dtype in disk_types.items():
        if device_name.startswith(name):
            physical = name
            disk_type = dtype
            break

    disk_usage[partition.mountpoint] = {
        "total": usage.total,
        "used": usage.used,
        "free": usage.free,
        "percent": usage.percent,
        "device": partition.device,
        "fstype": partition.fstype,
        "disk_type": disk_type,
        "raid": raid_status,
        "physical_disk": physical,
    }

metrics["disk_usage"] = disk_usage

network_io = {}
try:
    for interface, counters in psutil.net_io_counters(pernic=True).items():
        network_io[interface] = {
            "bytes_sent": counters.bytes_sent,
            "bytes_recv": counters.bytes_recv,
            "packets_sent": counters.packets_sent,
            "packets_recv": counters.packets_recv,
        }
except Exception:
    pass
metrics["network_io"] = network_io

try:
    metrics["network_connections"] = len(psutil.net_connections())
except (psutil.AccessDenied, AttributeError):
    metrics["network_connections"] = None

try:
    metrics["system_uptime_seconds"] = time.time() - psutil.boot_time()
except Exception:
    metrics["system_uptime_seconds"] = None

def top_processes(sort_key, count=5):
    procs = []
    for proc in psutil.process_iter(["pid", "name", "cpu_percent", "memory_percent"]):
        try:
            procs.append(proc.info)
        except (psutil.NoSuchProcess, psutil.AccessDenied):
            continue
    procs.sort(key=lambda p: p.get(sort_key) or 0.0, reverse=True)
    return [
        {
            "pid": p.get("pid"),
            "name": p.get("name"),
            "cpu_percent": p.get("cpu_percent") or 0.0,
            "memory_percent": p.get("memory_percent") or 0.0,
        }
        for p in procs[:count]
    ]

try:
    metrics["top_processes"] = {
        "cpu": top_processes("cpu_percent"),
        "memory": top_processes("memory_percent"),
    }
except Exception:
    metrics["top_processes"] = None

print(json.dumps(metrics))
"##;

/// Raw probe output before validation. Counters are signed so corrupted
/// negative values can be rejected rather than wrapping.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeReport {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(default)]
    pub swap_percent: Option<f64>,
    #[serde(default)]
    pub disk_usage: HashMap<String, RawDiskUsage>,
    #[serde(default)]
    pub network_io: HashMap<String, RawInterfaceIo>,
    #[serde(default)]
    pub disk_io_read: Option<f64>,
    #[serde(default)]
    pub disk_io_write: Option<f64>,
    #[serde(default)]
    pub net_io_sent: Option<f64>,
    #[serde(default)]
    pub net_io_recv: Option<f64>,
    #[serde(default)]
    pub load_avg_1m: Option<f64>,
    #[serde(default)]
    pub load_avg_5m: Option<f64>,
    #[serde(default)]
    pub load_avg_15m: Option<f64>,
    #[serde(default)]
    pub network_connections: Option<i64>,
    #[serde(default)]
    pub system_uptime_seconds: Option<f64>,
    #[serde(default)]
    pub top_processes: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDiskUsage {
    pub total: i64,
    pub used: i64,
    pub free: i64,
    pub percent: f64,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub fstype: String,
    #[serde(default)]
    pub disk_type: String,
    #[serde(default)]
    pub raid: String,
    #[serde(default)]
    pub physical_disk: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInterfaceIo {
    pub bytes_sent: i64,
    pub bytes_recv: i64,
    #[serde(default)]
    pub packets_sent: i64,
    #[serde(default)]
    pub packets_recv: i64,
}

/// Validate a parsed report: percent bounds, the virtual-filesystem
/// denylist, and counter sanity. Invalid partitions and interfaces are
/// dropped; an out-of-range core percent rejects the whole report.
pub fn validate(report: ProbeReport) -> Result<ValidatedReport, String> {
    if !(0.0..=100.0).contains(&report.cpu_percent) || report.cpu_percent.is_nan() {
        return Err(format!("cpu_percent out of range: {}", report.cpu_percent));
    }
    if !(0.0..=100.0).contains(&report.memory_percent) || report.memory_percent.is_nan() {
        return Err(format!(
            "memory_percent out of range: {}",
            report.memory_percent
        ));
    }

    let swap_percent = report
        .swap_percent
        .filter(|p| (0.0..=100.0).contains(p) && !p.is_nan());

    let mut disk_usage = HashMap::new();
    for (mount, raw) in report.disk_usage {
        if IGNORED_FSTYPES.contains(&raw.fstype.to_lowercase().as_str()) {
            continue;
        }
        if raw.total < 0 || raw.used < 0 || raw.free < 0 {
            continue;
        }
        if !(0.0..=100.0).contains(&raw.percent) || raw.percent.is_nan() {
            continue;
        }
        disk_usage.insert(
            mount,
            DiskUsage {
                total: raw.total as u64,
                used: raw.used as u64,
                free: raw.free as u64,
                percent: raw.percent,
                device: raw.device,
                fstype: raw.fstype,
                disk_type: raw.disk_type,
                raid: raw.raid,
                physical_disk: raw.physical_disk,
            },
        );
    }

    let mut network_io = HashMap::new();
    for (interface, raw) in report.network_io {
        if raw.bytes_sent < 0 || raw.bytes_recv < 0 || raw.packets_sent < 0 || raw.packets_recv < 0
        {
            continue;
        }
        network_io.insert(
            interface,
            InterfaceIo {
                bytes_sent: raw.bytes_sent as u64,
                bytes_recv: raw.bytes_recv as u64,
                packets_sent: raw.packets_sent as u64,
                packets_recv: raw.packets_recv as u64,
            },
        );
    }

    let nonneg = |v: Option<f64>| v.filter(|x| x.is_finite() && *x >= 0.0);

    Ok(ValidatedReport {
        cpu_percent: report.cpu_percent,
        memory_percent: report.memory_percent,
        swap_percent,
        disk_usage,
        network_io,
        disk_io_read: nonneg(report.disk_io_read),
        disk_io_write: nonneg(report.disk_io_write),
        net_io_sent: nonneg(report.net_io_sent),
        net_io_recv: nonneg(report.net_io_recv),
        load_avg_1m: nonneg(report.load_avg_1m),
        load_avg_5m: nonneg(report.load_avg_5m),
        load_avg_15m: nonneg(report.load_avg_15m),
        network_connections: report.network_connections.filter(|c| *c >= 0),
        system_uptime_seconds: nonneg(report.system_uptime_seconds),
        top_processes: report.top_processes,
    })
}

#[derive(Debug, Clone)]
pub struct ValidatedReport {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub swap_percent: Option<f64>,
    pub disk_usage: HashMap<String, DiskUsage>,
    pub network_io: HashMap<String, InterfaceIo>,
    pub disk_io_read: Option<f64>,
    pub disk_io_write: Option<f64>,
    pub net_io_sent: Option<f64>,
    pub net_io_recv: Option<f64>,
    pub load_avg_1m: Option<f64>,
    pub load_avg_5m: Option<f64>,
    pub load_avg_15m: Option<f64>,
    pub network_connections: Option<i64>,
    pub system_uptime_seconds: Option<f64>,
    pub top_processes: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_report(cpu: f64, mem: f64) -> ProbeReport {
        serde_json::from_value(serde_json::json!({
            "cpu_percent": cpu,
            "memory_percent": mem,
        }))
        .unwrap()
    }

    #[test]
    fn test_rejects_out_of_range_cpu() {
        assert!(validate(minimal_report(120.0, 50.0)).is_err());
        assert!(validate(minimal_report(-1.0, 50.0)).is_err());
    }

    #[test]
    fn test_drops_virtual_filesystems() {
        let report: ProbeReport = serde_json::from_value(serde_json::json!({
            "cpu_percent": 10.0,
            "memory_percent": 40.0,
            "disk_usage": {
                "/": {"total": 100, "used": 50, "free": 50, "percent": 50.0, "fstype": "ext4"},
                "/run": {"total": 10, "used": 1, "free": 9, "percent": 10.0, "fstype": "tmpfs"}
            }
        }))
        .unwrap();

        let validated = validate(report).unwrap();
        assert!(validated.disk_usage.contains_key("/"));
        assert!(!validated.disk_usage.contains_key("/run"));
    }

    #[test]
    fn test_drops_negative_interface_counters() {
        let report: ProbeReport = serde_json::from_value(serde_json::json!({
            "cpu_percent": 10.0,
            "memory_percent": 40.0,
            "network_io": {
                "eth0": {"bytes_sent": 100, "bytes_recv": 200, "packets_sent": 1, "packets_recv": 2},
                "bad0": {"bytes_sent": -5, "bytes_recv": 0}
            }
        }))
        .unwrap();

        let validated = validate(report).unwrap();
        assert!(validated.network_io.contains_key("eth0"));
        assert!(!validated.network_io.contains_key("bad0"));
    }

    #[test]
    fn test_probe_script_emits_single_json_object() {
        // The script must end by printing the metrics dict as JSON.
        assert!(PROBE_SCRIPT.contains("print(json.dumps(metrics))"));
        assert!(PROBE_SCRIPT.contains("IGNORED_FSTYPES"));
    }
}
