// System Metrics Collector
// CPU load, memory, disks, inodes, network interfaces and uptime from the host OS

use super::section;
use crate::database::round2;
use crate::monitoring::{MetricBundle, MetricsCollector};
use crate::utils::error::{MonitorError, Result};
use serde_json::{json, Map, Value};
use std::process::Command;
use sysinfo::{CpuExt, DiskExt, NetworkExt, PidExt, ProcessExt, System, SystemExt};
use tracing::debug;

/// Host-level collector backed by sysinfo
#[derive(Debug, Default)]
pub struct SystemCollector {
    /// Skip the `df -i` probe on hosts without it
    skip_inodes: bool,
}

impl SystemCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_inodes(mut self) -> Self {
        self.skip_inodes = true;
        self
    }
}

#[async_trait::async_trait]
impl MetricsCollector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        let skip_inodes = self.skip_inodes;
        let bundle = tokio::task::spawn_blocking(move || sample(skip_inodes))
            .await
            .map_err(|e| MonitorError::collector("system", e.to_string()))?;
        Ok(bundle)
    }
}

fn sample(skip_inodes: bool) -> MetricBundle {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();
    system.refresh_disks_list();
    system.refresh_disks();
    system.refresh_networks_list();
    system.refresh_networks();

    let mut bundle = Map::new();
    bundle.insert("cpu".to_string(), cpu(&system));
    bundle.insert("memory".to_string(), memory(&system));
    bundle.insert("disks".to_string(), disks(&system));
    if !skip_inodes {
        bundle.insert(
            "inodes".to_string(),
            section("system", "inodes", inodes(), json!({"filesystems": []})),
        );
    }
    bundle.insert("network".to_string(), network(&system));
    bundle.insert("uptime".to_string(), uptime(&mut system));

    debug!("Sampled system metrics");
    bundle
}

fn cpu(system: &System) -> Value {
    let load = system.load_average();
    let cores = match system.cpus().len() {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    };

    json!({
        "cores": cores,
        "brand": system.cpus().first().map(|c| c.brand().to_string()),
        "load_average": {
            "1m": load.one,
            "5m": load.five,
            "15m": load.fifteen,
        },
        "usage_percent": cpu_usage_percent(load.one, cores),
    })
}

/// One-minute load over core count as a percentage, capped at 100
pub fn cpu_usage_percent(load_one: f64, cores: usize) -> f64 {
    if cores == 0 || !load_one.is_finite() || load_one <= 0.0 {
        return 0.0;
    }
    round2((load_one / cores as f64 * 100.0).min(100.0))
}

fn memory(system: &System) -> Value {
    let total = system.total_memory();
    let used = system.used_memory();
    let usage_percent = percent(used, total);

    json!({
        "total_bytes": total,
        "used_bytes": used,
        "free_bytes": system.free_memory(),
        "available_bytes": system.available_memory(),
        "usage_percent": usage_percent,
        "swap": {
            "total_bytes": system.total_swap(),
            "used_bytes": system.used_swap(),
        },
    })
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(used as f64 / total as f64 * 100.0)
    }
}

fn disks(system: &System) -> Value {
    let mut total_space = 0u64;
    let mut available_space = 0u64;

    let filesystems: Vec<Value> = system
        .disks()
        .iter()
        .map(|disk| {
            let total = disk.total_space();
            let available = disk.available_space();
            total_space += total;
            available_space += available;
            let used = total.saturating_sub(available);
            let usage_percent = percent(used, total);

            json!({
                "mount_point": disk.mount_point().display().to_string(),
                "file_system": String::from_utf8_lossy(disk.file_system()),
                "total_bytes": total,
                "available_bytes": available,
                "used_bytes": used,
                "usage_percent": usage_percent,
                "removable": disk.is_removable(),
            })
        })
        .collect();

    let used_space = total_space.saturating_sub(available_space);
    let usage_percent = percent(used_space, total_space);
    json!({
        "count": filesystems.len(),
        "total_bytes": total_space,
        "used_bytes": used_space,
        "usage_percent": usage_percent,
        "filesystems": filesystems,
    })
}

fn inodes() -> Result<Value> {
    let output = Command::new("df").args(["-iP"]).output()?;
    if !output.status.success() {
        return Err(MonitorError::collector(
            "system",
            format!("df -iP exited with {}", output.status),
        ));
    }

    let filesystems = parse_df_inodes(&String::from_utf8_lossy(&output.stdout));
    Ok(json!({ "filesystems": filesystems }))
}

/// Parse POSIX `df -iP` output; pseudo filesystems without inode counts are skipped
pub fn parse_df_inodes(output: &str) -> Vec<Value> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }
            let total: u64 = fields[1].parse().ok()?;
            let used: u64 = fields[2].parse().ok()?;
            let free: u64 = fields[3].parse().ok()?;
            if total == 0 {
                return None;
            }

            Some(json!({
                "filesystem": fields[0],
                "mount_point": fields[5..].join(" "),
                "total": total,
                "used": used,
                "free": free,
                "usage_percent": percent(used, total),
            }))
        })
        .collect()
}

fn network(system: &System) -> Value {
    let mut interfaces = Map::new();
    let mut received = 0u64;
    let mut transmitted = 0u64;

    for (name, data) in system.networks() {
        received += data.total_received();
        transmitted += data.total_transmitted();
        interfaces.insert(
            name.clone(),
            json!({
                "received_bytes": data.total_received(),
                "transmitted_bytes": data.total_transmitted(),
                "packets_received": data.total_packets_received(),
                "packets_transmitted": data.total_packets_transmitted(),
                "errors_received": data.total_errors_on_received(),
                "errors_transmitted": data.total_errors_on_transmitted(),
            }),
        );
    }

    json!({
        "received_bytes": received,
        "transmitted_bytes": transmitted,
        "interfaces": interfaces,
    })
}

fn uptime(system: &mut System) -> Value {
    let mut value = json!({
        "system_seconds": system.uptime(),
        "boot_time": system.boot_time(),
        "host_name": system.host_name(),
        "os_version": system.long_os_version(),
        "kernel_version": system.kernel_version(),
    });

    if let Ok(pid) = sysinfo::get_current_pid() {
        if system.refresh_process(pid) {
            if let Some(process) = system.process(pid) {
                value["process"] = json!({
                    "pid": pid.as_u32(),
                    "seconds": process.run_time(),
                    "memory_bytes": process.memory(),
                    "virtual_memory_bytes": process.virtual_memory(),
                });
            }
        }
    }
    value
}
