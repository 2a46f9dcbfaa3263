//! System telemetry collection for Monica nodes.
//!
//! Static descriptors are captured once at startup; dynamic metrics are
//! sampled fresh on every call. Network counters are cumulative since boot:
//! delta computation belongs to the controller, which keeps the agent
//! stateless and restart-safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{Disks, Networks, System};
use tracing::debug;

/// CPU usage needs two refreshes spaced apart; the wait is async so the rest
/// of the agent keeps running while the window elapses.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Static system descriptors. Captured once, immutable for the process
/// lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemProfile {
    pub os: String,
    pub os_version: String,
    pub architecture: String,
    pub cpu_count: usize,
}

impl SystemProfile {
    pub fn capture() -> Self {
        let sys = System::new_all();
        Self {
            os: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_count: sys.cpus().len(),
        }
    }
}

/// One dynamic resource snapshot. Never cached, never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory: MemoryMetrics,
    pub disk: DiskMetrics,
    pub network: NetworkMetrics,
}

/// Memory usage in bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub percent: f32,
}

/// Root filesystem usage in bytes. Ratios are computed from raw totals at
/// sample time, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f32,
}

/// Cumulative network counters since boot, summed over interfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

impl MetricsSample {
    /// Collect a fresh snapshot. An unavailable metric source degrades that
    /// one field to zero rather than aborting the sample.
    pub async fn collect() -> Self {
        debug!("Collecting metrics sample...");

        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
        sys.refresh_cpu_usage();

        Self {
            timestamp: Utc::now(),
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            memory: MemoryMetrics::read(&sys),
            disk: DiskMetrics::read(),
            network: NetworkMetrics::read(),
        }
    }
}

impl MemoryMetrics {
    fn read(sys: &System) -> Self {
        let total = sys.total_memory();
        let available = sys.available_memory();
        let used = total.saturating_sub(available);
        let percent = if total > 0 {
            (used as f32 / total as f32) * 100.0
        } else {
            0.0
        };
        Self { total, available, used, percent }
    }
}

impl DiskMetrics {
    fn read() -> Self {
        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == std::path::Path::new("/"))
            .or_else(|| disks.list().first());

        match root {
            Some(disk) => {
                let total = disk.total_space();
                let free = disk.available_space();
                let used = total.saturating_sub(free);
                let percent = if total > 0 {
                    (used as f32 / total as f32) * 100.0
                } else {
                    0.0
                };
                Self { total, used, free, percent }
            }
            None => Self { total: 0, used: 0, free: 0, percent: 0.0 },
        }
    }
}

impl NetworkMetrics {
    fn read() -> Self {
        let networks = Networks::new_with_refreshed_list();
        let mut totals = Self { bytes_sent: 0, bytes_recv: 0, packets_sent: 0, packets_recv: 0 };
        for (_name, data) in &networks {
            totals.bytes_sent += data.total_transmitted();
            totals.bytes_recv += data.total_received();
            totals.packets_sent += data.total_packets_transmitted();
            totals.packets_recv += data.total_packets_received();
        }
        totals
    }
}

/// Service probe state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Stopped,
    Error,
}

/// Result of scanning the process table for a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: ServiceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceStatus {
    /// Scan running processes for the first case-insensitive substring match.
    ///
    /// A scan failure is its own state: an enumeration error must never read
    /// as "stopped". The scan runs on a blocking thread.
    pub async fn probe(name: &str) -> Self {
        let name = name.to_string();
        let needle = name.to_lowercase();

        let scan = tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_processes();
            sys.processes()
                .values()
                .find(|process| process.name().to_lowercase().contains(&needle))
                .map(|process| process.pid().as_u32())
        })
        .await;

        match scan {
            Ok(Some(pid)) => Self {
                name,
                status: ServiceState::Running,
                pid: Some(pid),
                error: None,
            },
            Ok(None) => Self {
                name,
                status: ServiceState::Stopped,
                pid: None,
                error: None,
            },
            Err(e) => Self {
                name,
                status: ServiceState::Error,
                pid: None,
                error: Some(e.to_string()),
            },
        }
    }
}
