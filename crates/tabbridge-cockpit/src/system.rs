//! Host metrics for `/api/system`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;
use tabbridge_types::BridgeError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    /// Host uptime in seconds.
    pub uptime: u64,
    /// Global CPU usage, percent.
    pub cpu: f32,
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

impl MemoryStats {
    pub fn new(total: u64, used: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            total,
            used,
            percent,
        }
    }
}

/// Source of host metrics. Collection may block, so it is awaited.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn snapshot(&self) -> Result<SystemStats, BridgeError>;
}

/// [`SystemProbe`] backed by `sysinfo`.
///
/// CPU usage is a delta between refreshes, so the first snapshot after
/// startup may report `0.0`.
pub struct SysinfoProbe {
    system: Arc<Mutex<System>>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn snapshot(&self) -> Result<SystemStats, BridgeError> {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut sys = system.lock();
            sys.refresh_cpu_usage();
            sys.refresh_memory();
            SystemStats {
                uptime: System::uptime(),
                cpu: sys.global_cpu_usage(),
                memory: MemoryStats::new(sys.total_memory(), sys.used_memory()),
            }
        })
        .await
        .map_err(|e| BridgeError::Io(std::io::Error::other(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_percent_handles_zero_total() {
        assert_eq!(MemoryStats::new(0, 0).percent, 0.0);
        assert_eq!(MemoryStats::new(200, 50).percent, 25.0);
    }

    #[tokio::test]
    async fn sysinfo_probe_reports_memory() {
        let stats = SysinfoProbe::new().snapshot().await.unwrap();
        assert!(stats.memory.total > 0);
        assert!(stats.memory.used <= stats.memory.total);
    }

    #[test]
    fn stats_serialize_flat_keys() {
        let stats = SystemStats {
            uptime: 10,
            cpu: 1.5,
            memory: MemoryStats::new(100, 10),
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["uptime"], 10);
        assert_eq!(json["memory"]["used"], 10);
    }
}
