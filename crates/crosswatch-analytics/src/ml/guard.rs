//! 학습 전 프로세스 메모리 점검.

use crate::ml::error::{MlError, MlResult};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, System};
use tracing::warn;

/// 현재 프로세스의 상주 메모리(바이트)를 알려주는 출처.
pub trait MemoryProbe: Send + Sync {
    /// 측정할 수 없으면 `None`.
    fn resident_bytes(&self) -> Option<u64>;
}

/// sysinfo 기반 프로세스 메모리 측정.
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = %e, "Cannot resolve current pid; memory guard disabled");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_process(pid);
        system.process(pid).map(|process| process.memory())
    }
}

/// 고정 값을 반환하는 측정기.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub u64);

impl MemoryProbe for FixedMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.0)
    }
}

/// 메모리 상한 가드.
#[derive(Clone)]
pub struct MemoryGuard {
    probe: Arc<dyn MemoryProbe>,
    high_water_bytes: u64,
}

impl MemoryGuard {
    pub fn new(probe: Arc<dyn MemoryProbe>, high_water_bytes: u64) -> Self {
        Self {
            probe,
            high_water_bytes,
        }
    }

    /// 현재 프로세스 기준 가드.
    pub fn for_process(high_water_bytes: u64) -> Self {
        Self::new(Arc::new(ProcessMemoryProbe::new()), high_water_bytes)
    }

    /// 제한 없는 가드.
    pub fn unlimited() -> Self {
        Self::new(Arc::new(FixedMemoryProbe(0)), u64::MAX)
    }

    pub fn high_water_bytes(&self) -> u64 {
        self.high_water_bytes
    }

    /// 상한을 넘었으면 `ResourceExhausted`를 반환합니다.
    ///
    /// 측정에 실패하면 통과시킵니다.
    pub fn check(&self) -> MlResult<()> {
        match self.probe.resident_bytes() {
            Some(used) if used > self.high_water_bytes => Err(MlError::ResourceExhausted {
                used_bytes: used,
                limit_bytes: self.high_water_bytes,
            }),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("high_water_bytes", &self.high_water_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_trips_above_high_water() {
        let guard = MemoryGuard::new(Arc::new(FixedMemoryProbe(2048)), 1024);
        assert!(matches!(
            guard.check(),
            Err(MlError::ResourceExhausted { used_bytes: 2048, limit_bytes: 1024 })
        ));
    }

    #[test]
    fn test_guard_passes_below_high_water() {
        let guard = MemoryGuard::new(Arc::new(FixedMemoryProbe(512)), 1024);
        assert!(guard.check().is_ok());
        assert!(MemoryGuard::unlimited().check().is_ok());
    }

    #[test]
    fn test_process_probe_reports_memory() {
        let probe = ProcessMemoryProbe::new();
        if let Some(bytes) = probe.resident_bytes() {
            assert!(bytes > 0);
        }
    }
}
