//! Kernel resource limits for sandbox workers
//!
//! Applied with `setrlimit` in the forked child before `exec`, so they bind
//! the worker and everything it spawns but never the host process.

use nix::sys::resource::{setrlimit, Resource};

/// Resource limits for one sandbox worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU time in seconds (RLIMIT_CPU); the kernel sends SIGXCPU/SIGKILL past it
    pub cpu_seconds: Option<u64>,

    /// Virtual address space in bytes (RLIMIT_AS)
    pub memory_bytes: Option<u64>,
}

impl ResourceLimits {
    /// 10 CPU seconds, 2GB address space
    pub fn small() -> Self {
        Self {
            cpu_seconds: Some(10),
            memory_bytes: Some(2 * 1024 * 1024 * 1024),
        }
    }

    /// 60 CPU seconds, 4GB address space
    pub fn medium() -> Self {
        Self {
            cpu_seconds: Some(60),
            memory_bytes: Some(4 * 1024 * 1024 * 1024),
        }
    }

    /// 300 CPU seconds, 8GB address space
    pub fn large() -> Self {
        Self {
            cpu_seconds: Some(300),
            memory_bytes: Some(8 * 1024 * 1024 * 1024),
        }
    }

    /// No limits beyond what the host already imposes
    pub fn unlimited() -> Self {
        Self {
            cpu_seconds: None,
            memory_bytes: None,
        }
    }

    pub fn custom(cpu_seconds: u64, memory_gb: f64) -> Self {
        Self {
            cpu_seconds: Some(cpu_seconds),
            memory_bytes: Some((memory_gb * 1024.0 * 1024.0 * 1024.0) as u64),
        }
    }

    /// Apply to the calling process.
    ///
    /// Only async-signal-safe work happens here, so it may run in `pre_exec`.
    pub fn apply(&self) -> std::io::Result<()> {
        if let Some(secs) = self.cpu_seconds {
            setrlimit(Resource::RLIMIT_CPU, secs, secs)?;
        }
        if let Some(bytes) = self.memory_bytes {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        Ok(())
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::medium()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(ResourceLimits::default(), ResourceLimits::medium());
        assert_eq!(ResourceLimits::small().memory_bytes, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(ResourceLimits::unlimited().cpu_seconds, None);
    }

    #[test]
    fn test_custom_limits() {
        let limits = ResourceLimits::custom(5, 0.5);
        assert_eq!(limits.cpu_seconds, Some(5));
        assert_eq!(limits.memory_bytes, Some(512 * 1024 * 1024));
    }

    #[test]
    fn test_unlimited_apply_is_noop() {
        assert!(ResourceLimits::unlimited().apply().is_ok());
    }
}
