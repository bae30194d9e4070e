//! CPU Affinity and Resource Caps
//!
//! Per-worker CPU pinning keeps a symbol's replay loop on one core and its
//! caches warm. The memory cap is an address-space rlimit; note it applies
//! to the whole process, so configure it once per deployment rather than
//! per symbol with differing values.

use anyhow::Result;
use core_affinity::CoreId;

/// Pin the current thread to a specific CPU core.
pub fn pin_to_core(core: usize) -> Result<()> {
    let core_id = CoreId { id: core };

    if core_affinity::set_for_current(core_id) {
        tracing::info!("pinned thread to CPU core {}", core);
        Ok(())
    } else {
        anyhow::bail!("failed to pin thread to core {}", core)
    }
}

/// Number of available CPU cores.
pub fn num_cores() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .unwrap_or(1)
}

/// Cap the process address space (Linux/unix only).
#[cfg(unix)]
pub fn set_memory_limit_mb(limit_mb: u64) -> Result<()> {
    let limit_bytes = limit_mb * 1024 * 1024;
    let limit = libc::rlimit {
        rlim_cur: limit_bytes as libc::rlim_t,
        rlim_max: limit_bytes as libc::rlim_t,
    };

    // SAFETY: setrlimit with a stack-local rlimit struct.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) };
    if rc == 0 {
        tracing::info!("set address-space limit to {} MiB", limit_mb);
        Ok(())
    } else {
        anyhow::bail!(
            "setrlimit(RLIMIT_AS) failed: {}",
            std::io::Error::last_os_error()
        )
    }
}

/// Memory caps are unsupported on this platform; log and continue.
#[cfg(not(unix))]
pub fn set_memory_limit_mb(_limit_mb: u64) -> Result<()> {
    tracing::warn!("memory caps not supported on this platform");
    Ok(())
}
