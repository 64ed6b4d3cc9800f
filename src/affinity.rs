//! Pinning a manager's OS thread, with an optional NUMA memory policy.
//!
//! Linux:
//!   - CPU pin: pthread_setaffinity_np on the current thread.
//!   - NUMA mem policy: set_mempolicy(MPOL_BIND, nodemask) best-effort.
//! macOS:
//!   - Affinity tag: thread_policy_set(THREAD_AFFINITY_POLICY).

use std::io;

/// Where a manager thread should run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PinConfig {
    /// Optional logical core to pin the manager thread to.
    pub core_id: Option<usize>,
    /// Optional NUMA node for memory binding (Linux only).
    pub numa_node: Option<u16>,
    /// Whether to apply MPOL_BIND when numa_node is set (Linux only).
    pub mem_bind: bool,
    /// Optional Mach thread affinity tag (macOS only).
    pub mac_affinity_tag: Option<i32>,
}

impl PinConfig {
    /// Pin to one logical core.
    pub fn core(core_id: usize) -> Self {
        Self {
            core_id: Some(core_id),
            ..Self::default()
        }
    }
}

/// Apply `cfg` to the calling thread.
///
/// Settings the platform does not support are ignored. The first OS call that
/// fails is reported; settings applied before it stay applied.
pub fn pin_current_thread(cfg: &PinConfig) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        linux::pin(cfg)
    }
    #[cfg(target_os = "macos")]
    {
        macos::pin(cfg)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = cfg;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::PinConfig;
    use core::mem::{size_of, zeroed};
    use std::io;

    const MPOL_BIND: libc::c_long = 2;

    pub(super) fn pin(cfg: &PinConfig) -> io::Result<()> {
        if let Some(core) = cfg.core_id {
            if core >= libc::CPU_SETSIZE as usize {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("core {core} exceeds CPU_SETSIZE"),
                ));
            }
            // Safety: cpu_set_t is plain data; CPU_SET stays within CPU_SETSIZE.
            let rc = unsafe {
                let mut set: libc::cpu_set_t = zeroed();
                libc::CPU_SET(core, &mut set);
                libc::pthread_setaffinity_np(
                    libc::pthread_self(),
                    size_of::<libc::cpu_set_t>(),
                    &set as *const libc::cpu_set_t,
                )
            };
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
        }
        if let (Some(node), true) = (cfg.numa_node, cfg.mem_bind) {
            if node >= 64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("numa node {node} exceeds the 64-bit node mask"),
                ));
            }
            let mask: u64 = 1u64 << node;
            // Safety: the mask outlives the call and maxnode matches its width.
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_set_mempolicy,
                    MPOL_BIND,
                    &mask as *const u64,
                    64 as libc::c_long,
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use super::PinConfig;
    use std::io;

    #[allow(non_camel_case_types)]
    type thread_t = libc::mach_port_t;

    #[repr(C)]
    #[allow(non_camel_case_types)]
    struct thread_affinity_policy_data_t {
        affinity_tag: libc::integer_t,
    }

    unsafe extern "C" {
        fn mach_thread_self() -> thread_t;
        fn thread_policy_set(
            thread: thread_t,
            flavor: libc::c_int,
            policy_info: *const libc::integer_t,
            count: libc::mach_msg_type_number_t,
        ) -> libc::kern_return_t;
    }

    const THREAD_AFFINITY_POLICY: libc::c_int = 4;

    pub(super) fn pin(cfg: &PinConfig) -> io::Result<()> {
        // Core pinning is not available on macOS; only affinity tags are.
        let Some(tag) = cfg.mac_affinity_tag else {
            return Ok(());
        };
        let pol = thread_affinity_policy_data_t {
            affinity_tag: tag as libc::integer_t,
        };
        let cnt = (core::mem::size_of::<thread_affinity_policy_data_t>()
            / core::mem::size_of::<libc::integer_t>())
            as libc::mach_msg_type_number_t;
        // Safety: pol is a valid policy struct of `cnt` integers.
        let kr = unsafe {
            thread_policy_set(
                mach_thread_self(),
                THREAD_AFFINITY_POLICY,
                (&pol as *const thread_affinity_policy_data_t) as *const libc::integer_t,
                cnt,
            )
        };
        if kr != 0 {
            return Err(io::Error::other(format!("thread_policy_set failed: {kr}")));
        }
        Ok(())
    }
}
