//! Real-time setup for the control loop thread.
//!
//! Linux: SCHED_FIFO priority, single-CPU affinity and mlockall.
//! macOS: mlockall only. Every step is best effort; failures are logged
//! and the loop keeps running on normal scheduling.

use crate::cli::{RtArgs, RtLock};

/// Apply `args` once per process. Later calls are no-ops.
pub fn apply(args: RtArgs) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !args.rt {
        return;
    }
    let lock = args.rt_lock.unwrap_or(RtLock::os_default());
    RT_ONCE.get_or_init(|| {
        match lock_memory(lock) {
            Ok(()) => tracing::info!(mode = ?lock, "rt: memory lock applied"),
            Err(err) => tracing::warn!(error = %err, "rt: mlockall failed"),
        }
        platform::apply_scheduling(args.rt_prio, args.rt_cpu);
    });
}

#[cfg(unix)]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE};

    fn mlockall(flags: libc::c_int) -> std::io::Result<()> {
        // SAFETY: mlockall takes no pointers; it only changes paging of this process.
        if unsafe { libc::mlockall(flags) } == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    let flags = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => MCL_CURRENT,
        RtLock::All => MCL_CURRENT | MCL_FUTURE,
    };
    let Err(err) = mlockall(flags) else {
        return Ok(());
    };
    let retryable = matches!(err.raw_os_error(), Some(libc::EPERM | libc::ENOMEM));
    if !retryable {
        return Err(eyre::eyre!("mlockall: {err}"));
    }
    // Locking future pages can exceed the limit where current pages fit.
    if lock == RtLock::All && mlockall(MCL_CURRENT).is_ok() {
        tracing::warn!(error = %err, "rt: fell back to locking current pages only");
        return Ok(());
    }
    let mut msg = format!("mlockall: {err}");
    if let Some(limit) = memlock_limit() {
        msg.push_str(&format!("; {limit}"));
    }
    msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'");
    Err(eyre::eyre!(msg))
}

#[cfg(not(unix))]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    if lock == RtLock::None {
        return Ok(());
    }
    Err(eyre::eyre!("memory locking is not supported on this OS"))
}

#[cfg(unix)]
fn memlock_limit() -> Option<String> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit writes a full rlimit into the pointer on success.
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    // SAFETY: rc == 0 above.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    Some(if cur == libc::RLIM_INFINITY {
        "memlock limit: unlimited".to_string()
    } else {
        format!("memlock limit: {} KiB", cur / 1024)
    })
}

#[cfg(target_os = "linux")]
mod platform {
    /// CAP_SYS_NICE bit in the /proc capability masks.
    const CAP_SYS_NICE: u64 = 1 << 23;
    const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

    pub fn apply_scheduling(prio: Option<i32>, cpu: Option<usize>) {
        match fifo_priority(prio) {
            Ok(p) => tracing::info!(priority = p, "rt: SCHED_FIFO applied"),
            Err(err) => tracing::warn!(error = %err, "rt: SCHED_FIFO not applied"),
        }
        let cpu = cpu.unwrap_or(0);
        match pin_to_cpu(cpu) {
            Ok(()) => tracing::info!(cpu, "rt: pinned control loop"),
            Err(err) => tracing::warn!(error = %err, "rt: affinity not applied"),
        }
    }

    fn has_sys_nice() -> bool {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return false;
        };
        status
            .lines()
            .filter(|l| l.starts_with("CapEff:"))
            .filter_map(|l| l.split_whitespace().nth(1))
            .filter_map(|hex| u64::from_str_radix(hex, 16).ok())
            .any(|caps| caps & CAP_SYS_NICE != 0)
    }

    fn fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        // SAFETY: plain getter.
        let euid = unsafe { libc::geteuid() };
        if euid != 0 && !has_sys_nice() {
            eyre::bail!(
                "needs CAP_SYS_NICE or root (euid {euid}); hint: 'sudo setcap cap_sys_nice=ep /path/to/press'"
            );
        }
        // SAFETY: plain getters.
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(libc::SCHED_FIFO),
                libc::sched_get_priority_max(libc::SCHED_FIFO),
            )
        };
        let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
        let priority = prio.unwrap_or(max).clamp(min, max);
        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY: param outlives the call.
        if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(priority)
    }

    fn pin_to_cpu(cpu: usize) -> eyre::Result<()> {
        // SAFETY: plain getter.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online < 1 {
            eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
        }
        if cpu >= MAX_CPUSET_BITS || i64::try_from(cpu).map_or(true, |c| c >= i64::from(online)) {
            eyre::bail!("requested CPU {cpu} but {online} are online");
        }
        let size = std::mem::size_of::<libc::cpu_set_t>();
        // SAFETY: cpu_set_t is plain bits; zeroed is a valid empty set, and
        // the kernel writes at most `size` bytes.
        unsafe {
            let mut allowed: libc::cpu_set_t = std::mem::zeroed();
            if libc::sched_getaffinity(0, size, &mut allowed) == 0
                && !libc::CPU_ISSET(cpu, &allowed)
            {
                eyre::bail!("CPU {cpu} not permitted by the current affinity mask");
            }
            let mut wanted: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(cpu, &mut wanted);
            if libc::sched_setaffinity(0, size, &wanted) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    pub fn apply_scheduling(prio: Option<i32>, cpu: Option<usize>) {
        if prio.is_some() || cpu.is_some() {
            tracing::warn!("rt: SCHED_FIFO and affinity are Linux only; only mlockall applied");
        }
    }
}
