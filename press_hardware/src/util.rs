use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Wait until `ready` returns true, or fail with `HwError::Timeout` once
/// `timeout` expires. Sleeps between polls to avoid spinning.
pub fn wait_until_with_timeout(
    mut ready: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !ready() {
        if Instant::now() >= deadline {
            return Err(HwError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ));
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}
