//! Measurement thread setup
//!
//! Timing a pointer chase is only meaningful if the thread stays on one core and isn't preempted
//! by background work mid-interval. Both requests are best effort: failures are logged and the
//! sweep runs anyway.
use log::{info, warn};

/// What was actually applied to the calling thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadSetup {
    pub pinned_core: Option<usize>,
    pub max_priority: bool,
}

/// Pin the calling thread to `core` (if given) and raise it to maximum priority
pub fn prepare_measurement_thread(label: &str, core: Option<usize>) -> ThreadSetup {
    let mut setup = ThreadSetup::default();

    if let Some(cpu_num) = core {
        let core_id = core_affinity::CoreId { id: cpu_num };
        if core_affinity::set_for_current(core_id) {
            info!("Pinned '{}' to CPU core {}", label, cpu_num);
            setup.pinned_core = Some(cpu_num);
        } else {
            warn!(
                "Couldn't pin '{}' to CPU core {} (NOTE: this is expected on macOS)",
                label, cpu_num
            );
        }
    }

    if thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_err()
    {
        warn!("Couldn't set '{}' to maximum thread priority", label);
    } else {
        setup.max_priority = true;
    }

    setup
}

/// Core ids the process may run on, empty when the platform won't say
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.id)
        .collect()
}
