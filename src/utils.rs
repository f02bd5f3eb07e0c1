use tracing::{info, warn};

/// Pin the calling thread to CPU core `index`.
///
/// Returns `false` (and logs) when the core does not exist or the OS refuses.
pub fn pin_current_thread(index: usize) -> bool {
    let Some(cores) = core_affinity::get_core_ids() else {
        warn!("Core affinity not supported on this platform");
        return false;
    };

    match cores.into_iter().find(|core| core.id == index) {
        Some(core) if core_affinity::set_for_current(core) => {
            info!("Pinned thread to core {}", index);
            true
        }
        Some(_) => {
            warn!("Failed to pin thread to core {}", index);
            false
        }
        None => {
            warn!("No core with index {}", index);
            false
        }
    }
}

/// Thread name for logging, falling back to the thread id.
pub fn thread_label() -> String {
    let current = std::thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_core_is_rejected() {
        assert!(!pin_current_thread(usize::MAX));
    }

    #[test]
    fn test_thread_label_uses_name() {
        let label = std::thread::Builder::new()
            .name("edgecam-test".into())
            .spawn(thread_label)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(label, "edgecam-test");
    }
}
