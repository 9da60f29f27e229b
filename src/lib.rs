pub mod affinity;
pub mod counters;
pub mod error;
pub mod harness;
pub mod kernel;
pub mod metrics;
pub mod permutation;
pub mod plan;
pub mod platform;
pub mod record;
pub mod sweep;

pub use error::{ChaseError, Result};

/// Convert number of bytes to formatted string
pub fn format_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    let b = bytes as f64;
    if bytes >= GB {
        format!("{:.2} GiB", b / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MiB", b / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KiB", b / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(8 * 1024), "8.00 KiB");
        assert_eq!(format_size(1536 * 1024), "1.50 MiB");
        assert_eq!(format_size(32 * 1024 * 1024 * 1024), "32.00 GiB");
    }
}
