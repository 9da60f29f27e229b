//! Last-level cache detection from Linux sysfs
use log::debug;
use std::fs;
use std::path::Path;

/// Capacity assumed when the platform doesn't report its caches
pub const DEFAULT_LLC_BYTES: u64 = 32 * 1024 * 1024;

pub const SYSFS_CACHE_DIR: &str = "/sys/devices/system/cpu/cpu0/cache";

/// Parse a sysfs cache size such as `48K`, `2048K`, `105M` or a plain byte count
pub fn parse_cache_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let scale = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return None,
    };
    value.checked_mul(scale)
}

/// Size of the highest-level data or unified cache listed under `cache_dir`.
///
/// `cache_dir` is laid out like `/sys/devices/system/cpu/cpu0/cache`, with `index*/level`,
/// `index*/type` and `index*/size` files.
pub fn detect_llc_bytes_in(cache_dir: &Path) -> Option<u64> {
    let entries = fs::read_dir(cache_dir).ok()?;
    let mut best: Option<(u32, u64)> = None;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("index") {
            continue;
        }
        let dir = entry.path();
        let read = |file: &str| fs::read_to_string(dir.join(file)).ok();

        // instruction caches never hold the chase array
        if read("type").is_some_and(|t| t.trim() == "Instruction") {
            continue;
        }
        let Some(level) = read("level").and_then(|l| l.trim().parse::<u32>().ok()) else {
            continue;
        };
        let Some(size) = read("size").as_deref().and_then(parse_cache_size) else {
            continue;
        };
        debug!("Cache {}: L{} {} bytes", dir.display(), level, size);

        if best.is_none_or(|(best_level, _)| level > best_level) {
            best = Some((level, size));
        }
    }

    best.map(|(_, size)| size)
}

/// Detected LLC capacity of this machine, if the platform reports one
pub fn detect_llc_bytes() -> Option<u64> {
    detect_llc_bytes_in(Path::new(SYSFS_CACHE_DIR))
}
