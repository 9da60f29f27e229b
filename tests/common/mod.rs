//! Helpers shared by the integration tests
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const WORKER: &str = env!("CARGO_BIN_EXE_chase_worker");

/// Stand-in for `perf stat`: strips `stat [-a] -e EVENTS`, runs the rest, then prints
/// `stderr_block` the way perf prints its counter summary.
pub fn fake_perf(dir: &Path, name: &str, stderr_block: &str, exit_code: i32) -> PathBuf {
    let script = format!(
        "#!/bin/sh\n\
         shift\n\
         if [ \"$1\" = \"-a\" ]; then shift; fi\n\
         shift 2\n\
         \"$@\"\n\
         cat >&2 <<'PERF_EOF'\n\
         {stderr_block}\n\
         PERF_EOF\n\
         exit {exit_code}\n"
    );
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub const PERF_BLOCK: &str = " Performance counter stats for 'chase_worker':

         1,234,567      cache-misses
         2,345,678      L1-dcache-load-misses
           900,000      LLC-load-misses
         1,100,000      LLC-loads
             2,000      unc_m_cas_count.rd
               500      unc_m_cas_count.wr

       0.050000000 seconds time elapsed";
