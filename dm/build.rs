use serde::Deserialize;
use std::{env, fs, path::PathBuf};

/// Build-time settings of the device model, read from `dm.json`.
#[derive(Deserialize)]
struct DmJson {
    scan_paths: Vec<String>,
    log_level: String,
    max_bind_passes: usize,
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();
    let json = fs::read_to_string(PathBuf::from(manifest_dir).join("dm.json")).unwrap();
    let cfg: DmJson = serde_json::from_str(&json).unwrap();
    make_config(&cfg, PathBuf::from(out_dir).join("dm_config.rs"));
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=dm.json");
}

fn make_config(cfg: &DmJson, path: PathBuf) {
    if !cfg.scan_paths.iter().all(|p| p.starts_with('/')) {
        panic!("dm.json: scan paths must be absolute.");
    }
    let mut s = String::new();
    s += "/// Tree paths scanned in addition to the root.\n";
    s += &format!("pub const SCAN_PATHS: &[&str] = &{:?};\n", cfg.scan_paths);
    s += "/// Default maximum log level.\n";
    s += &format!("pub const LOG_LEVEL: &str = {:?};\n", cfg.log_level);
    s += "/// Passes made over static device-info entries before giving up on missing parents.\n";
    s += &format!("pub const MAX_BIND_PASSES: usize = {};\n", cfg.max_bind_passes);
    fs::write(path, s).unwrap();
}
