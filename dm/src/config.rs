//! Build-time constants (generated from `dm.json`) and the run-time [DmConfig].
use log::LevelFilter;

include!(concat!(env!("OUT_DIR"), "/dm_config.rs"));

#[derive(Debug, Clone)]
pub struct DmConfig {
    /// Tree paths whose children are bound under the root device after the main scan.
    pub scan_paths: &'static [&'static str],
    /// Offset between run address and link address, applied once by [crate::Dm::init].
    pub reloc_offset: Option<isize>,
    /// Only bind nodes (or drivers) marked for use before relocation.
    pub pre_reloc_only: bool,
    /// Probe devices whose driver asks for it at the end of the scan.
    pub probe_after_bind: bool,
    pub log_level: LevelFilter,
}

impl Default for DmConfig {
    fn default() -> Self {
        DmConfig {
            scan_paths: SCAN_PATHS,
            reloc_offset: None,
            pre_reloc_only: false,
            probe_after_bind: true,
            log_level: crate::logging::parse_level(LOG_LEVEL).unwrap_or(LevelFilter::Info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_build_config() {
        let cfg = DmConfig::default();
        assert_eq!(cfg.scan_paths, SCAN_PATHS);
        assert!(cfg.scan_paths.iter().all(|p| p.starts_with('/')));
        assert!(cfg.reloc_offset.is_none());
        assert!(MAX_BIND_PASSES > 0);
    }
}
