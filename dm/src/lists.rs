//! Matching tree nodes and static device-info entries to drivers.
use crate::{
    config::MAX_BIND_PASSES,
    device::DeviceId,
    driver::{DriverFlags, DriverInfo},
    error::{DmError, DmResult},
    model::Dm,
};
use alloc::{vec, vec::Vec};
use dt::{OfNode, PropertyError};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfoState {
    Pending,
    Bound(DeviceId),
    Skipped,
    Failed,
}

impl Dm {
    /// Bind `node` under `parent` to the first driver matching one of its `compatible` strings.
    ///
    /// Strings are tried in the order the node lists them; for each string, drivers in
    /// registry order. A driver declining with [DmError::NoDevice] lets the next one try.
    /// Returns `Ok(None)` for nodes without `compatible`, or when every candidate declined or
    /// the node is skipped before relocation.
    pub fn lists_bind_fdt(
        &mut self,
        parent: DeviceId,
        node: OfNode,
        pre_reloc_only: bool,
    ) -> DmResult<Option<DeviceId>> {
        let compats = match node.read_string_list("compatible") {
            Ok(compats) => compats,
            Err(PropertyError::PropNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut declined = false;
        for compat in compats {
            for (driver, entry) in self.registry.match_compatible(compat) {
                if pre_reloc_only && !node.pre_reloc() && !driver.flags.contains(DriverFlags::PRE_RELOC) {
                    debug_ex!("Skipping '{}' before relocation.", node.name());
                    return Ok(None);
                }
                debug_ex!("Match '{}' with driver '{}'.", compat, driver.name);
                match self.bind(Some(parent), driver, node.name(), Some(node), entry.data, None) {
                    Ok(id) => return Ok(Some(id)),
                    Err(DmError::NoDevice) => {
                        debug_ex!("Driver '{}' refuses to bind.", driver.name);
                        declined = true;
                    }
                    Err(err) => {
                        warn!("Error binding driver '{}': {}", driver.name, err);
                        return Err(err);
                    }
                }
            }
        }
        if declined {
            Ok(None)
        } else {
            debug_ex!("No match for node '{}'.", node.name());
            Err(DmError::NoDriver)
        }
    }

    /// Bind one static device-info entry under `parent`.
    pub fn bind_info(&mut self, parent: DeviceId, info: &DriverInfo) -> DmResult<DeviceId> {
        let driver = self.registry.find_driver(info.name).ok_or_else(|| {
            warn!("Cannot find driver '{}'.", info.name);
            DmError::NoDriver
        })?;
        let plat = info.plat.map(|new| new());
        self.bind(Some(parent), driver, info.name, None, 0, plat)
    }

    /// Bind every static device-info entry.
    ///
    /// Entries naming a parent wait until that parent is bound, so the table may list children
    /// before parents; a fixed number of passes bounds the work. Returns the first error after
    /// trying every entry.
    pub fn scan_plat(&mut self, pre_reloc_only: bool) -> DmResult {
        let root = self.root.ok_or(DmError::NoDevice)?;
        let infos = self.registry.infos();
        let mut state = vec![InfoState::Pending; infos.len()];
        let mut first_err = None;

        for _ in 0..MAX_BIND_PASSES {
            let mut progress = false;
            for (i, info) in infos.iter().enumerate() {
                if state[i] != InfoState::Pending {
                    continue;
                }
                let parent = match info.parent_idx.map(|p| state.get(p).copied()) {
                    None => root,
                    Some(Some(InfoState::Bound(parent))) => parent,
                    Some(Some(InfoState::Pending)) => continue,
                    Some(Some(InfoState::Skipped)) => {
                        state[i] = InfoState::Skipped;
                        progress = true;
                        continue;
                    }
                    Some(Some(InfoState::Failed)) | Some(None) => {
                        state[i] = InfoState::Failed;
                        first_err.get_or_insert(DmError::NoDevice);
                        progress = true;
                        continue;
                    }
                };
                progress = true;
                if pre_reloc_only
                    && !self
                        .registry
                        .find_driver(info.name)
                        .is_some_and(|d| d.flags.contains(DriverFlags::PRE_RELOC))
                {
                    state[i] = InfoState::Skipped;
                    continue;
                }
                state[i] = match self.bind_info(parent, info) {
                    Ok(id) => InfoState::Bound(id),
                    Err(err) => {
                        first_err.get_or_insert(err);
                        InfoState::Failed
                    }
                };
            }
            if !progress {
                break;
            }
        }

        let stuck: Vec<&str> = infos
            .iter()
            .zip(state.iter())
            .filter(|(_, st)| **st == InfoState::Pending)
            .map(|(info, _)| info.name)
            .collect();
        if !stuck.is_empty() {
            warn!("Static devices never found their parent: {:?}", stuck);
            first_err.get_or_insert(DmError::NoDevice);
        }
        first_err.map_or(Ok(()), Err)
    }
}
