//! Driver, uclass and static device-info tables.
//!
//! A [Registry] is assembled once from the tables linked into the image, then handed to
//! [crate::Dm::new]. Lookups are linear scans in registration order, so the first driver
//! listed for a `compatible` string wins.
use crate::{
    class::simple_bus::{SIMPLE_BUS_DRIVER, SIMPLE_BUS_UCLASS},
    driver::{Driver, DriverInfo, UclassDriver, UdeviceId},
    reloc::RelocTable,
    root::{ROOT_DRIVER, ROOT_UCLASS},
    uclass_id::UclassId,
};
use alloc::vec::Vec;
use core::ptr;
use log::warn;

pub struct Registry {
    drivers: Vec<&'static Driver>,
    uclasses: Vec<&'static UclassDriver>,
    infos: &'static [DriverInfo],
    pub(crate) reloc: RelocTable,
}

impl Registry {
    /// Collect the tables. The root and simple-bus descriptors are appended unless the caller
    /// already lists them.
    pub fn new(
        drivers: &[&'static Driver],
        uclasses: &[&'static UclassDriver],
        infos: &'static [DriverInfo],
    ) -> Registry {
        let mut all_drivers: Vec<&'static Driver> = Vec::with_capacity(drivers.len() + 2);
        for driver in drivers.iter().copied().chain([&ROOT_DRIVER, &SIMPLE_BUS_DRIVER]) {
            if all_drivers.iter().any(|d| ptr::eq(*d, driver)) {
                continue;
            }
            if all_drivers.iter().any(|d| d.name == driver.name) {
                warn!("Driver name '{}' registered twice.", driver.name);
            }
            all_drivers.push(driver);
        }

        let mut all_uclasses: Vec<&'static UclassDriver> = Vec::with_capacity(uclasses.len() + 2);
        for uc in uclasses.iter().copied().chain([&ROOT_UCLASS, &SIMPLE_BUS_UCLASS]) {
            if let Some(first) = all_uclasses.iter().find(|u| u.id == uc.id) {
                if !ptr::eq(*first, uc) {
                    warn!("Uclass {:?} registered twice, keeping '{}'.", uc.id, first.name);
                }
                continue;
            }
            all_uclasses.push(uc);
        }

        let reloc = RelocTable::record(&all_drivers, &all_uclasses, infos);
        Registry {
            drivers: all_drivers,
            uclasses: all_uclasses,
            infos,
            reloc,
        }
    }

    pub fn drivers(&self) -> &[&'static Driver] {
        &self.drivers
    }

    pub fn uclasses(&self) -> &[&'static UclassDriver] {
        &self.uclasses
    }

    pub fn infos(&self) -> &'static [DriverInfo] {
        self.infos
    }

    pub fn find_driver(&self, name: &str) -> Option<&'static Driver> {
        self.drivers.iter().copied().find(|d| d.name == name)
    }

    pub fn find_uclass(&self, id: UclassId) -> Option<&'static UclassDriver> {
        self.uclasses.iter().copied().find(|u| u.id == id)
    }

    /// Every driver handling `compat`, in registration order, with the matching entry.
    pub fn match_compatible(&self, compat: &str) -> Vec<(&'static Driver, &'static UdeviceId)> {
        self.drivers
            .iter()
            .filter_map(|d| d.match_compatible(compat).map(|entry| (*d, entry)))
            .collect()
    }

    /// The recorded code and table addresses.
    pub fn reloc(&self) -> &RelocTable {
        &self.reloc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LEAF_DRIVER, TEST_DRIVERS, TEST_UCLASSES};

    #[test]
    fn builtins_follow_caller_tables() {
        let reg = Registry::new(TEST_DRIVERS, TEST_UCLASSES, &[]);
        let n = reg.drivers().len();
        assert!(ptr::eq(reg.drivers()[n - 2], &ROOT_DRIVER));
        assert!(ptr::eq(reg.drivers()[n - 1], &SIMPLE_BUS_DRIVER));
        assert!(reg.find_uclass(UclassId::Root).is_some());
        assert!(reg.find_uclass(UclassId::I2c).is_none());
    }

    #[test]
    fn duplicates_are_dropped() {
        let reg = Registry::new(&[&LEAF_DRIVER, &LEAF_DRIVER, &ROOT_DRIVER], &[], &[]);
        assert_eq!(reg.drivers().len(), 3);
        assert!(ptr::eq(reg.find_driver("test_leaf").unwrap(), &LEAF_DRIVER));
    }

    #[test]
    fn compatible_lookup_keeps_order() {
        let reg = Registry::new(TEST_DRIVERS, TEST_UCLASSES, &[]);
        let hits = reg.match_compatible("simple-bus");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.name, "simple_bus");
        let hits = reg.match_compatible("test,leaf");
        assert_eq!(hits[0].0.name, "test_leaf");
        assert_eq!(hits[0].1.data, 7);
        assert!(reg.match_compatible("nobody,home").is_empty());
    }
}
