//! Text dumps of the model for the console.
use crate::{device::DeviceId, model::Dm};
use alloc::vec::Vec;
use core::fmt::{self, Write};

/// Counts reported by [Dm::stats].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmStats {
    pub device_count: usize,
    pub activated_count: usize,
    pub uclass_count: usize,
    /// Declared size of every storage block currently allocated.
    pub storage_bytes: usize,
}

impl Dm {
    /// One row per device, indented to show the tree. With `sort`, siblings are listed by
    /// uclass id.
    pub fn dump_tree(&self, w: &mut dyn Write, sort: bool) -> fmt::Result {
        writeln!(w, " Class     Seq    Probed  Driver                Name")?;
        writeln!(w, "-----------------------------------------------------------")?;
        match self.root {
            Some(root) => self.show_device(w, root, 0, 0, sort),
            None => Ok(()),
        }
    }

    fn show_device(&self, w: &mut dyn Write, id: DeviceId, depth: u32, last_flags: u64, sort: bool) -> fmt::Result {
        let Ok(dev) = self.device(id) else {
            return Ok(());
        };
        let uc_name = self.uclass_driver_of(id).map_or("?", |uc| uc.name);
        let marker = if dev.is_active() { '+' } else { ' ' };
        match dev.seq {
            Some(seq) => write!(w, " {:<10.10} {:>3}  [ {} ]   {:<20.20}  ", uc_name, seq, marker, dev.driver.name)?,
            None => write!(w, " {:<10.10} {:>3}  [ {} ]   {:<20.20}  ", uc_name, "-", marker, dev.driver.name)?,
        }
        for level in (1..depth).rev() {
            w.write_str(if last_flags & (1 << level) != 0 { "    " } else { "|   " })?;
        }
        if depth > 0 {
            w.write_str(if last_flags & 1 != 0 { "`-- " } else { "|-- " })?;
        }
        writeln!(w, "{}", dev.name)?;

        let mut children = dev.children.clone();
        if sort {
            children.sort_by_key(|c| self.device(*c).map(|d| d.uclass_id).ok());
        }
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            let is_last = (i + 1 == count) as u64;
            self.show_device(w, child, depth + 1, (last_flags << 1) | is_last, sort)?;
        }
        Ok(())
    }

    /// Devices grouped by uclass, in uclass creation order.
    pub fn dump_uclass(&self, w: &mut dyn Write) -> fmt::Result {
        for uc in self.uclasses() {
            writeln!(w, "uclass {}: {}", u32::from(uc.id), uc.driver.name)?;
            for (i, id) in uc.devices.iter().enumerate() {
                let Ok(dev) = self.device(*id) else {
                    continue;
                };
                let marker = if dev.is_active() { '*' } else { ' ' };
                match dev.seq {
                    Some(seq) => writeln!(w, "{:>2} {} {}, seq {}", i, marker, dev.name, seq)?,
                    None => writeln!(w, "{:>2} {} {}, seq -", i, marker, dev.name)?,
                }
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Every registered driver with its uclass and the devices bound to it.
    pub fn dump_drivers(&self, w: &mut dyn Write) -> fmt::Result {
        writeln!(w, "Driver                    uid uclass               Devices")?;
        writeln!(w, "----------------------------------------------------------")?;
        for driver in self.registry.drivers() {
            let uc_name = self.registry.find_uclass(driver.id).map_or("<no uclass>", |uc| uc.name);
            write!(w, "{:<25.25} {:>3} {:<20.20} ", driver.name, u32::from(driver.id), uc_name)?;
            let bound: Vec<&str> = self
                .devices()
                .filter_map(|id| self.device(id).ok())
                .filter(|dev| core::ptr::eq(dev.driver, *driver))
                .map(|dev| dev.name.as_str())
                .collect();
            match bound.split_first() {
                None => writeln!(w, "<none>")?,
                Some((first, rest)) => {
                    writeln!(w, "{}", first)?;
                    for name in rest {
                        writeln!(w, "{:51}{}", "", name)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Driver names against the `compatible` strings they match.
    pub fn dump_driver_compat(&self, w: &mut dyn Write) -> fmt::Result {
        writeln!(w, "Driver                Compatible")?;
        writeln!(w, "--------------------------------")?;
        for driver in self.registry.drivers() {
            match driver.of_match.split_first() {
                None => writeln!(w, "{}", driver.name)?,
                Some((first, rest)) => {
                    writeln!(w, "{:<20.20}  {}", driver.name, first.compatible)?;
                    for entry in rest {
                        writeln!(w, "{:22}{}", "", entry.compatible)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The static device-info table and which entries ended up bound.
    pub fn dump_static_info(&self, w: &mut dyn Write) -> fmt::Result {
        writeln!(w, "Static device info:")?;
        for (i, info) in self.registry.infos().iter().enumerate() {
            let bound = self
                .devices()
                .filter_map(|id| self.device(id).ok())
                .any(|dev| dev.node.is_none() && dev.name == info.name);
            write!(w, "{:>3} {:<20.20} ", i, info.name)?;
            match info.parent_idx {
                Some(parent) => write!(w, "parent {:>3}", parent)?,
                None => write!(w, "parent   -")?,
            }
            writeln!(w, "{}", if bound { "  bound" } else { "" })?;
        }
        Ok(())
    }

    pub fn stats(&self) -> DmStats {
        let mut stats = DmStats {
            uclass_count: self.uclasses.len(),
            ..DmStats::default()
        };
        for id in self.devices() {
            let Ok(dev) = self.device(id) else {
                continue;
            };
            stats.device_count += 1;
            if dev.is_active() {
                stats.activated_count += 1;
            }
            let uc_drv = self.registry.find_uclass(dev.uclass_id);
            let parent_auto = dev
                .parent
                .and_then(|p| self.device(p).ok())
                .and_then(|p| p.driver.per_child_plat_auto.or_else(|| self.registry.find_uclass(p.uclass_id)?.per_child_plat_auto));
            for (present, auto) in [
                (dev.has_plat(), dev.driver.plat_auto),
                (dev.has_priv(), dev.driver.priv_auto),
                (dev.has_uclass_priv(), uc_drv.and_then(|uc| uc.per_device_auto)),
                (dev.has_parent_plat(), parent_auto),
            ] {
                if present {
                    stats.storage_bytes += auto.map_or(0, |a| a.size);
                }
            }
        }
        stats
    }
}
