//! The firmware-wide model instance.
//!
//! Boot code installs one [Dm] here after starting it; consumers anywhere reach it through
//! [with_dm].
use crate::{
    error::{DmError, DmResult},
    model::Dm,
};
use lazy_static::lazy_static;
use spin::Mutex;

lazy_static! {
    static ref DM: Mutex<Option<Dm>> = Mutex::new(None);
}

/// Install the global instance. Fails with [DmError::Busy] if one is already installed.
pub fn install(dm: Dm) -> DmResult {
    let mut guard = DM.lock();
    if guard.is_some() {
        return Err(DmError::Busy);
    }
    *guard = Some(dm);
    Ok(())
}

/// Take the global instance out, e.g. before handing over to an operating system.
pub fn take() -> Option<Dm> {
    DM.lock().take()
}

pub fn is_installed() -> bool {
    DM.lock().is_some()
}

/// Run `f` on the global instance. Fails with [DmError::NoDevice] if none is installed.
///
/// The lock is held while `f` runs; `f` must not call back into this module.
pub fn with_dm<R>(f: impl FnOnce(&mut Dm) -> R) -> DmResult<R> {
    let mut guard = DM.lock();
    let dm = guard.as_mut().ok_or(DmError::NoDevice)?;
    Ok(f(dm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::new_dm;

    #[test]
    fn install_use_take() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        install(dm).unwrap();
        assert_eq!(install(new_dm()), Err(DmError::Busy));
        let count = with_dm(|dm| dm.device_count()).unwrap();
        assert_eq!(count, 1);
        let dm = take().unwrap();
        assert_eq!(dm.device_count(), 1);
        assert_eq!(with_dm(|dm| dm.device_count()), Err(DmError::NoDevice));
        assert!(!is_installed());
    }
}
