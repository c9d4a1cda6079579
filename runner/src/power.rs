use std::io::{Read, Write};

use crate::error::RelayError;
use crate::relay::RelayController;

/// Board power held for the lifetime of the value.
///
/// `close` switches the channels off and reports the outcome. A session that
/// is dropped without `close` (early return, panic, cancelled future) still
/// switches off, logging any failure since there is nobody left to tell.
pub struct PowerSession<'a, P: Read + Write> {
    relay: Option<&'a mut RelayController<P>>,
    addrs: Vec<u8>,
}

impl<'a, P: Read + Write> PowerSession<'a, P> {
    pub fn open(relay: &'a mut RelayController<P>, addrs: &[u8]) -> Result<Self, RelayError> {
        let mut session = PowerSession {
            relay: Some(relay),
            addrs: addrs.to_vec(),
        };
        log::info!("powering on {:?}", session.addrs);
        if let Some(relay) = session.relay.as_mut() {
            // a partial power-on is undone by drop
            relay.on(addrs)?;
        }
        Ok(session)
    }

    pub fn close(mut self) -> Result<(), RelayError> {
        match self.relay.take() {
            Some(relay) => {
                log::info!("powering off {:?}", self.addrs);
                relay.off(&self.addrs)
            }
            None => Ok(()),
        }
    }
}

impl<P: Read + Write> Drop for PowerSession<'_, P> {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            log::warn!("power session left early, powering off {:?}", self.addrs);
            if let Err(e) = relay.off(&self.addrs) {
                log::error!("could not power off {:?}: {}", self.addrs, e);
            }
        }
    }
}
