//! Shared sensor-rail power arbitration
//!
//! Several drivers can sit on the external sensor rail at once; each claims
//! power while it needs the bus and releases it afterwards. The arbiter
//! reference-counts those claims and performs the physical power-up and
//! power-down sequences only on the zero crossings, so the rail stays
//! energized exactly while at least one claim is outstanding.

use core::cell::{Cell, RefCell};

use flood_node_hal::{Channel, Pull, Revision, SensorModule};

/// A power claim or release did not complete.
///
/// The only checked step is the channel-B data-line pull-up, which the bus
/// cannot operate without; the rest of the sequence is best-effort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerError;

/// Reference-counted ownership of the sensor rail.
///
/// Owns the shared [`SensorModule`] handle. Shared by reference among the
/// drivers on the rail; interior mutability is safe under the node's
/// single-threaded cooperative scheduling.
pub struct PowerArbiter<M: SensorModule> {
    module: RefCell<M>,
    claims: Cell<u32>,
}

impl<M: SensorModule> PowerArbiter<M> {
    pub fn new(module: M) -> Self {
        Self {
            module: RefCell::new(module),
            claims: Cell::new(0),
        }
    }

    /// Number of outstanding power claims.
    pub fn claims(&self) -> u32 {
        self.claims.get()
    }

    /// Run `f` against the shared sensor-module handle.
    pub fn with_module<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.module.borrow_mut())
    }

    /// Claim rail power on behalf of a caller whose claim state lives in
    /// `powered`. A caller that already holds power gets a no-op success.
    ///
    /// The first claim performs the physical power-up: module re-init and
    /// the revision-dependent supply path (dedicated VDD switch on R1.1,
    /// 56R channel-A pull-up before that), then the checked channel-B
    /// pull-up. If that last step fails the claim is not counted.
    pub fn acquire(&self, powered: &mut bool) -> Result<(), PowerError> {
        if *powered {
            return Ok(());
        }

        if self.claims.get() == 0 {
            let mut module = self.module.borrow_mut();

            let _ = module.init();

            match module.revision() {
                Revision::R1_1 => {
                    let _ = module.set_vdd(true);
                }
                Revision::R1_0 => {
                    let _ = module.set_pull(Channel::A, Pull::Up56r);
                }
            }

            module
                .set_pull(Channel::B, Pull::Up4k7)
                .map_err(|_| PowerError)?;
        }

        self.claims.set(self.claims.get() + 1);
        *powered = true;

        Ok(())
    }

    /// Release a claim taken with [`acquire`](Self::acquire). A caller that
    /// holds no power gets a no-op success.
    ///
    /// The claim is returned before the physical power-down runs, so a
    /// failed channel-B clear leaves the counter saying "unpowered" while
    /// the rail may still be energized until the next successful
    /// down-cycle. That window is accepted; the claim accounting itself
    /// never drifts.
    pub fn release(&self, powered: &mut bool) -> Result<(), PowerError> {
        if !*powered {
            return Ok(());
        }

        *powered = false;
        let remaining = self.claims.get().saturating_sub(1);
        self.claims.set(remaining);

        if remaining == 0 {
            let mut module = self.module.borrow_mut();

            let _ = module.init();

            match module.revision() {
                Revision::R1_1 => {
                    let _ = module.set_vdd(false);
                }
                Revision::R1_0 => {
                    let _ = module.set_pull(Channel::A, Pull::None);
                }
            }

            module
                .set_pull(Channel::B, Pull::None)
                .map_err(|_| PowerError)?;
        }

        Ok(())
    }
}
