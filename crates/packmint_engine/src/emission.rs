//! # Emission Controller
//!
//! **Global cap on units issued through randomized packs**
//!
//! One counter, one mutex. Every pack open reserves its full bundle size
//! here before randomness is even requested, so a pack that could never be
//! fulfilled is refused up front.
//!
//! ## Invariants
//!
//! - `total_emission <= emission_cap`
//! - `emission_cap % bundle_size == 0` and `emission_cap > 0`
//!
//! Deck opens never touch this counter.

use parking_lot::Mutex;

use crate::error::{DistributionError, DistributionResult};

/// Counter state guarded by the controller's mutex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct EmissionState {
    total: u64,
    cap: u64,
    locked: bool,
}

/// Snapshot of the emission counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmissionSnapshot {
    /// Units reserved by packs so far.
    pub total_emission: u64,
    /// The cap.
    pub emission_cap: u64,
    /// Units per pack.
    pub bundle_size: u32,
    /// Whether the cap is frozen.
    pub locked: bool,
}

impl EmissionSnapshot {
    /// Packs that can still be opened.
    #[must_use]
    pub const fn remaining_packs(&self) -> u64 {
        (self.emission_cap - self.total_emission) / self.bundle_size as u64
    }
}

/// Tracks total pack emission against a fixed cap.
#[derive(Debug)]
pub struct EmissionController {
    bundle_size: u32,
    state: Mutex<EmissionState>,
}

impl EmissionController {
    /// Creates a controller.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidConfig`] for a zero bundle size and
    /// [`DistributionError::InvalidEmissionCap`] for a cap that is zero or not
    /// a multiple of the bundle size.
    pub fn new(bundle_size: u32, emission_cap: u64) -> DistributionResult<Self> {
        if bundle_size == 0 {
            return Err(DistributionError::InvalidConfig(
                "bundle size must be at least 1".to_string(),
            ));
        }
        check_cap(emission_cap, bundle_size)?;
        Ok(Self {
            bundle_size,
            state: Mutex::new(EmissionState {
                total: 0,
                cap: emission_cap,
                locked: false,
            }),
        })
    }

    /// Units per pack.
    #[inline]
    #[must_use]
    pub const fn bundle_size(&self) -> u32 {
        self.bundle_size
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> EmissionSnapshot {
        let state = *self.state.lock();
        EmissionSnapshot {
            total_emission: state.total,
            emission_cap: state.cap,
            bundle_size: self.bundle_size,
            locked: state.locked,
        }
    }

    /// Units reserved so far.
    #[must_use]
    pub fn total_emission(&self) -> u64 {
        self.state.lock().total
    }

    /// The cap.
    #[must_use]
    pub fn emission_cap(&self) -> u64 {
        self.state.lock().cap
    }

    /// Atomically reserves one bundle worth of emission.
    ///
    /// Returns the total after the reservation.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::EmissionCapReached`] without touching the
    /// counter if the bundle would cross the cap.
    pub fn reserve(&self) -> DistributionResult<u64> {
        let mut state = self.state.lock();
        let next = state
            .total
            .checked_add(u64::from(self.bundle_size))
            .filter(|next| *next <= state.cap)
            .ok_or(DistributionError::EmissionCapReached {
                total_emission: state.total,
                cap: state.cap,
                bundle_size: self.bundle_size,
            })?;
        state.total = next;
        Ok(next)
    }

    /// Returns one bundle worth of emission.
    ///
    /// Used when a reserved pack can never complete: the coordinator refused
    /// the request, or the request expired.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvariantViolation`] if nothing is
    /// reserved.
    pub fn release(&self) -> DistributionResult<u64> {
        let mut state = self.state.lock();
        state.total = state
            .total
            .checked_sub(u64::from(self.bundle_size))
            .ok_or_else(|| {
                DistributionError::InvariantViolation(
                    "emission release with no outstanding reservation".to_string(),
                )
            })?;
        Ok(state.total)
    }

    /// Changes the cap.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::SetLocked`] once locked,
    /// [`DistributionError::InvalidEmissionCap`] with the nearest valid caps
    /// for a cap that is zero or not a multiple of the bundle size, and
    /// [`DistributionError::CapBelowEmission`] for a cap below what was
    /// already issued.
    pub fn set_cap(&self, new_cap: u64) -> DistributionResult<()> {
        let mut state = self.state.lock();
        if state.locked {
            return Err(DistributionError::SetLocked);
        }
        check_cap(new_cap, self.bundle_size)?;
        if new_cap < state.total {
            return Err(DistributionError::CapBelowEmission {
                requested: new_cap,
                total_emission: state.total,
            });
        }
        state.cap = new_cap;
        Ok(())
    }

    /// Freezes the cap. Reservations continue.
    pub fn lock(&self) {
        self.state.lock().locked = true;
    }
}

/// Validates a cap and computes the nearest valid caps on failure.
///
/// There is no higher suggestion when it would not fit in a `u64`.
///
/// # Errors
///
/// Returns [`DistributionError::InvalidEmissionCap`].
pub fn check_cap(cap: u64, bundle_size: u32) -> DistributionResult<()> {
    let bundle = u64::from(bundle_size);
    if cap == 0 || cap % bundle != 0 {
        let suggested_lower = (cap / bundle) * bundle;
        return Err(DistributionError::InvalidEmissionCap {
            requested: cap,
            bundle_size,
            suggested_lower,
            suggested_higher: suggested_lower.checked_add(bundle),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_packs_then_refused() {
        let controller = EmissionController::new(15, 150).unwrap();

        for i in 1..=10u64 {
            assert_eq!(controller.reserve().unwrap(), i * 15);
        }
        assert_eq!(
            controller.reserve(),
            Err(DistributionError::EmissionCapReached {
                total_emission: 150,
                cap: 150,
                bundle_size: 15
            })
        );
        assert_eq!(controller.total_emission(), 150);
        assert_eq!(controller.snapshot().remaining_packs(), 0);
    }

    #[test]
    fn test_invalid_cap_suggestions() {
        assert_eq!(
            EmissionController::new(15, 160).unwrap_err(),
            DistributionError::InvalidEmissionCap {
                requested: 160,
                bundle_size: 15,
                suggested_lower: 150,
                suggested_higher: Some(165),
            }
        );
        assert!(matches!(
            EmissionController::new(15, 0),
            Err(DistributionError::InvalidEmissionCap {
                suggested_lower: 0,
                suggested_higher: Some(15),
                ..
            })
        ));
        assert!(EmissionController::new(0, 15).is_err());
    }

    #[test]
    fn test_set_cap_rules() {
        let controller = EmissionController::new(15, 150).unwrap();
        controller.reserve().unwrap();
        controller.reserve().unwrap();

        assert!(matches!(
            controller.set_cap(151),
            Err(DistributionError::InvalidEmissionCap {
                suggested_lower: 150,
                suggested_higher: Some(165),
                ..
            })
        ));
        assert_eq!(
            controller.set_cap(15),
            Err(DistributionError::CapBelowEmission {
                requested: 15,
                total_emission: 30
            })
        );
        controller.set_cap(30).unwrap();
        assert!(controller.reserve().is_err());

        controller.set_cap(300).unwrap();
        controller.lock();
        assert_eq!(controller.set_cap(450), Err(DistributionError::SetLocked));
        assert!(controller.reserve().is_ok());
    }

    #[test]
    fn test_cap_near_u64_max() {
        assert_eq!(
            EmissionController::new(2, u64::MAX).unwrap_err(),
            DistributionError::InvalidEmissionCap {
                requested: u64::MAX,
                bundle_size: 2,
                suggested_lower: u64::MAX - 1,
                suggested_higher: None,
            }
        );

        let controller = EmissionController::new(2, 2).unwrap();
        assert!(matches!(
            controller.set_cap(u64::MAX),
            Err(DistributionError::InvalidEmissionCap {
                suggested_higher: None,
                ..
            })
        ));
        controller.set_cap(u64::MAX - 1).unwrap();
    }

    #[test]
    fn test_reserve_at_u64_max_cap() {
        // u64::MAX is a multiple of 15.
        let controller = EmissionController::new(15, u64::MAX).unwrap();
        controller.state.lock().total = u64::MAX;

        assert_eq!(
            controller.reserve(),
            Err(DistributionError::EmissionCapReached {
                total_emission: u64::MAX,
                cap: u64::MAX,
                bundle_size: 15
            })
        );
        assert_eq!(controller.total_emission(), u64::MAX);

        controller.state.lock().total = u64::MAX - 15;
        assert_eq!(controller.reserve().unwrap(), u64::MAX);
    }

    #[test]
    fn test_release_refunds_headroom() {
        let controller = EmissionController::new(5, 5).unwrap();
        controller.reserve().unwrap();
        assert!(controller.reserve().is_err());

        assert_eq!(controller.release().unwrap(), 0);
        assert!(controller.reserve().is_ok());

        let fresh = EmissionController::new(5, 5).unwrap();
        assert!(fresh.release().is_err());
    }

    #[test]
    fn test_concurrent_reservations_stop_at_cap() {
        let controller = EmissionController::new(15, 15 * 40).unwrap();

        let granted: u64 = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| (0..20).filter(|_| controller.reserve().is_ok()).count() as u64)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(granted, 40);
        assert_eq!(controller.total_emission(), 600);
    }
}
