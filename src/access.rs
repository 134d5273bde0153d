// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{ensure, Error, Result, MAX_PIN_ATTEMPTS, MAX_PIN_LENGTH};

pub type PinDigest = [u8; 32];

/// Checks the length of a PIN received from the host.
pub fn check_pin_length(pin: &[u8]) -> Result {
    ensure(
        !pin.is_empty() && pin.len() <= MAX_PIN_LENGTH,
        Error::InvalidParameter,
    )
}

/// The persistent part of the PIN gate. Only the SHA-256 digest of the PIN is kept.
///
/// The failure counter has to be written to storage before a comparison is made,
/// so that cutting the power after a wrong guess does not give the attempt back.
#[derive(Clone, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PinState {
    #[serde(rename = "H")]
    digest: Option<PinDigest>,
    #[serde(rename = "F")]
    failures: u8,
}

impl core::fmt::Debug for PinState {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::result::Result<(), core::fmt::Error> {
        fmt.debug_struct("PinState")
            .field("set", &self.is_set())
            .field("failures", &self.failures)
            .finish()
    }
}

impl PinState {
    pub fn is_set(&self) -> bool {
        self.digest.is_some()
    }

    pub fn remaining_attempts(&self) -> u8 {
        MAX_PIN_ATTEMPTS.saturating_sub(self.failures)
    }

    pub fn is_locked(&self) -> bool {
        self.remaining_attempts() == 0
    }

    pub fn set(&mut self, digest: &PinDigest) {
        self.digest = Some(*digest);
        self.failures = 0;
    }

    /// Fails if a VALIDATE cannot be attempted at all.
    pub fn check_can_attempt(&self) -> Result {
        ensure(self.is_set(), Error::PinNotSet)?;
        ensure(!self.is_locked(), Error::Locked)
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn clear_failures(&mut self) {
        self.failures = 0;
    }

    pub fn matches(&self, digest: &PinDigest) -> bool {
        match &self.digest {
            Some(stored) => stored[..].ct_eq(&digest[..]).into(),
            None => false,
        }
    }

    /// The error reported after a mismatch has been recorded.
    ///
    /// The attempt that uses up the last try still reports `WrongPin` with nothing
    /// remaining. Only later attempts see [`Error::Locked`].
    pub fn mismatch_error(&self) -> Error {
        Error::WrongPin {
            remaining: self.remaining_attempts(),
        }
    }
}
