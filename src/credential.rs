// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use heapless_bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::oath::{self, Properties};
use crate::{ensure, Error, Result, MAX_NAME_LENGTH, MAX_SECRET_LENGTH};

pub type Name = Bytes<MAX_NAME_LENGTH>;
pub type Secret = Bytes<MAX_SECRET_LENGTH>;

/// A credential as kept in the store.
///
/// Field names are shortened for the CBOR encoding.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct Credential {
    #[serde(rename = "N")]
    pub name: Name,
    #[serde(rename = "K")]
    pub kind: oath::Kind,
    #[serde(rename = "A")]
    pub algorithm: oath::Algorithm,
    #[serde(rename = "D")]
    pub digits: u8,
    #[serde(rename = "S")]
    pub secret: Secret,
    #[serde(rename = "T")]
    pub touch_required: bool,
    /// Next HOTP moving factor. Unused for TOTP.
    #[serde(rename = "C")]
    pub counter: u64,
    /// Position in the insertion order, assigned by the store.
    #[serde(rename = "Q")]
    pub sequence: u32,
}

impl core::fmt::Debug for Credential {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::result::Result<(), core::fmt::Error> {
        fmt.debug_struct("Credential")
            .field("name", &hex_str!(&self.name.as_slice(), 8))
            .field("kind", &self.kind)
            .field("algorithm", &self.algorithm)
            .field("digits", &self.digits)
            .field("touch_required", &self.touch_required)
            .field("counter", &self.counter)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Credential {
    /// Validates the fields of a new credential.
    ///
    /// SHA-512 is part of the type byte encoding, but no HMAC-SHA512 is available on the platform.
    pub fn new(
        name: &[u8],
        kind: oath::Kind,
        algorithm: oath::Algorithm,
        digits: u8,
        secret: &[u8],
        properties: Properties,
        initial_counter: u64,
    ) -> Result<Self> {
        ensure(!name.is_empty(), Error::InvalidParameter)?;
        ensure(!secret.is_empty(), Error::InvalidParameter)?;
        ensure(matches!(digits, 6 | 8), Error::InvalidParameter)?;
        ensure(algorithm != oath::Algorithm::Sha512, Error::InvalidParameter)?;
        Ok(Self {
            name: Bytes::from_slice(name).map_err(|_| Error::InvalidParameter)?,
            kind,
            algorithm,
            digits,
            secret: Bytes::from_slice(secret).map_err(|_| Error::InvalidParameter)?,
            touch_required: properties.contains(Properties::REQUIRE_TOUCH),
            counter: initial_counter,
            sequence: 0,
        })
    }

    pub fn properties(&self) -> Properties {
        let mut properties = Properties::empty();
        properties.set(Properties::REQUIRE_TOUCH, self.touch_required);
        properties
    }

    /// The ALGORITHM record value listed for this credential: type byte, digits, properties.
    pub fn algorithm_info(&self) -> [u8; 3] {
        [
            oath::combine(self.kind, self.algorithm),
            self.digits,
            self.properties().bits(),
        ]
    }
}
