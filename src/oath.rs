// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::Error;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tag {
    Name = 0x71,
    Key = 0x73,
    Challenge = 0x74,
    /// ASCII decimal code
    Response = 0x75,
    /// (kind | algorithm, digits, properties), listed after a name in LIST version 1
    Algorithm = 0x77,
    Property = 0x78,
    Version = 0x79,
    /// Initial HOTP counter, 4 bytes big endian
    InitialMovingFactor = 0x7a,
    PinCounter = 0x82,
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> u8 {
        tag as u8
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Algorithm {
    Sha1 = 0x01,
    Sha256 = 0x02,
    Sha512 = 0x03,
}

impl TryFrom<u8> for Algorithm {
    type Error = Error;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Algorithm::*;
        Ok(match byte & 0x0f {
            0x1 => Sha1,
            0x2 => Sha256,
            0x3 => Sha512,
            _ => return Err(Error::InvalidParameter),
        })
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Kind {
    Hotp = 0x10,
    Totp = 0x20,
}

impl TryFrom<u8> for Kind {
    type Error = Error;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte & 0xf0 {
            0x10 => Kind::Hotp,
            0x20 => Kind::Totp,
            _ => return Err(Error::InvalidParameter),
        })
    }
}

pub fn combine(kind: Kind, algorithm: Algorithm) -> u8 {
    kind as u8 | algorithm as u8
}

bitflags::bitflags! {
    /// Credential flags, as sent in the PROPERTY tag.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Properties: u8 {
        const REQUIRE_TOUCH = 0x02;
    }
}

impl TryFrom<u8> for Properties {
    type Error = Error;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Properties::from_bits(byte).ok_or(Error::InvalidParameter)
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Instruction {
    Put = 0x01,
    Delete = 0x02,
    SetCode = 0x03,
    Reset = 0x04,
    TimeSync = 0x05,
    /// LIST with P2 = 0, CALCULATE with P2 = 1
    ListOrCalculate = 0xa1,
    Validate = 0xa3,
    Select = 0xa4,
}

impl TryFrom<u8> for Instruction {
    type Error = Error;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Instruction::*;
        Ok(match byte {
            0x01 => Put,
            0x02 => Delete,
            0x03 => SetCode,
            0x04 => Reset,
            0x05 => TimeSync,
            0xa1 => ListOrCalculate,
            0xa3 => Validate,
            0xa4 => Select,
            _ => return Err(Error::UnknownCommand),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_byte_splits_into_kind_and_algorithm() {
        assert_eq!(Kind::try_from(0x21), Ok(Kind::Totp));
        assert_eq!(Algorithm::try_from(0x21), Ok(Algorithm::Sha1));
        assert_eq!(Kind::try_from(0x12), Ok(Kind::Hotp));
        assert_eq!(Algorithm::try_from(0x12), Ok(Algorithm::Sha256));
        assert_eq!(combine(Kind::Totp, Algorithm::Sha256), 0x22);
        assert_eq!(Kind::try_from(0x31), Err(Error::InvalidParameter));
        assert_eq!(Algorithm::try_from(0x20), Err(Error::InvalidParameter));
    }

    #[test]
    fn unknown_property_bits_are_rejected() {
        assert_eq!(Properties::try_from(0x00), Ok(Properties::empty()));
        assert_eq!(Properties::try_from(0x02), Ok(Properties::REQUIRE_TOUCH));
        assert_eq!(Properties::try_from(0x04), Err(Error::InvalidParameter));
    }

    #[test]
    fn unknown_instructions_are_reported() {
        assert_eq!(Instruction::try_from(0xa1), Ok(Instruction::ListOrCalculate));
        assert_eq!(Instruction::try_from(0xa2), Err(Error::UnknownCommand));
        assert_eq!(Instruction::try_from(0x00), Err(Error::UnknownCommand));
    }
}
