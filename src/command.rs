// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::access::check_pin_length;
use crate::credential::Credential;
use crate::oath::{self, Properties, Tag};
use crate::{ensure, tlv, Error, Result};

/// The operation named by the instruction byte together with P1 and P2.
///
/// Known before the payload is looked at, so access checks can run first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    Select,
    Put,
    Delete,
    List,
    Calculate,
    SetCode,
    Validate,
    Reset,
    TimeSync,
}

impl Operation {
    pub fn from_header(instruction: oath::Instruction, p1: u8, p2: u8) -> Result<Self> {
        use oath::Instruction as Ins;
        Ok(match (instruction, p1, p2) {
            (Ins::Select, 0x04, 0x00) => Self::Select,
            (Ins::Put, 0x00, 0x00) => Self::Put,
            (Ins::Delete, 0x00, 0x00) => Self::Delete,
            (Ins::ListOrCalculate, 0x00, 0x00) => Self::List,
            (Ins::ListOrCalculate, 0x00, 0x01) => Self::Calculate,
            (Ins::SetCode, 0x00, 0x00) => Self::SetCode,
            (Ins::Validate, 0x00, 0x00) => Self::Validate,
            (Ins::Reset, 0x00, 0x00) => Self::Reset,
            (Ins::TimeSync, 0x00, 0x00) => Self::TimeSync,
            _ => return Err(Error::IncorrectParameters),
        })
    }

    /// Operations that change the stored credentials or the PIN.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Put | Self::Delete | Self::SetCode)
    }
}

/// Decoded command request, along with data
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command<'l> {
    /// Select the application
    Select,
    /// Store a credential, replacing one with the same name.
    Put(Put),
    /// Delete a credential.
    Delete(Delete<'l>),
    /// List all credential names.
    List(List),
    /// Compute the code of a credential.
    Calculate(Calculate<'l>),
    /// Set or replace the PIN.
    SetCode(SetCode<'l>),
    /// Validate the PIN for the current session.
    Validate(Validate<'l>),
    /// Remove all credentials and the PIN, and rotate the salt.
    Reset,
    /// Set the device clock.
    TimeSync(TimeSync),
}

impl<'l> Command<'l> {
    pub fn parse(operation: Operation, data: &'l [u8]) -> Result<Self> {
        Ok(match operation {
            Operation::Select => {
                ensure(data == crate::OATH_AID, Error::NotFound)?;
                Self::Select
            }
            Operation::Put => Self::Put(Put::try_from(data)?),
            Operation::Delete => Self::Delete(Delete::try_from(data)?),
            Operation::List => Self::List(List::try_from(data)?),
            Operation::Calculate => Self::Calculate(Calculate::try_from(data)?),
            Operation::SetCode => Self::SetCode(SetCode::try_from(data)?),
            Operation::Validate => Self::Validate(Validate::try_from(data)?),
            Operation::Reset => Self::Reset,
            Operation::TimeSync => Self::TimeSync(TimeSync::try_from(data)?),
        })
    }
}

impl<'l, const C: usize> TryFrom<&'l iso7816::Command<C>> for Command<'l> {
    type Error = Error;

    /// Decodes a whole APDU, without looking at any session state.
    fn try_from(command: &'l iso7816::Command<C>) -> Result<Self> {
        let instruction = oath::Instruction::try_from(u8::from(command.instruction()))?;
        check_class(command.class())?;
        let operation = Operation::from_header(instruction, command.p1, command.p2)?;
        Self::parse(operation, command.data())
    }
}

/// Only the plain interindustry class without chaining, secure messaging or logical channels.
pub fn check_class(class: iso7816::command::class::Class) -> Result {
    ensure(class.chain().last_or_only(), Error::ClassNotSupported)?;
    ensure(class.secure_messaging().none(), Error::ClassNotSupported)?;
    ensure(class.channel() == Some(0), Error::ClassNotSupported)?;
    ensure(class.into_inner() == 0x00, Error::ClassNotSupported)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Put {
    pub credential: Credential,
}

impl TryFrom<&[u8]> for Put {
    type Error = Error;

    // NAME, KEY (type, digits, secret), then optionally PROPERTY and IMF in any order
    fn try_from(data: &[u8]) -> Result<Self> {
        let mut decoder = tlv::decode(data);
        let name = decoder.expect(Tag::Name.into())?;
        let key = decoder.expect(Tag::Key.into())?;
        let (header, secret) = match key {
            [type_byte, digits, secret @ ..] => ([*type_byte, *digits], secret),
            _ => return Err(Error::InvalidParameter),
        };
        let kind = oath::Kind::try_from(header[0])?;
        let algorithm = oath::Algorithm::try_from(header[0])?;

        let mut properties = None;
        let mut initial_counter = None;
        for record in decoder {
            let record = record?;
            match record.tag {
                tag if tag == Tag::Property as u8 && properties.is_none() => {
                    let byte = single_byte(record.value)?;
                    properties = Some(Properties::try_from(byte)?);
                }
                tag if tag == Tag::InitialMovingFactor as u8 && initial_counter.is_none() => {
                    let bytes: [u8; 4] = record
                        .value
                        .try_into()
                        .map_err(|_| Error::InvalidParameter)?;
                    initial_counter = Some(u32::from_be_bytes(bytes));
                }
                _tag => {
                    warn_now!("unexpected or repeated tag {:x} in PUT", _tag);
                    return Err(Error::InvalidParameter);
                }
            }
        }
        debug_now!("parsed properties {:?}, counter {:?}", properties, initial_counter);

        let credential = Credential::new(
            name,
            kind,
            algorithm,
            header[1],
            secret,
            properties.unwrap_or_default(),
            initial_counter.map(u64::from).unwrap_or(0),
        )?;
        Ok(Self { credential })
    }
}

fn single_byte(value: &[u8]) -> Result<u8> {
    match value {
        [byte] => Ok(*byte),
        _ => Err(Error::InvalidParameter),
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Delete<'l> {
    pub name: &'l [u8],
}

impl core::fmt::Debug for Delete<'_> {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::result::Result<(), core::fmt::Error> {
        fmt.debug_struct("Delete")
            .field("name", &hex_str!(&self.name, 8))
            .finish()
    }
}

impl<'l> TryFrom<&'l [u8]> for Delete<'l> {
    type Error = Error;

    fn try_from(data: &'l [u8]) -> Result<Self> {
        let mut decoder = tlv::decode(data);
        let name = decoder.expect(Tag::Name.into())?;
        decoder.finish()?;
        Ok(Self { name })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct List {
    /// 0 lists names only, 1 adds an ALGORITHM record after every name
    pub version: u8,
}

impl TryFrom<&[u8]> for List {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        let version = match data {
            [] => 0,
            [version] => *version,
            _ => return Err(Error::InvalidParameter),
        };
        ensure(version <= 1, Error::InvalidParameter)?;
        Ok(Self { version })
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Calculate<'l> {
    pub name: &'l [u8],
    /// Unix timestamp for TOTP. The device clock is used when absent.
    pub timestamp: Option<u64>,
}

impl core::fmt::Debug for Calculate<'_> {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::result::Result<(), core::fmt::Error> {
        fmt.debug_struct("Calculate")
            .field("name", &hex_str!(&self.name, 8))
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl<'l> TryFrom<&'l [u8]> for Calculate<'l> {
    type Error = Error;

    fn try_from(data: &'l [u8]) -> Result<Self> {
        let mut decoder = tlv::decode(data);
        let name = decoder.expect(Tag::Name.into())?;
        let timestamp = decoder
            .optional(Tag::Challenge.into())?
            .map(timestamp_from_bytes)
            .transpose()?;
        decoder.finish()?;
        Ok(Self { name, timestamp })
    }
}

fn timestamp_from_bytes(bytes: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = bytes.try_into().map_err(|_| Error::InvalidParameter)?;
    Ok(u64::from_be_bytes(bytes))
}

fn parse_pin(data: &[u8]) -> Result<&[u8]> {
    let mut decoder = tlv::decode(data);
    let pin = decoder.expect(Tag::Key.into())?;
    decoder.finish()?;
    check_pin_length(pin)?;
    Ok(pin)
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct SetCode<'l> {
    pub pin: &'l [u8],
}

impl core::fmt::Debug for SetCode<'_> {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::result::Result<(), core::fmt::Error> {
        fmt.debug_struct("SetCode")
            .field("pin_length", &self.pin.len())
            .finish()
    }
}

impl<'l> TryFrom<&'l [u8]> for SetCode<'l> {
    type Error = Error;

    fn try_from(data: &'l [u8]) -> Result<Self> {
        Ok(Self {
            pin: parse_pin(data)?,
        })
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Validate<'l> {
    pub pin: &'l [u8],
}

impl core::fmt::Debug for Validate<'_> {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::result::Result<(), core::fmt::Error> {
        fmt.debug_struct("Validate")
            .field("pin_length", &self.pin.len())
            .finish()
    }
}

impl<'l> TryFrom<&'l [u8]> for Validate<'l> {
    type Error = Error;

    fn try_from(data: &'l [u8]) -> Result<Self> {
        Ok(Self {
            pin: parse_pin(data)?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeSync {
    pub timestamp: u64,
}

impl TryFrom<&[u8]> for TimeSync {
    type Error = Error;

    /// Either 8 raw big endian bytes, or the same wrapped in a CHALLENGE record.
    fn try_from(data: &[u8]) -> Result<Self> {
        let timestamp = if data.len() == 8 {
            timestamp_from_bytes(data)?
        } else {
            let mut decoder = tlv::decode(data);
            let value = decoder.expect(Tag::Challenge.into())?;
            decoder.finish()?;
            timestamp_from_bytes(value)?
        };
        Ok(Self { timestamp })
    }
}
