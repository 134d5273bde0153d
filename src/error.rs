// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use iso7816::Status;

/// Every failure a command can end with.
///
/// Each variant has exactly one status word, see the `From<Error> for Status` implementation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// A command other than SELECT arrived while the application is not selected.
    AppNotSelected,
    /// The instruction byte is not one the application knows.
    UnknownCommand,
    /// The instruction is known, but P1/P2 are not valid for it.
    IncorrectParameters,
    /// Chaining, secure messaging, logical channels or a proprietary class byte.
    ClassNotSupported,
    /// The frame could not be parsed as an APDU.
    MalformedApdu,
    /// A TLV record declares more bytes than the buffer holds.
    MalformedTlv,
    /// A field is missing, of the wrong size, or out of range.
    InvalidParameter,
    /// No credential with the requested name exists.
    NotFound,
    /// The credential store has no free slot left.
    StorageFull,
    /// A PIN is set and the session has not been validated yet.
    PinRequired,
    /// VALIDATE was called while no PIN is set.
    PinNotSet,
    /// The PIN did not match.
    WrongPin {
        /// Attempts left before the PIN gets locked.
        remaining: u8,
    },
    /// Too many wrong PIN attempts. Only RESET clears this.
    Locked,
    /// The user refused the presence check.
    TouchRequired,
    /// The user did not confirm presence in time.
    TouchTimeout,
    /// The platform failed to read or write persistent data.
    Storage,
    /// Persistent data exists but cannot be decrypted or deserialized.
    Corrupted,
    /// The reply buffer is too small for the response.
    ReplyOverflow,
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        match error {
            Error::AppNotSelected => Status::ConditionsOfUseNotSatisfied,
            Error::UnknownCommand => Status::InstructionNotSupportedOrInvalid,
            Error::IncorrectParameters => Status::IncorrectP1OrP2Parameter,
            Error::ClassNotSupported => Status::ClassNotSupported,
            // 6F00 is shared with ReplyOverflow
            Error::MalformedApdu => Status::UnspecifiedCheckingError,
            Error::MalformedTlv => Status::WrongLength,
            Error::InvalidParameter => Status::IncorrectDataParameter,
            Error::NotFound => Status::NotFound,
            Error::StorageFull => Status::NotEnoughMemory,
            Error::PinRequired => Status::SecurityStatusNotSatisfied,
            Error::PinNotSet => Status::KeyReferenceNotFound,
            Error::WrongPin { remaining } => Status::RemainingRetries(remaining),
            Error::Locked => Status::OperationBlocked,
            Error::TouchRequired => Status::VerificationFailed,
            Error::TouchTimeout => Status::UnspecifiedNonpersistentExecutionError,
            // one status word for both, a wipe on Corrupted is what tells them apart
            Error::Storage | Error::Corrupted => Status::UnspecifiedPersistentExecutionError,
            Error::ReplyOverflow => Status::UnspecifiedCheckingError,
        }
    }
}

impl From<Error> for [u8; 2] {
    fn from(error: Error) -> Self {
        Status::from(error).into()
    }
}
