// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![cfg_attr(not(test), no_std)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    non_ascii_idents,
    trivial_casts,
    unused,
    unused_qualifications,
    clippy::expect_used,
    clippy::unwrap_used
)]
#![deny(unsafe_code)]

//! OATH authenticator app: HOTP and TOTP credentials behind an APDU interface.
//!
//! Credentials are stored encrypted on the platform, an optional PIN guards the
//! commands that change them, and codes are computed with the platform's HMAC.
//! The command set follows the one `ykman oath` talks to.

#[macro_use]
extern crate delog;
generate_macros!();

#[macro_use(hex)]
extern crate hex_literal;

/// This is the main module, containing the application state machine.
pub mod authenticator;

pub use authenticator::{Authenticator, Options, PinPolicy};
mod access;
mod calculate;
mod clock;
/// Decoding of the command APDUs.
#[allow(missing_docs)]
pub mod command;
pub use command::Command;
mod credential;
mod error;
pub use error::Error;
mod oath;
mod state;
mod store;
/// The tag-length-value records used in command and response payloads.
pub mod tlv;

/// This is the application id, which allows to select and identify it
pub const OATH_AID: &[u8] = &hex!("A000000527 2001");

/// This constant defines timeout for the regular UP confirmation
pub const UP_TIMEOUT_MILLISECONDS: u32 = 30 * 1000;

/// Most credentials the store holds at once
pub const MAX_CREDENTIALS: usize = 32;

/// Longest credential name, in bytes
pub const MAX_NAME_LENGTH: usize = 64;

/// Longest credential secret, in bytes
pub const MAX_SECRET_LENGTH: usize = 64;

/// Longest PIN, in bytes
pub const MAX_PIN_LENGTH: usize = 64;

/// Wrong PIN attempts allowed before the PIN locks
pub const MAX_PIN_ATTEMPTS: u8 = 3;

/// TOTP time step, in seconds
pub const TOTP_PERIOD: u64 = 30;

/// Data capacity used when [`Authenticator::process`] parses raw APDUs
pub const MAX_COMMAND_DATA_LENGTH: usize = 255;

/// The trussed client calls this app makes.
pub trait Client:
    trussed::client::Client
    + trussed::client::HmacSha1
    + trussed::client::HmacSha256
    + trussed::client::Sha256
    + trussed::client::Chacha8Poly1305
{
}

impl<T> Client for T where
    T: trussed::client::Client
        + trussed::client::HmacSha1
        + trussed::client::HmacSha256
        + trussed::client::Sha256
        + trussed::client::Chacha8Poly1305
{
}

fn ensure<T>(cond: bool, err: T) -> core::result::Result<(), T> {
    match cond {
        true => Ok(()),
        false => Err(err),
    }
}

type Result<T = ()> = core::result::Result<T, Error>;
