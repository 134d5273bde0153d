// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use heapless::Vec;
use trussed::types::{KeyId, Location};
use trussed::{client, syscall, try_syscall};

use crate::oath;
use crate::{Error, Result, TOTP_PERIOD};

/// ASCII decimal code, 6 or 8 characters.
pub type Code = Vec<u8, 8>;

/// The TOTP moving factor for a Unix timestamp.
pub fn totp_counter(timestamp: u64) -> u64 {
    timestamp / TOTP_PERIOD
}

/// Computes the HOTP code of `secret` for `counter`. TOTP calls this with [`totp_counter`].
pub fn hotp<T>(
    trussed: &mut T,
    algorithm: oath::Algorithm,
    secret: &[u8],
    counter: u64,
    digits: u8,
) -> Result<Code>
where
    T: client::Client + client::HmacSha1 + client::HmacSha256,
{
    let truncated = with_key(trussed, secret, |trussed, key| {
        let message = counter.to_be_bytes();
        let digest = match algorithm {
            oath::Algorithm::Sha1 => try_syscall!(trussed.sign_hmacsha1(key, &message))
                .map_err(|_| Error::Storage)?
                .signature,
            oath::Algorithm::Sha256 => try_syscall!(trussed.sign_hmacsha256(key, &message))
                .map_err(|_| Error::Storage)?
                .signature,
            oath::Algorithm::Sha512 => return Err(Error::InvalidParameter),
        };
        dynamic_truncation(&digest)
    })?;
    ascii_code(truncated, digits)
}

/// Injects `secret` as a volatile key for the duration of `f`.
fn with_key<T, F, R>(trussed: &mut T, secret: &[u8], f: F) -> Result<R>
where
    T: client::Client,
    F: FnOnce(&mut T, KeyId) -> Result<R>,
{
    let key = try_syscall!(trussed.unsafe_inject_shared_key(secret, Location::Volatile))
        .map_err(|_| Error::Storage)?
        .key;
    let result = f(trussed, key);
    syscall!(trussed.delete(key));
    result
}

/// RFC 4226, section 5.3
fn dynamic_truncation(digest: &[u8]) -> Result<u32> {
    let offset = usize::from(digest.last().ok_or(Error::Storage)? & 0x0f);
    let bytes: [u8; 4] = digest
        .get(offset..offset + 4)
        .ok_or(Error::Storage)?
        .try_into()
        .map_err(|_| Error::Storage)?;
    Ok(u32::from_be_bytes(bytes) & 0x7fff_ffff)
}

fn ascii_code(truncated: u32, digits: u8) -> Result<Code> {
    let modulus = 10u32
        .checked_pow(digits.into())
        .ok_or(Error::InvalidParameter)?;
    let mut value = truncated % modulus;
    let mut code = Code::new();
    for _ in 0..digits {
        code.push(b'0' + (value % 10) as u8)
            .map_err(|_| Error::InvalidParameter)?;
        value /= 10;
    }
    code.reverse();
    Ok(code)
}
