// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simple tag-length-value records: one tag byte, one length byte, then the value.

use core::iter::FusedIterator;

use heapless::Vec;

use crate::{Error, Result};

/// Largest value a single record can carry.
pub const MAX_VALUE_LENGTH: usize = u8::MAX as usize;

/// A decoded record, borrowing its value from the input buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tlv<'a> {
    /// The tag byte.
    pub tag: u8,
    /// The value bytes.
    pub value: &'a [u8],
}

/// Lazy iterator over the records of a buffer.
///
/// Cloning the decoder gives an independent cursor at the same position, so a caller
/// can look ahead without consuming. A record whose length runs past the end of the
/// buffer yields [`Error::MalformedTlv`] once; the iterator is exhausted afterwards.
#[derive(Clone, Debug)]
pub struct Decoder<'a> {
    remaining: &'a [u8],
}

/// Starts decoding `buffer`.
pub fn decode(buffer: &[u8]) -> Decoder<'_> {
    Decoder { remaining: buffer }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<Tlv<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.remaining {
            [] => None,
            [tag, length, rest @ ..] if usize::from(*length) <= rest.len() => {
                let (value, rest) = rest.split_at(usize::from(*length));
                self.remaining = rest;
                Some(Ok(Tlv { tag: *tag, value }))
            }
            _ => {
                self.remaining = &[];
                Some(Err(Error::MalformedTlv))
            }
        }
    }
}

impl FusedIterator for Decoder<'_> {}

impl<'a> Decoder<'a> {
    /// True once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Takes the next record, which has to carry `tag`.
    pub fn expect(&mut self, tag: u8) -> Result<&'a [u8]> {
        match self.next() {
            Some(Ok(tlv)) if tlv.tag == tag => Ok(tlv.value),
            Some(Err(err)) => Err(err),
            _ => Err(Error::InvalidParameter),
        }
    }

    /// Takes the next record only if it carries `tag`, leaving the decoder untouched otherwise.
    pub fn optional(&mut self, tag: u8) -> Result<Option<&'a [u8]>> {
        let mut lookahead = self.clone();
        match lookahead.next() {
            Some(Ok(tlv)) if tlv.tag == tag => {
                *self = lookahead;
                Ok(Some(tlv.value))
            }
            Some(Err(err)) => Err(err),
            _ => Ok(None),
        }
    }

    /// Fails if anything is left to decode.
    pub fn finish(mut self) -> Result {
        match self.next() {
            None => Ok(()),
            Some(Err(err)) => Err(err),
            Some(Ok(_tlv)) => {
                warn_now!("unexpected trailing tag {:x}", _tlv.tag);
                Err(Error::InvalidParameter)
            }
        }
    }
}

/// Appends the record `(tag, value)` to `buffer`.
///
/// Nothing is appended if the record does not fit.
pub fn encode_into<const N: usize>(tag: u8, value: &[u8], buffer: &mut Vec<u8, N>) -> Result {
    let length = u8::try_from(value.len()).map_err(|_| Error::InvalidParameter)?;
    if buffer.capacity() - buffer.len() < value.len() + 2 {
        return Err(Error::ReplyOverflow);
    }
    buffer.extend_from_slice(&[tag, length]).map_err(|_| Error::ReplyOverflow)?;
    buffer.extend_from_slice(value).map_err(|_| Error::ReplyOverflow)
}

/// Encodes a single record into a fresh buffer.
pub fn encode(tag: u8, value: &[u8]) -> Result<Vec<u8, { MAX_VALUE_LENGTH + 2 }>> {
    let mut buffer = Vec::new();
    encode_into(tag, value, &mut buffer)?;
    Ok(buffer)
}
