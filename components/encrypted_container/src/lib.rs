// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![cfg_attr(not(test), no_std)]

//! Stores serializable objects encrypted with a Trussed Chacha8Poly1305 key.

#[macro_use]
extern crate delog;
generate_macros!();

mod container;
mod error;

pub type EncryptedDataContainer = container::EncryptedDataContainer;
pub type Error = error::Error;
pub type Result<T = ()> = error::Result<T>;
