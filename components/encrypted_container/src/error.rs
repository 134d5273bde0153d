// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Error {
    /// The bytes are not a serialized container
    DeserializationToContainerError,
    /// The decrypted plaintext is not a serialized object of the requested type
    DeserializationToObjectError,
    /// The object does not fit into a message
    ObjectSerializationError,
    /// The container does not fit into a message
    ContainerSerializationError,
    FailedEncryption,
    /// Wrong key, wrong associated data, or modified contents
    FailedDecryption,
    EmptyContainerData,
    EmptyDecryptedData,
}

pub type Result<T = ()> = core::result::Result<T, Error>;

impl From<Error> for trussed::error::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::DeserializationToContainerError
            | Error::DeserializationToObjectError
            | Error::ObjectSerializationError
            | Error::ContainerSerializationError
            | Error::FailedDecryption => trussed::error::Error::InvalidSerializationFormat,
            Error::FailedEncryption => trussed::error::Error::InternalError,
            Error::EmptyContainerData | Error::EmptyDecryptedData => {
                trussed::error::Error::WrongMessageLength
            }
        }
    }
}
