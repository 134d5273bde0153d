// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use cbor_smol::cbor_deserialize;
use heapless_bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trussed::client::Chacha8Poly1305;
use trussed::types::{KeyId, Message};
use trussed::{cbor_serialize_bytes, try_syscall};

use crate::{Error, Result};

type ContainerTag = Bytes<16>;
type ContainerNonce = Bytes<12>;

/// AEAD encrypted data container, using CBOR and Chacha8Poly1305
///
/// The object is serialized with CBOR and encrypted with Chacha8Poly1305 through Trussed.
/// The ciphertext is stored together with its nonce and tag, and this record is serialized
/// with CBOR again:
///
/// T -> \[u8\]: object -> CBOR -> encryption -> container -> CBOR
///
/// \[u8\] -> T: CBOR -> container -> decryption -> CBOR -> object
///
/// Field names are single letters to keep the CBOR overhead small. A 48 byte plaintext
/// takes about 87 bytes once stored: 28 bytes of nonce and tag, and 11 bytes of CBOR framing.
///
/// ```
/// # use trussed::client::{Chacha8Poly1305, Client};
/// # use trussed::types::{KeyId, Message};
/// # use encrypted_container::EncryptedDataContainer;
/// fn encrypt_unit<T: Client + Chacha8Poly1305>(trussed: &mut T, ek: KeyId) -> Message {
///     let data = EncryptedDataContainer::from_obj(trussed, &(), None, ek).unwrap();
///     data.try_into().unwrap()
/// }
/// ```
#[derive(Debug, Deserialize, Serialize)]
pub struct EncryptedDataContainer {
    #[serde(rename = "D")]
    data: Message,
    #[serde(rename = "T")]
    tag: ContainerTag,
    #[serde(rename = "N")]
    nonce: ContainerNonce,
}

impl TryFrom<&[u8]> for EncryptedDataContainer {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        cbor_deserialize(value).map_err(|_| Error::DeserializationToContainerError)
    }
}

impl TryFrom<EncryptedDataContainer> for Message {
    type Error = Error;

    fn try_from(value: EncryptedDataContainer) -> Result<Self> {
        cbor_serialize_bytes(&value).map_err(|_| Error::ContainerSerializationError)
    }
}

impl EncryptedDataContainer {
    /// Serializes and encrypts `obj`. `associated_data` is authenticated but not stored.
    pub fn from_obj<T, O>(
        trussed: &mut T,
        obj: &O,
        associated_data: Option<&[u8]>,
        encryption_key: KeyId,
    ) -> Result<Self>
    where
        T: trussed::Client + Chacha8Poly1305,
        O: Serialize,
    {
        let message: Message =
            cbor_serialize_bytes(obj).map_err(|_| Error::ObjectSerializationError)?;
        Self::encrypt_message(trussed, &message, associated_data, encryption_key)
    }

    fn encrypt_message<T>(
        trussed: &mut T,
        message: &[u8],
        associated_data: Option<&[u8]>,
        encryption_key: KeyId,
    ) -> Result<Self>
    where
        T: trussed::Client + Chacha8Poly1305,
    {
        let encrypted = try_syscall!(trussed.encrypt_chacha8poly1305(
            encryption_key,
            message,
            associated_data.unwrap_or_default(),
            None
        ))
        .map_err(|_err| {
            error!("encryption failed: {:?}", _err);
            Error::FailedEncryption
        })?;

        Ok(Self {
            data: encrypted.ciphertext,
            tag: Bytes::from_slice(&encrypted.tag).map_err(|_| Error::FailedEncryption)?,
            nonce: Bytes::from_slice(&encrypted.nonce).map_err(|_| Error::FailedEncryption)?,
        })
    }

    /// Deserializes the container from `ser_encrypted` and decrypts the object inside.
    pub fn decrypt_from_bytes<T, O>(
        trussed: &mut T,
        ser_encrypted: &[u8],
        encryption_key: KeyId,
    ) -> Result<O>
    where
        T: trussed::Client + Chacha8Poly1305,
        O: DeserializeOwned,
    {
        let container = EncryptedDataContainer::try_from(ser_encrypted)?;
        container.decrypt(trussed, None, encryption_key)
    }

    /// Decrypts the object. Fails if the key, the associated data or the contents do not match.
    pub fn decrypt<T, O>(
        &self,
        trussed: &mut T,
        associated_data: Option<&[u8]>,
        encryption_key: KeyId,
    ) -> Result<O>
    where
        T: trussed::Client + Chacha8Poly1305,
        O: DeserializeOwned,
    {
        ensure_not_empty(&self.data)?;
        let plaintext = try_syscall!(trussed.decrypt_chacha8poly1305(
            encryption_key,
            &self.data,
            associated_data.unwrap_or_default(),
            &self.nonce,
            &self.tag
        ))
        .map_err(|_err| {
            debug_now!("decryption failed: {:?}", _err);
            Error::FailedDecryption
        })?
        .plaintext
        .ok_or(Error::FailedDecryption)?;

        ensure_not_empty(&plaintext).map_err(|_| Error::EmptyDecryptedData)?;
        cbor_deserialize(&plaintext).map_err(|_| Error::DeserializationToObjectError)
    }
}

fn ensure_not_empty(data: &[u8]) -> Result {
    match data.is_empty() {
        true => Err(Error::EmptyContainerData),
        false => Ok(()),
    }
}
