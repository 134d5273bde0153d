// Copyright (C) 2021-2022 The Trussed Developers
// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use encrypted_container::EncryptedDataContainer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trussed::types::{KeyId, Location, Message, PathBuf};
use trussed::{cbor_serialize_bytes, client, try_syscall};

use crate::access::PinState;
use crate::clock::Clock;
use crate::{Error, Result};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct State {
    pub runtime: Runtime,
    location: Location,
    // loaded lazily, trussed is not callable at construction time
    persistent: Option<Persistent>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Persistent {
    /// Reported in the SELECT answer, rotated on reset.
    #[serde(rename = "S")]
    pub salt: [u8; 8],
    /// Chacha8Poly1305 key protecting the credential files.
    #[serde(rename = "K")]
    pub encryption_key: KeyId,
    /// Sequence number handed to the next new credential.
    #[serde(rename = "Q")]
    pub next_sequence: u32,
    #[serde(rename = "P")]
    pub pin: PinState,
}

/// Session state, lost on power cycle.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Runtime {
    pub selected: bool,
    /// Set by a successful VALIDATE or SET_CODE, cleared when the session ends.
    pub pin_validated: bool,
    pub clock: Clock,
}

impl Runtime {
    /// Ends the session. The clock survives, it is only cleared by a reset.
    pub fn end_session(&mut self) {
        self.selected = false;
        self.pin_validated = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl State {
    const FILENAME: &'static str = "state.bin";

    pub fn new(location: Location) -> Self {
        Self {
            runtime: Default::default(),
            location,
            persistent: None,
        }
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// Drops everything kept in memory. Used after the storage has been wiped.
    pub fn forget(&mut self) {
        self.runtime.reset();
        self.persistent = None;
    }

    pub fn with_persistent<T, X>(
        &mut self,
        trussed: &mut T,
        f: impl FnOnce(&Persistent) -> X,
    ) -> Result<X>
    where
        T: client::Client + client::Chacha8Poly1305,
    {
        Ok(f(self.persistent(trussed)?))
    }

    /// Applies `f` to a copy of the persistent state and stores the result.
    ///
    /// The cached state only changes once the write succeeded.
    pub fn try_with_persistent_mut<T, X>(
        &mut self,
        trussed: &mut T,
        f: impl FnOnce(&mut Persistent) -> Result<X>,
    ) -> Result<X>
    where
        T: client::Client + client::Chacha8Poly1305,
    {
        let mut persistent = self.persistent(trussed)?.clone();
        let result = f(&mut persistent)?;
        self.save(trussed, &persistent)?;
        self.persistent = Some(persistent);
        Ok(result)
    }

    fn persistent<T>(&mut self, trussed: &mut T) -> Result<&Persistent>
    where
        T: client::Client + client::Chacha8Poly1305,
    {
        let persistent = match self.persistent.take() {
            Some(persistent) => persistent,
            None => match self.load(trussed)? {
                Some(persistent) => persistent,
                None => self.initialize(trussed)?,
            },
        };
        Ok(self.persistent.insert(persistent))
    }

    fn load<T: client::Client>(&self, trussed: &mut T) -> Result<Option<Persistent>> {
        let path = PathBuf::from(Self::FILENAME);
        match try_syscall!(trussed.read_file(self.location, path.clone())) {
            Ok(response) => trussed::cbor_deserialize(&response.data)
                .map(Some)
                .map_err(|_err| {
                    error_now!("failed to deserialize the state: {:?}", _err);
                    Error::Corrupted
                }),
            Err(_) => {
                if self.file_exists(trussed, path)? {
                    error_now!("state file exists but cannot be read");
                    Err(Error::Storage)
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn initialize<T>(&self, trussed: &mut T) -> Result<Persistent>
    where
        T: client::Client + client::Chacha8Poly1305,
    {
        info_now!("initializing the persistent state");
        let salt: [u8; 8] = try_syscall!(trussed.random_bytes(8))
            .map_err(|_| Error::Storage)?
            .bytes
            .as_ref()
            .try_into()
            .map_err(|_| Error::Storage)?;
        let encryption_key = try_syscall!(trussed.generate_chacha8poly1305_key(self.location))
            .map_err(|_| Error::Storage)?
            .key;
        let persistent = Persistent {
            salt,
            encryption_key,
            next_sequence: 0,
            pin: PinState::default(),
        };
        self.save(trussed, &persistent)?;
        Ok(persistent)
    }

    fn save<T: client::Client>(&self, trussed: &mut T, persistent: &Persistent) -> Result {
        let data: Message = cbor_serialize_bytes(persistent).map_err(|_| Error::Storage)?;
        try_syscall!(trussed.write_file(self.location, PathBuf::from(Self::FILENAME), data, None))
            .map_err(|_err| {
                warn_now!("failed to write the state: {:?}", _err);
                Error::Storage
            })?;
        Ok(())
    }

    pub fn file_exists<T: client::Client>(&self, trussed: &mut T, path: PathBuf) -> Result<bool> {
        Ok(try_syscall!(trussed.entry_metadata(self.location, path))
            .map_err(|_| Error::Storage)?
            .metadata
            .is_some())
    }

    /// Encrypts `obj` with the storage key and writes it to `path`.
    pub fn try_write_file<T, O>(&mut self, trussed: &mut T, path: PathBuf, obj: &O) -> Result
    where
        T: client::Client + client::Chacha8Poly1305,
        O: Serialize,
    {
        let key = self.with_persistent(trussed, |persistent| persistent.encryption_key)?;
        let container = EncryptedDataContainer::from_obj(trussed, obj, None, key).map_err(|_err| {
            error!("error encrypting object: {:?}", _err);
            Error::Storage
        })?;
        let data: Message = container.try_into().map_err(|_err| {
            error!("error serializing container: {:?}", _err);
            Error::Storage
        })?;
        debug_now!("container size: {}", data.len());
        try_syscall!(trussed.write_file(self.location, path, data, None)).map_err(|_err| {
            warn_now!("failed to write the file: {:?}", _err);
            Error::StorageFull
        })?;
        Ok(())
    }

    /// Reads and decrypts the object at `path`. A missing file is [`Error::NotFound`].
    pub fn try_read_file<T, O>(&mut self, trussed: &mut T, path: PathBuf) -> Result<O>
    where
        T: client::Client + client::Chacha8Poly1305,
        O: DeserializeOwned,
    {
        if !self.file_exists(trussed, path.clone())? {
            return Err(Error::NotFound);
        }
        let data = try_syscall!(trussed.read_file(self.location, path))
            .map_err(|_| Error::Storage)?
            .data;
        self.decrypt_content(trussed, &data)
    }

    pub fn decrypt_content<T, O>(&mut self, trussed: &mut T, data: &[u8]) -> Result<O>
    where
        T: client::Client + client::Chacha8Poly1305,
        O: DeserializeOwned,
    {
        let key = self.with_persistent(trussed, |persistent| persistent.encryption_key)?;
        EncryptedDataContainer::decrypt_from_bytes(trussed, data, key).map_err(|_err| {
            error_now!("failed to decrypt a stored object: {:?}", _err);
            Error::Corrupted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trussed::syscall;

    #[test]
    fn persistent_state_is_created_once_and_reloaded() {
        trussed::virt::with_ram_client("oath", |mut client| {
            let mut state = State::new(Location::Internal);
            let first = state.with_persistent(&mut client, |p| p.clone()).unwrap();

            let mut reloaded = State::new(Location::Internal);
            let second = reloaded.with_persistent(&mut client, |p| p.clone()).unwrap();
            assert_eq!(first, second);
        })
    }

    #[test]
    fn failed_update_keeps_the_cache() {
        trussed::virt::with_ram_client("oath", |mut client| {
            let mut state = State::new(Location::Internal);
            let result: Result = state.try_with_persistent_mut(&mut client, |persistent| {
                persistent.next_sequence = 10;
                Err(Error::InvalidParameter)
            });
            assert_eq!(result, Err(Error::InvalidParameter));
            let sequence = state
                .with_persistent(&mut client, |persistent| persistent.next_sequence)
                .unwrap();
            assert_eq!(sequence, 0);
        })
    }

    #[test]
    fn garbage_state_is_reported_as_corrupted() {
        trussed::virt::with_ram_client("oath", |mut client| {
            syscall!(client.write_file(
                Location::Internal,
                PathBuf::from("state.bin"),
                Message::from_slice(&[0xff, 0xff]).unwrap(),
                None
            ));
            let mut state = State::new(Location::Internal);
            assert_eq!(
                state.with_persistent(&mut client, |_| ()),
                Err(Error::Corrupted)
            );
        })
    }

    #[test]
    fn encrypted_files_round_trip_and_report_missing() {
        trussed::virt::with_ram_client("oath", |mut client| {
            let mut state = State::new(Location::Internal);
            let path = PathBuf::from("object");
            let missing: Result<u32> = state.try_read_file(&mut client, path.clone());
            assert_eq!(missing, Err(Error::NotFound));

            state.try_write_file(&mut client, path.clone(), &42u32).unwrap();
            let read: u32 = state.try_read_file(&mut client, path).unwrap();
            assert_eq!(read, 42);
        })
    }
}
