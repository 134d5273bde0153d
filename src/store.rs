// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Credentials kept as one encrypted file each, below the `cred` directory.

use heapless::Vec;
use trussed::types::PathBuf;
use trussed::{syscall, try_syscall};

use crate::credential::{Credential, Name};
use crate::state::State;
use crate::{ensure, Client, Error, Result, MAX_CREDENTIALS};

/// What LIST reports about a credential. Never includes the secret.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListEntry {
    pub sequence: u32,
    pub name: Name,
    pub algorithm_info: [u8; 3],
}

pub type Listing = Vec<ListEntry, MAX_CREDENTIALS>;

pub struct CredentialStore<'a, T> {
    trussed: &'a mut T,
    state: &'a mut State,
}

impl<'a, T: Client> CredentialStore<'a, T> {
    pub fn new(trussed: &'a mut T, state: &'a mut State) -> Self {
        Self { trussed, state }
    }

    fn directory() -> PathBuf {
        PathBuf::from("cred")
    }

    /// `cred/` followed by the first 8 bytes of SHA-256(name) in hex.
    fn filename_for_name(&mut self, name: &[u8]) -> PathBuf {
        let name_hash = syscall!(self.trussed.hash_sha256(name)).hash;

        let mut hex_filename = [0u8; 16];
        const LOOKUP: &[u8; 16] = b"0123456789ABCDEF";
        for (i, &value) in name_hash.iter().take(8).enumerate() {
            hex_filename[2 * i] = LOOKUP[(value >> 4) as usize];
            hex_filename[2 * i + 1] = LOOKUP[(value & 0xF) as usize];
        }

        let mut path = Self::directory();
        path.push(&PathBuf::from(hex_filename.as_ref()));
        path
    }

    pub fn get(&mut self, name: &[u8]) -> Result<Credential> {
        let path = self.filename_for_name(name);
        let credential: Credential = self.state.try_read_file(self.trussed, path)?;
        if credential.name.as_slice() != name {
            warn_now!("stored name differs from the requested one");
            return Err(Error::NotFound);
        }
        Ok(credential)
    }

    pub fn contains(&mut self, name: &[u8]) -> Result<bool> {
        match self.get(name) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn count(&mut self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Inserts a new credential, or replaces the one with the same name.
    ///
    /// A replaced credential keeps its place in the listing order.
    pub fn put(&mut self, mut credential: Credential) -> Result {
        match self.get(&credential.name) {
            Ok(existing) => {
                debug_now!("overwriting {:?}", &existing);
                credential.sequence = existing.sequence;
                return self.update(&credential);
            }
            Err(Error::NotFound) => {
                if self.count()? >= MAX_CREDENTIALS {
                    return Err(Error::StorageFull);
                }
                credential.sequence =
                    self.state
                        .try_with_persistent_mut(self.trussed, |persistent| {
                            let sequence = persistent.next_sequence;
                            persistent.next_sequence =
                                sequence.checked_add(1).ok_or(Error::StorageFull)?;
                            Ok(sequence)
                        })?;
            }
            Err(err) => return Err(err),
        }

        let path = self.filename_for_name(&credential.name);
        let result = self.state.try_write_file(self.trussed, path.clone(), &credential);
        if result.is_err() {
            // only a new file is removed, never a credential that was there before
            warn_now!("failed to store {:?}: {:?}", &credential, result);
            try_syscall!(self.trussed.remove_file(self.state.location(), path)).ok();
        }
        result
    }

    /// Writes back a credential already in the store, e.g. after a counter change.
    ///
    /// On failure the previously stored version stays in place.
    pub fn update(&mut self, credential: &Credential) -> Result {
        let path = self.filename_for_name(&credential.name);
        self.state
            .try_write_file(self.trussed, path, credential)
            .map_err(|err| {
                warn_now!("failed to update {:?}: {:?}", credential, err);
                err
            })
    }

    pub fn delete(&mut self, name: &[u8]) -> Result {
        ensure(self.contains(name)?, Error::NotFound)?;
        let path = self.filename_for_name(name);
        try_syscall!(self.trussed.remove_file(self.state.location(), path))
            .map_err(|_| Error::Storage)?;
        Ok(())
    }

    /// All credentials in insertion order.
    pub fn list(&mut self) -> Result<Listing> {
        let mut listing = Listing::new();
        let location = self.state.location();
        if !self.state.file_exists(self.trussed, Self::directory())? {
            return Ok(listing);
        }

        let mut file = try_syscall!(self.trussed.read_dir_files_first(
            location,
            Self::directory(),
            None
        ))
        .map_err(|_| Error::Storage)?
        .data;

        while let Some(data) = file {
            let credential: Credential = self.state.decrypt_content(self.trussed, &data)?;
            listing
                .push(ListEntry {
                    sequence: credential.sequence,
                    algorithm_info: credential.algorithm_info(),
                    name: credential.name,
                })
                .map_err(|_| Error::Corrupted)?;
            file = try_syscall!(self.trussed.read_dir_files_next())
                .map_err(|_| Error::Storage)?
                .data;
        }

        listing.sort_unstable_by_key(|entry| entry.sequence);
        Ok(listing)
    }

    /// Removes every credential.
    pub fn reset(&mut self) -> Result {
        info_now!(":: removing all credentials");
        let location = self.state.location();
        if self.state.file_exists(self.trussed, Self::directory())? {
            try_syscall!(self.trussed.remove_dir_all(location, Self::directory()))
                .map_err(|_| Error::Storage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oath::{Algorithm, Kind, Properties};
    use trussed::types::{Location, Message};

    fn credential(name: &[u8]) -> Credential {
        Credential::new(
            name,
            Kind::Totp,
            Algorithm::Sha1,
            6,
            b"12345678901234567890",
            Properties::empty(),
            0,
        )
        .unwrap()
    }

    fn names(listing: &Listing) -> std::vec::Vec<&[u8]> {
        listing.iter().map(|entry| entry.name.as_slice()).collect()
    }

    #[test]
    fn put_get_delete() {
        trussed::virt::with_ram_client("oath", |mut client| {
            let mut state = State::new(Location::Internal);
            let mut store = CredentialStore::new(&mut client, &mut state);

            assert_eq!(store.get(b"github").unwrap_err(), Error::NotFound);
            store.put(credential(b"github")).unwrap();
            assert_eq!(store.get(b"github").unwrap().name.as_slice(), b"github");
            assert!(store.contains(b"github").unwrap());

            store.delete(b"github").unwrap();
            assert_eq!(store.get(b"github").unwrap_err(), Error::NotFound);
            assert_eq!(store.delete(b"github"), Err(Error::NotFound));
            assert_eq!(store.count().unwrap(), 0);
        })
    }

    #[test]
    fn lists_in_insertion_order_and_overwrite_keeps_position() {
        trussed::virt::with_ram_client("oath", |mut client| {
            let mut state = State::new(Location::Internal);
            let mut store = CredentialStore::new(&mut client, &mut state);

            for name in [&b"zeta"[..], &b"alpha"[..], &b"mike"[..]] {
                store.put(credential(name)).unwrap();
            }
            let mut replacement = credential(b"zeta");
            replacement.digits = 8;
            store.put(replacement).unwrap();

            let listing = store.list().unwrap();
            assert_eq!(names(&listing), [&b"zeta"[..], &b"alpha"[..], &b"mike"[..]]);
            assert_eq!(listing[0].algorithm_info, [0x21, 8, 0]);
            assert_eq!(store.get(b"zeta").unwrap().digits, 8);
        })
    }

    #[test]
    fn refuses_more_than_the_maximum() {
        trussed::virt::with_ram_client("oath", |mut client| {
            let mut state = State::new(Location::Internal);
            let mut store = CredentialStore::new(&mut client, &mut state);

            for i in 0..MAX_CREDENTIALS {
                let name = [b'c', b'0' + (i / 10) as u8, b'0' + (i % 10) as u8];
                store.put(credential(&name)).unwrap();
            }
            assert_eq!(store.put(credential(b"one more")), Err(Error::StorageFull));
            // replacing still works when full
            store.put(credential(b"c00")).unwrap();
            assert_eq!(store.count().unwrap(), MAX_CREDENTIALS);
        })
    }

    /// Writes junk files next to the credentials until no block is left.
    fn fill_filesystem(client: &mut impl trussed::client::Client) {
        let mut written = 0;
        for size in [512, 64, 8, 1] {
            let junk = Message::from_slice(&[0x55; 512][..size]).unwrap();
            for dir in ["cred/", ""] {
                loop {
                    let path = PathBuf::from(format!("{dir}junk{written}").as_str());
                    let result = try_syscall!(client.write_file(
                        Location::Internal,
                        path,
                        junk.clone(),
                        None
                    ));
                    if result.is_err() {
                        break;
                    }
                    written += 1;
                    assert!(written < 100_000, "filesystem never filled up");
                }
            }
        }
    }

    #[test]
    fn failed_writes_keep_stored_credentials() {
        trussed::virt::with_ram_client("oath", |mut client| {
            let mut state = State::new(Location::Internal);
            let mut hotp = credential(b"hotp");
            hotp.kind = Kind::Hotp;
            {
                let mut store = CredentialStore::new(&mut client, &mut state);
                store.put(credential(b"github")).unwrap();
                store.put(hotp.clone()).unwrap();
            }

            fill_filesystem(&mut client);

            let mut store = CredentialStore::new(&mut client, &mut state);
            let mut replacement = credential(b"github");
            replacement.digits = 8;
            assert_eq!(store.put(replacement), Err(Error::StorageFull));
            assert_eq!(store.get(b"github").unwrap().digits, 6);

            let mut advanced = store.get(b"hotp").unwrap();
            advanced.counter += 1;
            assert_eq!(store.update(&advanced), Err(Error::StorageFull));
            assert_eq!(store.get(b"hotp").unwrap().counter, 0);
        })
    }

    #[test]
    fn reset_removes_everything() {
        trussed::virt::with_ram_client("oath", |mut client| {
            let mut state = State::new(Location::Internal);
            let mut store = CredentialStore::new(&mut client, &mut state);

            store.put(credential(b"a")).unwrap();
            store.put(credential(b"b")).unwrap();
            store.reset().unwrap();
            assert!(store.list().unwrap().is_empty());
            store.reset().unwrap();
        })
    }
}
