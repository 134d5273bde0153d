// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use flexiber::{Encodable, EncodableHeapless};
use iso7816::{Data, Status};
use trussed::types::{consent, Location, PathBuf};
use trussed::{syscall, try_syscall};

use crate::command::{self, Command, Operation};
use crate::oath::{self, Kind, Tag};
use crate::state::State;
use crate::store::CredentialStore;
use crate::{calculate, ensure, tlv, Client, Error, Result};

/// Which commands need a validated session once a PIN is set.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PinPolicy {
    /// PUT, DELETE and SET_CODE. LIST, CALCULATE and TIME_SYNC stay available.
    #[default]
    MutatingCommands,
    /// Everything except SELECT, VALIDATE and RESET.
    AllCommands,
}

/// The options for the authenticator app.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct Options {
    /// The storage location for the application data (default: internal).
    pub location: Location,

    /// Commands guarded by the PIN (default: the mutating ones).
    pub pin_policy: PinPolicy,

    /// How long to wait for the user to confirm presence.
    pub touch_timeout_ms: u32,

    /// Ask for user presence before a RESET (default: no).
    pub confirm_reset: bool,
}

impl Options {
    /// Defaults for everything but the storage location.
    pub const fn new(location: Location) -> Self {
        Self {
            location,
            pin_policy: PinPolicy::MutatingCommands,
            touch_timeout_ms: crate::UP_TIMEOUT_MILLISECONDS,
            confirm_reset: false,
        }
    }

    /// Sets [`Options::pin_policy`].
    pub const fn pin_policy(mut self, pin_policy: PinPolicy) -> Self {
        self.pin_policy = pin_policy;
        self
    }

    /// Sets [`Options::touch_timeout_ms`].
    pub const fn touch_timeout_ms(mut self, touch_timeout_ms: u32) -> Self {
        self.touch_timeout_ms = touch_timeout_ms;
        self
    }

    /// Sets [`Options::confirm_reset`].
    pub const fn confirm_reset(mut self, confirm_reset: bool) -> Self {
        self.confirm_reset = confirm_reset;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(Location::Internal)
    }
}

/// The OATH authenticator Trussed app.
pub struct Authenticator<T> {
    options: Options,
    state: State,
    trussed: T,
}

impl<T> core::fmt::Debug for Authenticator<T> {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::result::Result<(), core::fmt::Error> {
        fmt.debug_struct("Authenticator")
            .field("options", &self.options)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
struct OathVersion {
    major: u8,
    minor: u8,
    patch: u8,
}

impl Default for OathVersion {
    /// For ykman, 4.2.6 is the first version to support "touch" requirement
    fn default() -> Self {
        OathVersion {
            major: 4,
            minor: 4,
            patch: 0,
        }
    }
}

impl flexiber::Encodable for OathVersion {
    fn encoded_length(&self) -> flexiber::Result<flexiber::Length> {
        Ok(3u8.into())
    }
    fn encode(&self, encoder: &mut flexiber::Encoder) -> flexiber::Result<()> {
        let buf = [self.major, self.minor, self.patch];
        buf.as_ref().encode(encoder)
    }
}

// 79 03 04 04 00  71 08 26 9F 14 54 3A 0E C7 AC  90 00
#[derive(Clone, Copy, Encodable, Eq, PartialEq)]
struct AnswerToSelect {
    #[tlv(simple = "0x79")] // Tag::Version
    version: OathVersion,
    #[tlv(simple = "0x71")] // Tag::Name
    salt: [u8; 8],
}

// The derive cannot leave out a None field, hence a second answer with the counter.
#[derive(Clone, Copy, Encodable, Eq, PartialEq)]
struct PinAnswerToSelect {
    #[tlv(simple = "0x79")] // Tag::Version
    version: OathVersion,
    #[tlv(simple = "0x71")] // Tag::Name
    salt: [u8; 8],
    #[tlv(simple = "0x82")] // Tag::PinCounter
    attempt_counter: [u8; 1],
}

impl AnswerToSelect {
    /// The salt is stable and used in modified form as "device ID" in ykman.
    /// It gets rotated on device reset.
    fn new(salt: [u8; 8]) -> Self {
        Self {
            version: Default::default(),
            salt,
        }
    }

    fn with_pin_attempt_counter(self, remaining: u8) -> PinAnswerToSelect {
        PinAnswerToSelect {
            version: self.version,
            salt: self.salt,
            attempt_counter: [remaining],
        }
    }
}

impl<T: Client> Authenticator<T> {
    /// Nothing is read from storage until the first command.
    pub fn new(trussed: T, options: Options) -> Self {
        Self {
            state: State::new(options.location),
            trussed,
            options,
        }
    }

    /// True between a successful SELECT and the end of the session.
    pub fn is_selected(&self) -> bool {
        self.state.runtime.selected
    }

    /// Ends the session, e.g. when the transport selects another application.
    ///
    /// The PIN has to be validated again in the next session.
    pub fn end_session(&mut self) {
        debug_now!(":: end of session");
        self.state.runtime.end_session();
    }

    /// Handles a single parsed APDU, appending the response payload to `reply`.
    ///
    /// On failure `reply` is left as it was and the status word is returned.
    pub fn respond<const C: usize, const R: usize>(
        &mut self,
        command: &iso7816::Command<C>,
        reply: &mut Data<R>,
    ) -> iso7816::Result<()> {
        let reply_length = reply.len();
        self.inner_respond(command, reply).map_err(|error| {
            reply.truncate(reply_length);
            self.handle_error(error)
        })
    }

    /// Handles a raw APDU frame. `response` receives the payload followed by SW1 SW2.
    pub fn process<const R: usize>(
        &mut self,
        apdu: &[u8],
        response: &mut heapless::Vec<u8, R>,
    ) -> Status {
        response.clear();
        let mut status = match iso7816::Command::<{ crate::MAX_COMMAND_DATA_LENGTH }>::try_from(apdu)
        {
            Ok(command) => match self.respond(&command, response) {
                Ok(()) => Status::Success,
                Err(status) => status,
            },
            Err(_) => {
                warn_now!("malformed APDU of {} bytes", apdu.len());
                Error::MalformedApdu.into()
            }
        };
        if response.capacity() - response.len() < 2 {
            response.clear();
            status = Error::ReplyOverflow.into();
        }
        let sw: [u8; 2] = status.into();
        response.extend_from_slice(&sw).ok();
        status
    }

    fn handle_error(&mut self, error: Error) -> Status {
        if error == Error::Corrupted {
            error_now!("stored data is corrupted, wiping the application");
            if let Err(_err) = self.wipe() {
                error_now!("wipe after corruption failed: {:?}", _err);
            }
        } else {
            info_now!("command failed: {:?}", error);
        }
        error.into()
    }

    fn inner_respond<const C: usize, const R: usize>(
        &mut self,
        command: &iso7816::Command<C>,
        reply: &mut Data<R>,
    ) -> Result {
        let instruction = oath::Instruction::try_from(u8::from(command.instruction()))?;
        command::check_class(command.class())?;
        if instruction != oath::Instruction::Select {
            ensure(self.state.runtime.selected, Error::AppNotSelected)?;
        }

        let operation = Operation::from_header(instruction, command.p1, command.p2)?;
        self.check_pin_policy(operation)?;

        let command = Command::parse(operation, command.data())?;
        info_now!("{:?}", &command);

        match command {
            Command::Select => self.select(reply),
            Command::Put(put) => self.store().put(put.credential),
            Command::Delete(delete) => self.store().delete(delete.name),
            Command::List(list) => self.list(list, reply),
            Command::Calculate(calculate) => self.calculate(calculate, reply),
            Command::SetCode(set_code) => self.set_code(set_code),
            Command::Validate(validate) => self.validate(validate),
            Command::Reset => self.reset(),
            Command::TimeSync(time_sync) => self.time_sync(time_sync),
        }
    }

    fn check_pin_policy(&mut self, operation: Operation) -> Result {
        let guarded = operation.is_mutating()
            || (self.options.pin_policy == PinPolicy::AllCommands
                && matches!(
                    operation,
                    Operation::List | Operation::Calculate | Operation::TimeSync
                ));
        if !guarded || self.state.runtime.pin_validated {
            return Ok(());
        }
        let pin_set = self
            .state
            .with_persistent(&mut self.trussed, |persistent| persistent.pin.is_set())?;
        ensure(!pin_set, Error::PinRequired)
    }

    fn store(&mut self) -> CredentialStore<'_, T> {
        CredentialStore::new(&mut self.trussed, &mut self.state)
    }

    fn select<const R: usize>(&mut self, reply: &mut Data<R>) -> Result {
        let (salt, remaining) = self.state.with_persistent(&mut self.trussed, |persistent| {
            let remaining = persistent
                .pin
                .is_set()
                .then(|| persistent.pin.remaining_attempts());
            (persistent.salt, remaining)
        })?;

        let answer_to_select = AnswerToSelect::new(salt);
        let data: heapless::Vec<u8, 32> = match remaining {
            Some(remaining) => answer_to_select
                .with_pin_attempt_counter(remaining)
                .to_heapless_vec(),
            None => answer_to_select.to_heapless_vec(),
        }
        .map_err(|_| Error::ReplyOverflow)?;
        reply
            .extend_from_slice(&data)
            .map_err(|_| Error::ReplyOverflow)?;

        self.state.runtime.selected = true;
        self.state.runtime.pin_validated = false;
        Ok(())
    }

    fn list<const R: usize>(&mut self, list: command::List, reply: &mut Data<R>) -> Result {
        let listing = self.store().list()?;
        debug_now!("listing {} credentials", listing.len());
        for entry in listing {
            tlv::encode_into(Tag::Name.into(), &entry.name, reply)?;
            if list.version >= 1 {
                tlv::encode_into(Tag::Algorithm.into(), &entry.algorithm_info, reply)?;
            }
        }
        Ok(())
    }

    fn calculate<const R: usize>(
        &mut self,
        calculate: command::Calculate<'_>,
        reply: &mut Data<R>,
    ) -> Result {
        let mut credential = self.store().get(calculate.name)?;
        if credential.touch_required {
            self.user_present()?;
        }

        let counter = match credential.kind {
            Kind::Totp => {
                let timestamp = match calculate.timestamp {
                    Some(timestamp) => timestamp,
                    None => self.now()?,
                };
                calculate::totp_counter(timestamp)
            }
            Kind::Hotp => {
                // the new counter is stored before the code leaves the device
                let counter = credential.counter;
                credential.counter = counter.checked_add(1).ok_or(Error::Storage)?;
                self.store().update(&credential)?;
                counter
            }
        };

        let code = calculate::hotp(
            &mut self.trussed,
            credential.algorithm,
            &credential.secret,
            counter,
            credential.digits,
        )?;
        tlv::encode_into(Tag::Response.into(), &code, reply)
    }

    fn hash_pin(&mut self, pin: &[u8]) -> Result<crate::access::PinDigest> {
        let hash = try_syscall!(self.trussed.hash_sha256(pin))
            .map_err(|_| Error::Storage)?
            .hash;
        hash.as_slice().try_into().map_err(|_| Error::Storage)
    }

    fn set_code(&mut self, set_code: command::SetCode<'_>) -> Result {
        let digest = self.hash_pin(set_code.pin)?;
        self.state
            .try_with_persistent_mut(&mut self.trussed, |persistent| {
                persistent.pin.set(&digest);
                Ok(())
            })?;
        info_now!("PIN set");
        self.state.runtime.pin_validated = true;
        Ok(())
    }

    fn validate(&mut self, validate: command::Validate<'_>) -> Result {
        let digest = self.hash_pin(validate.pin)?;
        self.state.runtime.pin_validated = false;

        // count the attempt before comparing, so a power cut does not refund it
        self.state
            .try_with_persistent_mut(&mut self.trussed, |persistent| {
                persistent.pin.check_can_attempt()?;
                persistent.pin.record_failure();
                Ok(())
            })?;

        let mismatch = self.state.with_persistent(&mut self.trussed, |persistent| {
            (!persistent.pin.matches(&digest)).then(|| persistent.pin.mismatch_error())
        })?;
        if let Some(error) = mismatch {
            warn_now!("wrong PIN");
            return Err(error);
        }

        self.state
            .try_with_persistent_mut(&mut self.trussed, |persistent| {
                persistent.pin.clear_failures();
                Ok(())
            })?;
        self.state.runtime.pin_validated = true;
        Ok(())
    }

    fn time_sync(&mut self, time_sync: command::TimeSync) -> Result {
        let uptime = self.uptime()?;
        self.state.runtime.clock.sync(time_sync.timestamp, uptime);
        debug_now!("clock set to {}", time_sync.timestamp);
        Ok(())
    }

    fn now(&mut self) -> Result<u64> {
        if !self.state.runtime.clock.is_synced() {
            warn_now!("clock not set, TOTP uses timestamp 0");
        }
        let uptime = self.uptime()?;
        Ok(self.state.runtime.clock.now(uptime))
    }

    fn uptime(&mut self) -> Result<core::time::Duration> {
        Ok(try_syscall!(self.trussed.uptime())
            .map_err(|_| Error::Storage)?
            .uptime)
    }

    fn reset(&mut self) -> Result {
        if self.options.confirm_reset {
            self.user_present()?;
        }
        self.wipe()
    }

    /// Removes credentials, PIN, salt and keys, and ends the session.
    fn wipe(&mut self) -> Result {
        let result = self.wipe_storage();
        self.state.forget();
        debug_now!(":: reset over");
        result
    }

    fn wipe_storage(&mut self) -> Result {
        self.store().reset()?;

        // Remove potential missed remains for the extra care
        for loc in [Location::Volatile, self.options.location] {
            info_now!(":: reset - delete all keys and files in {:?}", loc);
            try_syscall!(self.trussed.delete_all(loc)).map_err(|_| Error::Storage)?;
            try_syscall!(self.trussed.remove_dir_all(loc, PathBuf::new()))
                .map_err(|_| Error::Storage)?;
        }
        Ok(())
    }

    fn user_present(&mut self) -> Result {
        let result = syscall!(self
            .trussed
            .confirm_user_present(self.options.touch_timeout_ms))
        .result;
        result.map_err(presence_error)
    }
}

/// A touch that never came is a timeout, anything else counts as a refusal.
fn presence_error(err: consent::Error) -> Error {
    match err {
        consent::Error::TimedOut => Error::TouchTimeout,
        _ => Error::TouchRequired,
    }
}

impl<T> iso7816::App for Authenticator<T> {
    fn aid(&self) -> iso7816::Aid {
        iso7816::Aid::new(crate::OATH_AID)
    }
}

#[cfg(feature = "apdu-dispatch")]
impl<T, const C: usize, const R: usize> apdu_dispatch::app::App<C, R> for Authenticator<T>
where
    T: Client,
{
    fn select(&mut self, apdu: &iso7816::Command<C>, reply: &mut Data<R>) -> iso7816::Result<()> {
        self.respond(apdu, reply)
    }

    fn deselect(&mut self) {
        self.end_session()
    }

    fn call(
        &mut self,
        _: iso7816::Interface,
        apdu: &iso7816::Command<C>,
        reply: &mut Data<R>,
    ) -> iso7816::Result<()> {
        self.respond(apdu, reply)
    }
}
