#![no_main]

// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use libfuzzer_sys::fuzz_target;

mod frames;

const SELECT: &[u8] = &[
    0x00, 0xa4, 0x04, 0x00, 0x07, 0xa0, 0x00, 0x00, 0x05, 0x27, 0x20, 0x01,
];

fuzz_target!(|data: &[u8]| {
    trussed::virt::with_ram_client("oath", move |client| {
        let options = oath_app::Options::default().touch_timeout_ms(0);
        let mut oath = oath_app::Authenticator::new(client, options);

        let mut response = heapless::Vec::<u8, { 3 * 1024 }>::new();

        // start selected, most frames would be rejected otherwise
        oath.process(SELECT, &mut response);
        for frame in frames::parse(data) {
            oath.process(frame, &mut response);
        }
    })
});
