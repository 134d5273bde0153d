// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Splits fuzzer input into APDU frames.
///
/// Format: size N (1 byte), then N bytes of frame, repeated.
pub fn parse(data: &[u8]) -> Vec<&[u8]> {
    let mut res = Vec::with_capacity(100);
    if data.len() < 2 || data.len() > 1024 * 1024 {
        // Too big or too small data found at this point. Skip it.
        return vec![];
    }

    let mut data = data;
    loop {
        if 2 >= data.len() {
            break;
        }
        let (size, rest) = data.split_at(1);
        data = rest;

        let size = size[0] as usize;
        if size >= data.len() {
            break;
        }
        let (v, rest) = data.split_at(size);
        data = rest;
        res.push(v);
    }
    res
}
