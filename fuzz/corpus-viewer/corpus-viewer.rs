// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use clap::Parser;
use std::fs;

#[path = "../fuzz_targets/frames.rs"]
mod frames;

#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    #[clap(short, long)]
    file_name: String,
}

fn main() -> std::io::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    let data = fs::read(args.file_name)?;

    trussed::virt::with_ram_client("oath", move |client| {
        let mut oath = oath_app::Authenticator::new(client, oath_app::Options::default());
        let mut response = heapless::Vec::<u8, { 3 * 1024 }>::new();

        for frame in frames::parse(data.as_ref()) {
            match iso7816::Command::<255>::try_from(frame) {
                Ok(command) => match oath_app::Command::try_from(&command) {
                    Ok(cmd) => println!(">>> {:?}", cmd),
                    Err(err) => println!(">>> (unparsed, {:?}) {:?}", err, command),
                },
                Err(_) => println!(">>> (malformed) {:02x?}", frame),
            }

            let status = oath.process(frame, &mut response);
            println!("<<< {:?} {:02x?}", status, response);
        }
    });
    Ok(())
}
