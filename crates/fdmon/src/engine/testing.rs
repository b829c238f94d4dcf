// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{Read, Write};

use crate::{ChannelPair, Config, EngineKind};

pub(crate) fn config_for(
    engine: EngineKind,
    num_fds: usize,
    msg_size: usize,
    exclusive: bool,
) -> Config {
    Config::builder()
        .with_engine(engine)
        .with_num_fds(num_fds)
        .with_msg_size(msg_size)
        .with_exclusive(exclusive)
        .build()
        .unwrap()
}

/// Sends `count` messages of `msg_size` bytes through the pair and checks every echo.
pub(crate) fn assert_round_trips(pair: &ChannelPair, msg_size: usize, count: usize) {
    let mut echoed = vec![0_u8; msg_size];

    for round in 0..count {
        #[expect(clippy::cast_possible_truncation, reason = "wrapping pattern is intended")]
        let message: Vec<u8> = (0..msg_size).map(|i| (i + round) as u8).collect();

        pair.generator().write_all(&message).unwrap();
        pair.generator().read_exact(&mut echoed).unwrap();

        assert_eq!(echoed, message, "echo mismatch in round {round}");
    }
}
