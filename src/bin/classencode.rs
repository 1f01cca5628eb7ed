/*
 * SPDX-FileCopyrightText: 2024 Inria
 * SPDX-FileCopyrightText: 2024 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */
use anyhow::Result;
use clap::Parser;
use patternmodel::cli::classencode::{classencode_main, Cli};
use patternmodel::cli::init_env_logger;

pub fn main() -> Result<()> {
    init_env_logger()?;
    classencode_main(Cli::parse())
}
