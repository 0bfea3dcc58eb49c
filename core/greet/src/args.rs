// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

use crate::demo::Demo;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Sets a custom config file; defaults apply without one
    #[arg(short, long, value_name = "FILE", env = "GREET_CONFIG")]
    config: Option<String>,

    /// Demo scenario to run
    #[arg(short, long, value_enum, default_value_t = Demo::All)]
    demo: Demo,
}

impl Args {
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn demo(&self) -> Demo {
        self.demo
    }
}
