/*
 * This file is part of fpcctl.
 *
 * Copyright (C) 2025 fpc contributors
 *
 * fpcctl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fpcctl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fpcctl. If not, see <https://www.gnu.org/licenses/>.
 */

use std::io::stdout;

use fpcctl::commands::{self, Command};
use fpcctl::{logger, DaemonClient};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let invocation = match commands::parse_args(&args) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!();
            eprintln!("{}", commands::usage());
            std::process::exit(2);
        }
    };

    if invocation.command == Command::Help {
        println!("{}", commands::usage());
        return Ok(());
    }

    // Optional logging to /etc/fpc/logs.json
    if invocation.logging {
        logger::init_logging();
        logger::log_event("startup", serde_json::json!({ "args": args }));
    }

    let mut client = match DaemonClient::connect(&invocation.socket) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Is fpcd running?");
            std::process::exit(1);
        }
    };

    let mut out = stdout().lock();
    if let Err(err) = commands::run(&invocation.command, &mut client, &mut out) {
        eprintln!("error: {err:#}");
        if invocation.logging {
            logger::log_event("fatal_error", serde_json::json!({ "error": format!("{err:#}") }));
        }
        std::process::exit(1);
    }

    Ok(())
}
