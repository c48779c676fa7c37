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

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use serde_json::json;

use fpc_core::constants::paths;
use fpc_error::FpcError;
use fpc_protocol::{Attribute, DeviceStatus, MAX_WAIT_TIMEOUT_MS};

use crate::client::DaemonClient;
use crate::logger;

/// Per-request timeout used by `watch`
pub const WATCH_TIMEOUT_MS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Ping,
    Version,
    Read(Attribute),
    Write(Attribute, String),
    /// Print every change; stop after `count` changes when given
    Watch { attribute: Attribute, count: Option<u64> },
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub socket: PathBuf,
    pub logging: bool,
    pub command: Command,
}

pub fn usage() -> String {
    let names: Vec<&str> = Attribute::ALL.iter().map(|a| a.name()).collect();
    format!(
        "USAGE:\n    fpcctl [--socket PATH] [--logging] <COMMAND>\n\n\
         COMMANDS:\n    status\n    ping\n    version\n    read <attr>\n    \
         write <attr> <value>\n    watch <attr> [--count N]\n\n\
         ATTRIBUTES:\n    {}",
        names.join(", ")
    )
}

fn attribute(arg: Option<&String>) -> Result<Attribute, String> {
    let name = arg.ok_or("missing attribute name")?;
    Attribute::from_name(name).ok_or_else(|| format!("unknown attribute '{}'", name))
}

/// Parse everything after the program name
pub fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut socket = PathBuf::from(paths::SOCKET_PATH);
    let mut logging = false;
    let mut positional: Vec<String> = Vec::new();
    let mut count = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-s" | "--socket" => {
                i += 1;
                socket = PathBuf::from(args.get(i).ok_or("--socket requires a path")?);
            }
            "--logging" => logging = true,
            "-n" | "--count" => {
                i += 1;
                let n = args.get(i).ok_or("--count requires a number")?;
                count = Some(n.parse::<u64>().map_err(|_| format!("invalid count '{}'", n))?);
            }
            "-h" | "--help" => positional = vec!["help".into()],
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let command = match positional.first().map(String::as_str) {
        None | Some("help") => Command::Help,
        Some("status") => Command::Status,
        Some("ping") => Command::Ping,
        Some("version") => Command::Version,
        Some("read") => Command::Read(attribute(positional.get(1))?),
        Some("write") => {
            let attr = attribute(positional.get(1))?;
            let value = positional.get(2).ok_or("missing value")?;
            Command::Write(attr, value.clone())
        }
        Some("watch") => Command::Watch {
            attribute: attribute(positional.get(1))?,
            count,
        },
        Some(other) => return Err(format!("unknown command '{}'", other)),
    };

    Ok(Invocation { socket, logging, command })
}

pub fn format_status(status: &DeviceStatus) -> String {
    format!(
        "irq:              {}\n\
         screen_state:     {}\n\
         sensor_version:   {}\n\
         sensor_identity:  {}\n\
         component_info:   {}\n\
         esd home guard:   {}\n\
         wake lease:       {}\n\
         interrupts:       {}\n\
         generations:      irq={} screen_state={}",
        status.irq_level,
        status.display_on as u8,
        status.sensor_version,
        status.sensor_identity,
        status.component_info,
        if status.ignore_home_for_esd { "on" } else { "off" },
        if status.wake_lease_held { "held" } else { "released" },
        status.interrupts,
        status.irq_generation,
        status.screen_state_generation,
    )
}

fn current_generation(status: &DeviceStatus, attribute: Attribute) -> u64 {
    match attribute {
        Attribute::ScreenState => status.screen_state_generation,
        _ => status.irq_generation,
    }
}

/// Run one command against a connected daemon
pub fn run(command: &Command, client: &mut DaemonClient, out: &mut dyn Write) -> anyhow::Result<()> {
    match command {
        Command::Help => writeln!(out, "{}", usage())?,
        Command::Ping => writeln!(out, "{}", client.ping()?)?,
        Command::Version => writeln!(out, "fpcd {}", client.version()?)?,
        Command::Status => writeln!(out, "{}", format_status(&client.status()?))?,
        Command::Read(attr) => write!(out, "{}", client.read(*attr)?)?,
        Command::Write(attr, value) => {
            let written = client
                .write(*attr, value)
                .with_context(|| format!("write to {} failed", attr))?;
            logger::log_event(
                "write",
                json!({ "attribute": attr.name(), "value": value, "written": written }),
            );
        }
        Command::Watch { attribute, count } => {
            if !attribute.is_pollable() {
                bail!("{} does not notify changes", attribute);
            }
            let mut seen = current_generation(&client.status()?, *attribute);
            let mut printed = 0u64;
            while count.map_or(true, |c| printed < c) {
                match client.wait(*attribute, seen, WATCH_TIMEOUT_MS.min(MAX_WAIT_TIMEOUT_MS)) {
                    Ok((generation, value)) => {
                        // More than one publish may have been folded into this wake
                        let missed = generation.saturating_sub(seen + 1);
                        seen = generation;
                        printed += 1;
                        if missed > 0 {
                            writeln!(out, "{} {} (+{} coalesced)", generation, value.trim_end(), missed)?;
                        } else {
                            writeln!(out, "{} {}", generation, value.trim_end())?;
                        }
                        out.flush()?;
                        logger::log_event(
                            "notify",
                            json!({ "attribute": attribute.name(), "generation": generation }),
                        );
                    }
                    Err(FpcError::Timeout(_)) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
    Ok(())
}
