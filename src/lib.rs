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

//! fpcctl - Client for the FPC fingerprint sensor daemon
//!
//! Reads and writes the sensor's control attributes through fpcd and can
//! follow the pollable ones as they change.

pub mod client;
pub mod commands;
pub mod logger;

pub use client::DaemonClient;
pub use commands::{parse_args, Command, Invocation};
