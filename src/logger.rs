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

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde_json::{json, Value};

pub const DEFAULT_LOG_PATH: &str = "/etc/fpc/logs.json";
pub const FALLBACK_LOG_PATH: &str = "/tmp/fpc_logs.json";

lazy_static! {
    static ref LOG_FILE: Mutex<Option<(PathBuf, File)>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn open_append(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

pub fn init_logging() {
    init_logging_at(Path::new(DEFAULT_LOG_PATH));
}

/// Open `path` for appending, falling back to /tmp when it is not writable
pub fn init_logging_at(path: &Path) {
    let opened = open_append(path)
        .map(|f| (path.to_path_buf(), f))
        .or_else(|| {
            let fallback = Path::new(FALLBACK_LOG_PATH);
            open_append(fallback).map(|f| (fallback.to_path_buf(), f))
        });
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = opened;
    }
}

/// Where events are currently written, if logging is initialized
pub fn log_path() -> Option<PathBuf> {
    LOG_FILE
        .lock()
        .ok()
        .and_then(|guard| guard.as_ref().map(|(path, _)| path.clone()))
}

pub fn shutdown_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = None;
    }
}

pub fn log_event(event: &str, data: Value) {
    let line = json!({
        "ts_ms": now_millis(),
        "event": event,
        "data": data,
    })
    .to_string();

    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some((_, f)) = guard.as_mut() {
            let _ = writeln!(f, "{}", line);
        }
    }
}
