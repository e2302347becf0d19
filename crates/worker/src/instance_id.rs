// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted `worker_instance_id` (§6): the first line of a file under the
//! worker's data directory, created on first start if absent.

use std::io::Write;
use std::path::Path;

use crate::error::WorkerError;

pub fn load_or_create(data_dir: &Path) -> Result<String, WorkerError> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join("worker_instance_id");
    if let Ok(contents) = std::fs::read_to_string(&path) {
        if let Some(line) = contents.lines().next() {
            if !line.trim().is_empty() {
                return Ok(line.trim().to_string());
            }
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    let mut file = std::fs::File::create(&path)?;
    writeln!(file, "{id}")?;
    Ok(id)
}
