// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Log tailing for `node logs` and failure reports.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

/// Upper bound on how much of the file end we read when tailing.
const TAIL_WINDOW: u64 = 64 * 1024;

/// Return the last `lines` lines of the file at `path`.
///
/// Only the trailing window of a large log is read; a line cut in half by
/// the window boundary is dropped rather than returned truncated.
pub fn tail_log(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let clipped = len > TAIL_WINDOW;
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = String::new();
    file.read_to_string(&mut buf)?;

    let mut all: Vec<&str> = buf.lines().collect();
    if clipped && !all.is_empty() {
        all.remove(0);
    }
    let skip = all.len().saturating_sub(lines);
    Ok(all[skip..].iter().map(|l| l.to_string()).collect())
}
