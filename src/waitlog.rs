//! Wait-log: an optional trace of every `Request::wait` call (spec §6,
//! §10.3). Grounded on STXXL's `STXXLWAITLOGFILE` (see
//! `include/stxxl/bits/defines.h`): the env var names a file, not a
//! boolean, and every wait appends one line to it.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::WAITLOG_ENV_VAR;
use crate::request::Direction;

struct WaitLog {
    file: Mutex<std::fs::File>,
}

static WAIT_LOG: OnceLock<Option<WaitLog>> = OnceLock::new();

fn global() -> &'static Option<WaitLog> {
    WAIT_LOG.get_or_init(|| {
        let path = std::env::var(WAITLOG_ENV_VAR).ok()?;
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(WaitLog { file: Mutex::new(file) }),
            Err(e) => {
                log::warn!("{WAITLOG_ENV_VAR}={path}: cannot open wait-log: {e}");
                None
            }
        }
    })
}

/// Append one `<timestamp_ns>\t<kind:R|W>\t<nanoseconds>\n` line if the
/// wait-log is enabled. A no-op (after the first lookup) when it isn't.
pub(crate) fn record(direction: Direction, elapsed_ns: u64) {
    let Some(log) = global() else { return };
    let kind = match direction {
        Direction::Read => 'R',
        Direction::Write => 'W',
    };
    let timestamp_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let line = format!("{timestamp_ns}\t{kind}\t{elapsed_ns}\n");
    let mut file = log.file.lock().unwrap();
    let _ = file.write_all(line.as_bytes());
}
