use std::io::{self, Write};

use serde::Serialize;

use crate::app::{InfoResult, LedgerResult, ProgressEvent, ProgressSink, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Console,
    Json,
}

/// Prints every progress line to stdout as it happens.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        let mut stdout = io::stdout().lock();
        let _ = match event.elapsed {
            Some(elapsed) => writeln!(
                stdout,
                "{} ({} ms)",
                event.message,
                elapsed.as_millis()
            ),
            None => writeln!(stdout, "{}", event.message),
        };
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_sync(result: &SyncResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_ledger(result: &LedgerResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
