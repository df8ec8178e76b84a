//! Operator stop request.
//!
//! The ESC-key equivalent for a headless process: Ctrl-C, or an ESC / `q`
//! line typed on an interactive stdin. Polling is a single atomic load.

use anyhow::{Context, Result};
use std::io::{BufRead, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const ESC: char = '\u{1b}';

#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Route Ctrl-C to this signal. May be called once per process.
    pub fn install_ctrlc(&self) -> Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            log::info!("stop requested (Ctrl-C), finishing current cycle");
            signal.request();
        })
        .context("error setting Ctrl-C handler")
    }

    /// Watch stdin for an ESC or `q` line when it is a terminal.
    ///
    /// Returns false when stdin is not interactive and no watcher was started.
    pub fn watch_stdin(&self) -> bool {
        if !std::io::stdin().is_terminal() {
            return false;
        }
        let signal = self.clone();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if is_stop_key(&line) {
                    log::info!("stop requested from keyboard, finishing current cycle");
                    signal.request();
                    break;
                }
            }
        });
        true
    }
}

fn is_stop_key(line: &str) -> bool {
    let line = line.trim();
    line.starts_with(ESC) || line.eq_ignore_ascii_case("q")
}
