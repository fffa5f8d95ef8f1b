//! Ctrl+C handling.
//!
//! `ShutdownFlag` wraps a harness [`CancelToken`]; the first SIGINT cancels
//! the run so in-flight decompiler processes are killed and the remaining
//! cases are reported as interrupted.

use dmx_harness::{CancelToken, Cancellation};

#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    token: CancelToken,
}

impl ShutdownFlag {
    /// Create a flag and register the Ctrl+C handler.
    ///
    /// If a handler is already registered the flag is still returned and can
    /// be triggered manually.
    pub fn new() -> Self {
        let token = CancelToken::new();
        let handler_token = token.clone();

        // Fails only if a handler is already installed.
        let _ = ctrlc::set_handler(move || handler_token.cancel());

        Self { token }
    }

    /// Create a flag without touching process signal handlers.
    pub fn manual() -> Self {
        Self {
            token: CancelToken::new(),
        }
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }
}

impl Cancellation for ShutdownFlag {
    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
