use std::io::{self, IsTerminal};

use crate::RequestedColorMode;

pub(crate) mod chat;
pub(crate) mod list;

/// Whether diagnostics on standard error are painted. Completion text on
/// standard output is always written as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColorMode {
    On,
    Off,
}

impl ColorMode {
    /// Settle `--color auto` against the environment of this process.
    pub(crate) fn resolve_auto(requested: RequestedColorMode) -> ColorMode {
        Self::settle(
            requested,
            std::env::var_os("NO_COLOR").is_some(),
            io::stderr().is_terminal(),
        )
    }

    fn settle(requested: RequestedColorMode, no_color: bool, stderr_tty: bool) -> ColorMode {
        match requested {
            RequestedColorMode::On => ColorMode::On,
            RequestedColorMode::Off => ColorMode::Off,
            // NO_COLOR only matters when nothing was asked for explicitly
            RequestedColorMode::Auto if no_color || !stderr_tty => ColorMode::Off,
            RequestedColorMode::Auto => ColorMode::On,
        }
    }
}
