// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use nix::sys::signal::Signal;

/// Signals the supervisor forwards to the child's process group instead of
/// consuming them, so interactive key sequences behave natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardSignal {
    Int,
    Quit,
    Tstp,
    Cont,
    Term,
    Hup,
}

impl ForwardSignal {
    pub fn to_nix(self) -> Signal {
        match self {
            Self::Int => Signal::SIGINT,
            Self::Quit => Signal::SIGQUIT,
            Self::Tstp => Signal::SIGTSTP,
            Self::Cont => Signal::SIGCONT,
            Self::Term => Signal::SIGTERM,
            Self::Hup => Signal::SIGHUP,
        }
    }

    /// Whether this signal should also begin control-plane shutdown.
    ///
    /// Interactive signals (INT, QUIT, TSTP, CONT) belong to the child:
    /// they are delivered to its process group and the supervisor carries
    /// on, so Ctrl-C during a prompt behaves exactly as it would without
    /// the wrapper. Only a termination request aimed at the supervisor
    /// itself starts teardown.
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::Term | Self::Hup)
    }
}
