// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod nbio;
pub mod spawn;
pub mod stdio;

pub use spawn::{ExitStatus, PtyHost, ShimChannel, SpawnOptions};
