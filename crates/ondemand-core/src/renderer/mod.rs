// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Renderer module - report rendering backends.
//!
//! The renderer is an external program. It is started detached with the job's
//! working directory and reports progress only through files it writes there.

pub mod mock;
pub mod process;
mod traits;

pub use mock::MockRenderer;
pub use process::ProcessRenderer;
pub use traits::*;
