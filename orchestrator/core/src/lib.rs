// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

//! Vigil orchestrator core: a durable six-phase automation cycle
//! (Detection, Analysis, Planning, Execution, Reporting, Learning) over
//! arbitrary domain data, with a human approval gate between Planning and
//! Execution.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
