// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: background runtime for sync loops
//!
//! ## Overview
//! Job sets do not bring their own executor. Anything implementing
//! `futures::task::Spawn` can host their sync loops; this module provides one
//! that lives on a dedicated thread, so agents without an async main loop can
//! still run job sets.
//!
//! - Tasks are handed over through an unbounded channel (no backpressure).
//! - A single intake loop moves them onto a `LocalPool`.
//! - Closing the runtime only stops the intake. Tasks already running are never
//!   cancelled, they are expected to shut down cooperatively.
//! - `wait_until_finished` joins the thread once every task has returned.
//!
//! ```text
//!         +------------------+      spawn_obj
//!         |  caller threads  | -------------------+
//!         +------------------+                    |
//!                                                 v
//!         +---------------------------------------+-----+
//!         |   runtime thread:  intake loop -> LocalPool  |
//!         +----+--------------------+-------------------+
//!              |                    |
//!         +----v-----+         +----v-----+
//!         | sync A   |         | sync B   |
//!         +----------+         +----------+
//! ```

pub mod background;

pub use background::BackgroundRuntime;
