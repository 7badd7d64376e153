/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte, a cross-platform email client.
 *
 * Tagliacarte is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tagliacarte is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tagliacarte.  If not, see <http://www.gnu.org/licenses/>.
 */

//! ManageSieve protocol: wire codec, response parsing, requests, the connection task and
//! the caller-facing session. Also server autoconfig and the session registry.

mod autoconfig;
mod client;
pub mod codec;
mod registry;
mod request;
pub mod response;
pub mod response_code;
mod session;
mod watchdog;

pub use autoconfig::{AutoConfig, ProbeSuccess};
pub use client::{DisconnectReason, PendingResponse};
pub use registry::SessionRegistry;
pub use request::Command;
pub use response::{Capabilities, Response, ScriptInfo, Status, StatusResponse};
pub use response_code::{QuotaKind, Referral, ResponseCode};
pub use session::{Session, SessionEvent, SessionState, TlsState};
pub use watchdog::{WatchDog, WatchDogEvent};
