/*
 * lib.rs
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

//! ManageSieve (RFC 5804) client for Tagliacarte: session and request queue over one
//! connection, SASL authentication, STARTTLS, referral reporting and server autoconfig.
//!
//! ```no_run
//! # async fn example() -> Result<(), tagliacarte_sieve::SieveError> {
//! use tagliacarte_sieve::{ClientOptions, Credentials, Endpoint, Session};
//!
//! let mut session = Session::new(ClientOptions::default());
//! session
//!     .establish(Endpoint::new("mail.example.com", 4190), Some(Credentials::new("user", "secret")))
//!     .await?;
//! for script in session.list_scripts().await? {
//!     println!("{}{}", script.name, if script.active { " (active)" } else { "" });
//! }
//! session.logout().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod sasl;
pub mod uri;

pub use config::{AccountConfig, ClientOptions, SaslPreference, TlsMode};
pub use error::SieveError;
pub use net::{Connector, Endpoint, ProxyConfig, TcpConnector, Transport};
pub use protocol::managesieve::{
    AutoConfig, Capabilities, Command, DisconnectReason, PendingResponse, ProbeSuccess, Referral, ResponseCode,
    ScriptInfo, Session, SessionEvent, SessionRegistry, SessionState, TlsState,
};
pub use sasl::{Credentials, SaslMechanism};
