/*
 * registry.rs
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

//! Open sessions keyed by account id. Owned by the caller and passed where needed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::session::Session;
use crate::config::AccountConfig;
use crate::error::SieveError;
use crate::net::{Connector, TcpConnector};
use crate::sasl::Credentials;

pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    sessions: HashMap<String, Session>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self { connector, sessions: HashMap::new() }
    }

    /// Establish a session for `account` and register it under the account id, replacing
    /// (and disconnecting) any previous session for that id. Nothing is registered on failure.
    pub async fn open(
        &mut self,
        account: &AccountConfig,
        credentials: Option<Credentials>,
    ) -> Result<&mut Session, SieveError> {
        if let Some(mut previous) = self.sessions.remove(&account.id) {
            debug!("replacing session for {}", account.id);
            previous.disconnect().await;
        }
        let mut session = Session::with_connector(account.options.clone(), Arc::clone(&self.connector));
        session.establish(account.endpoint(), credentials).await?;
        Ok(self.sessions.entry(account.id.clone()).or_insert(session))
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Unregister a session without disconnecting it.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Disconnect and unregister every session.
    pub async fn close_all(&mut self) {
        for (id, mut session) in self.sessions.drain() {
            debug!("closing session {}", id);
            session.disconnect().await;
        }
    }
}
