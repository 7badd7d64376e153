/*
 * watchdog.rs
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

//! Request timeout and idle (keep-alive) timers for one connection.
//!
//! Timers are deadlines, not tasks: [`WatchDog::wait`] sleeps until the earlier armed
//! deadline and disarms it before returning, so it can sit in a `select!` loop and be
//! dropped and recreated freely.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchDogEvent {
    /// The in-flight request took too long.
    Timeout,
    /// The connection has been quiet for the idle interval.
    Idle,
}

#[derive(Debug)]
pub struct WatchDog {
    timeout: Duration,
    idle: Option<Duration>,
    timeout_at: Option<Instant>,
    idle_at: Option<Instant>,
}

impl WatchDog {
    /// `idle` of `None` disables keep-alive.
    pub fn new(timeout: Duration, idle: Option<Duration>) -> Self {
        Self { timeout, idle, timeout_at: None, idle_at: None }
    }

    /// A request went out: arm the timeout, suspend idle.
    pub fn on_start(&mut self) {
        self.idle_at = None;
        self.timeout_at = Some(Instant::now() + self.timeout);
    }

    /// A response came in: cancel the timeout, re-arm idle.
    pub fn on_stop(&mut self) {
        self.timeout_at = None;
        self.idle_at = self.idle.map(|idle| Instant::now() + idle);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancel(&mut self) {
        self.timeout_at = None;
        self.idle_at = None;
    }

    pub fn is_timeout_armed(&self) -> bool {
        self.timeout_at.is_some()
    }

    pub fn is_idle_armed(&self) -> bool {
        self.idle_at.is_some()
    }

    /// Resolve when the next armed timer fires. Pending forever when none is armed.
    pub async fn wait(&mut self) -> WatchDogEvent {
        let next = match (self.timeout_at, self.idle_at) {
            (Some(t), Some(i)) if i < t => Some((i, WatchDogEvent::Idle)),
            (Some(t), _) => Some((t, WatchDogEvent::Timeout)),
            (None, Some(i)) => Some((i, WatchDogEvent::Idle)),
            (None, None) => None,
        };
        let Some((deadline, event)) = next else {
            return std::future::pending().await;
        };
        sleep_until(deadline).await;
        match event {
            WatchDogEvent::Timeout => self.timeout_at = None,
            WatchDogEvent::Idle => self.idle_at = None,
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once() {
        let mut w = WatchDog::new(Duration::from_millis(20_000), None);
        w.on_start();
        let start = Instant::now();
        assert_eq!(w.wait().await, WatchDogEvent::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(20_000));
        assert!(!w.is_timeout_armed());
        let again = tokio::time::timeout(Duration::from_secs(3600), w.wait()).await;
        assert!(again.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_arms_idle() {
        let mut w = WatchDog::new(Duration::from_secs(20), Some(Duration::from_secs(300)));
        w.on_start();
        assert!(!w.is_idle_armed());
        w.on_stop();
        assert!(!w.is_timeout_armed());
        assert!(w.is_idle_armed());
        assert_eq!(w.wait().await, WatchDogEvent::Idle);
        assert!(!w.is_idle_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn no_idle_when_disabled() {
        let mut w = WatchDog::new(Duration::from_secs(20), None);
        w.on_stop();
        assert!(!w.is_idle_armed());
        assert!(tokio::time::timeout(Duration::from_secs(3600), w.wait()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn start_cancels_idle() {
        let mut w = WatchDog::new(Duration::from_secs(20), Some(Duration::from_secs(5)));
        w.on_stop();
        w.on_start();
        assert_eq!(w.wait().await, WatchDogEvent::Timeout);
    }
}
