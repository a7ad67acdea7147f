//! Session lifecycle for one device operation
//!
//! - `transport`: the `Connector`/`Transport` seam
//! - `ssh`: interactive SSH transport driven through `sshpass` + `ssh -tt`
//!
//! A [`Session`] walks `Idle → Connecting → Authenticated → Elevated →
//! Executing → Closing → Closed`, dropping into `Failed` from any step.
//! [`SessionManager::with_session`] releases the session on every exit path:
//! gracefully within the device deadline, or by aborting the transport once
//! the deadline passed or the batch was cancelled. A session dropped
//! mid-flight aborts its transport from `Drop`.

pub mod ssh;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{SessionError, SessionStage};
use crate::models::{DeviceDescriptor, Platform};

pub use ssh::{SshConnector, SshSettings};
pub use transport::{Connector, SendMode, Transport};

/// Upper bound for the graceful part of teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticated,
    Elevated,
    Executing,
    Closing,
    Closed,
    Failed,
}

/// A live, authenticated channel to one device, owned by one operation
pub struct Session {
    host: String,
    platform: Platform,
    transport: Box<dyn Transport>,
    state: SessionState,
}

impl Session {
    fn new(device: &DeviceDescriptor, transport: Box<dyn Transport>) -> Self {
        // `Idle -> Connecting` is logged by the manager before the connect
        Self {
            host: device.host.clone(),
            platform: device.platform,
            transport,
            state: SessionState::Connecting,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("[Session] {}: {:?} -> {:?}", self.host, self.state, next);
        self.state = next;
    }

    /// Send a command and wait for the prompt
    pub async fn send_command(&mut self, command: &str) -> Result<String, SessionError> {
        self.send(command, SendMode::ExpectPrompt).await
    }

    /// Send a command and return whatever the device printed after `delay`
    pub async fn send_command_timing(
        &mut self,
        command: &str,
        delay: Duration,
    ) -> Result<String, SessionError> {
        self.send(command, SendMode::Timing(delay)).await
    }

    pub async fn send(&mut self, command: &str, mode: SendMode) -> Result<String, SessionError> {
        self.ensure_executing(command)?;
        self.transport.send_command(command, mode).await
    }

    pub async fn config_mode(&mut self) -> Result<(), SessionError> {
        self.ensure_executing(self.platform.enter_config_command())?;
        self.transport.set_config_mode(true).await
    }

    pub async fn exit_config_mode(&mut self) -> Result<(), SessionError> {
        self.ensure_executing(self.platform.exit_config_command())?;
        self.transport.set_config_mode(false).await
    }

    fn ensure_executing(&self, command: &str) -> Result<(), SessionError> {
        if self.state == SessionState::Executing {
            Ok(())
        } else {
            Err(SessionError::execution(
                command,
                format!("session is {:?}, not executing", self.state),
            ))
        }
    }

    /// Graceful close, given at most `CLOSE_TIMEOUT` and never past `deadline`
    async fn close(&mut self, deadline: Instant) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closing);

        let limit = deadline.min(Instant::now() + CLOSE_TIMEOUT);
        match tokio::time::timeout_at(limit, self.transport.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("[Session] {}: disconnect failed: {}", self.host, e),
            Err(_) => {
                tracing::warn!("[Session] {}: disconnect timed out, aborting", self.host);
                self.transport.abort();
            }
        }

        self.transition(SessionState::Closed);
    }

    /// Forced close after the deadline passed or the batch was cancelled
    fn abort(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closing);
        self.transport.abort();
        self.transition(SessionState::Closed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            tracing::warn!(
                "[Session] {}: released in state {:?}, aborting transport",
                self.host,
                self.state
            );
            self.transport.abort();
            self.state = SessionState::Closed;
        }
    }
}

/// Owns the connect → authenticate → elevate → execute → close sequence
#[derive(Clone)]
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    device_timeout: Duration,
}

impl SessionManager {
    /// `device_timeout` bounds the whole span from connect through disconnect.
    /// A session that runs out of time or is cancelled is aborted rather than
    /// closed gracefully.
    pub fn new(connector: Arc<dyn Connector>, device_timeout: Duration) -> Self {
        Self {
            connector,
            device_timeout,
        }
    }

    pub fn device_timeout(&self) -> Duration {
        self.device_timeout
    }

    /// Acquire a session to `device`, run `op` on it and release it.
    ///
    /// Teardown runs exactly once whether `op` succeeds, fails or times out.
    pub async fn with_session<T, F>(
        &self,
        device: &DeviceDescriptor,
        op: F,
    ) -> Result<T, SessionError>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, SessionError>> + Send,
        T: Send,
    {
        self.with_session_until(device, &CancellationToken::new(), op)
            .await
    }

    /// Like [`with_session`](Self::with_session), additionally giving up at
    /// whatever stage the session is in once `cancel` fires. The session is
    /// still closed before returning.
    pub async fn with_session_until<T, F>(
        &self,
        device: &DeviceDescriptor,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, SessionError>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, SessionError>> + Send,
        T: Send,
    {
        let deadline = Instant::now() + self.device_timeout;

        tracing::debug!(
            "[Session] {}: {:?} -> {:?}",
            device.host,
            SessionState::Idle,
            SessionState::Connecting
        );
        let transport = self
            .step(
                deadline,
                cancel,
                SessionStage::Connecting,
                self.connector.connect(device),
            )
            .await?;
        let mut session = Session::new(device, transport);

        let result = self.drive(&mut session, device, deadline, cancel, op).await;
        match &result {
            Ok(_) => session.close(deadline).await,
            Err(e) => {
                tracing::debug!("[Session] {}: failed while {}: {}", device.host, e.stage(), e);
                session.transition(SessionState::Failed);
                match e {
                    SessionError::Timeout { .. } | SessionError::Cancelled { .. } => {
                        session.abort()
                    }
                    _ => session.close(deadline).await,
                }
            }
        }
        result
    }

    async fn drive<T, F>(
        &self,
        session: &mut Session,
        device: &DeviceDescriptor,
        deadline: Instant,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, SessionError>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, SessionError>> + Send,
        T: Send,
    {
        self.step(
            deadline,
            cancel,
            SessionStage::Authenticating,
            session.transport.authenticate(),
        )
        .await?;
        session.transition(SessionState::Authenticated);

        if device.platform.requires_enable() {
            self.step(
                deadline,
                cancel,
                SessionStage::Elevating,
                session.transport.enable(device.enable_secret()),
            )
            .await?;
            session.transition(SessionState::Elevated);
        }

        session.transition(SessionState::Executing);
        self.step(deadline, cancel, SessionStage::Executing, op(session))
            .await
    }

    async fn step<T>(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
        stage: SessionStage,
        fut: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled { stage }),
            outcome = tokio::time::timeout_at(deadline, fut) => match outcome {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout {
                    stage,
                    after: self.device_timeout,
                }),
            },
        }
    }
}
