//! Command executor
//!
//! Read-only queries and ordered configuration sets over an executing
//! session. Output is returned verbatim; nothing is parsed.

use std::time::Duration;

use crate::error::SessionError;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    save_delay: Duration,
}

impl CommandExecutor {
    /// `save_delay` is how long the timing-based save waits for the device
    pub fn new(save_delay: Duration) -> Self {
        Self { save_delay }
    }

    /// Send one read-only command
    pub async fn query(&self, session: &mut Session, command: &str) -> Result<String, SessionError> {
        tracing::debug!("[Executor] {}: query '{}'", session.host(), command);
        session.send_command(command).await
    }

    /// Apply `commands` in order inside configuration mode.
    ///
    /// Nothing is rolled back; a failure reports the 1-based position and text
    /// of the command that was being sent.
    pub async fn configure(
        &self,
        session: &mut Session,
        commands: &[String],
    ) -> Result<String, SessionError> {
        tracing::debug!(
            "[Executor] {}: applying {} configuration commands",
            session.host(),
            commands.len()
        );

        session.config_mode().await?;

        let markers = session.platform().error_markers();
        let mut transcript = Vec::with_capacity(commands.len());

        for (idx, command) in commands.iter().enumerate() {
            let position = idx + 1;
            let output = session
                .send_command(command)
                .await
                .map_err(|e| at_position(e, position, command))?;

            if markers.iter().any(|m| output.contains(m)) {
                return Err(SessionError::Execution {
                    position: Some(position),
                    command: command.clone(),
                    detail: output.trim().to_string(),
                });
            }
            transcript.push(output);
        }

        session.exit_config_mode().await?;
        Ok(transcript
            .into_iter()
            .filter(|o| !o.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Persist the running configuration.
    ///
    /// Sent in timing mode: save commands print confirmation dialogs that do
    /// not end in a regular prompt.
    pub async fn save_running_config(&self, session: &mut Session) -> Result<String, SessionError> {
        let command = session.platform().save_config_command();
        tracing::debug!("[Executor] {}: saving with '{}'", session.host(), command);

        let mut output = session.send_command_timing(command, self.save_delay).await?;

        if let Some(answer) = confirmation_answer(&output) {
            let follow_up = session.send_command_timing(answer, self.save_delay).await?;
            output.push('\n');
            output.push_str(&follow_up);
        }
        Ok(output)
    }
}

fn at_position(err: SessionError, position: usize, command: &str) -> SessionError {
    match err {
        SessionError::Execution { detail, .. } => SessionError::Execution {
            position: Some(position),
            command: command.to_string(),
            detail,
        },
        other => other,
    }
}

/// Reply expected by a save confirmation dialog, if one is showing
fn confirmation_answer(output: &str) -> Option<&'static str> {
    let tail = output.trim_end();
    let lower = tail.to_lowercase();
    if lower.contains("(y/n)") || lower.contains("[y/n]") {
        Some("y")
    } else if lower.contains("[confirm]") || tail.ends_with('?') {
        Some("")
    } else {
        None
    }
}
