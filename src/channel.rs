//! Push channel lifecycle: handshake and reconnect with backoff.

use crate::backoff::Backoff;
use crate::error::{FeedError, Result};
use crate::remote::{self, ChannelSink, Remote};
use crate::session::Session;
use crate::writer::Command;
use crossbeam_channel::{select, Receiver, Sender};
use std::thread;
use std::time::Duration;

/// Handshake, then join the subject's room.
pub(crate) fn connect(remote: &Remote, session: &Session, sink: ChannelSink) -> Result<()> {
    remote.channel.connect(session, sink)?;
    remote.channel.join(session.subject())
}

/// Reconnect policy handed to the reconnect thread.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ReconnectPolicy {
    pub backoff: Backoff,
    /// `None` retries until stopped.
    pub max_attempts: Option<u32>,
    pub attempt_timeout: Duration,
}

/// Retry the connection in the background until it succeeds, the credential
/// is rejected, attempts run out, or `cancel` fires.
///
/// Progress is reported back through the writer queue.
pub(crate) fn spawn_reconnect(
    remote: Remote,
    session: Session,
    policy: ReconnectPolicy,
    cancel: Receiver<()>,
    commands: Sender<Command>,
) {
    let spawned = thread::Builder::new()
        .name("livefeed-reconnect".to_string())
        .spawn({
            let commands = commands.clone();
            move || reconnect_loop(remote, session, policy, cancel, commands)
        });

    if let Err(e) = spawned {
        tracing::warn!(error = %e, "could not spawn reconnect thread");
        let _ = commands.send(Command::ChannelFailed(FeedError::Network(e.to_string())));
    }
}

fn reconnect_loop(
    remote: Remote,
    session: Session,
    policy: ReconnectPolicy,
    cancel: Receiver<()>,
    commands: Sender<Command>,
) {
    let mut attempt = 1u32;
    loop {
        if let Some(max) = policy.max_attempts {
            if attempt > max {
                tracing::warn!(attempts = max, "giving up on push channel");
                let _ = commands.send(Command::ChannelFailed(FeedError::Network(format!(
                    "no connection after {} attempts",
                    max
                ))));
                return;
            }
        }

        let delay = policy.backoff.delay(attempt);
        select! {
            recv(cancel) -> _ => return,
            default(delay) => {}
        }

        if commands.send(Command::ChannelRetrying { attempt }).is_err() {
            return;
        }
        tracing::debug!(attempt, ?delay, "reconnecting push channel");

        let result = remote::call_bounded("reconnect", policy.attempt_timeout, &cancel, {
            let remote = remote.clone();
            let session = session.clone();
            move || {
                remote.channel.reconnect(&session)?;
                remote.channel.join(session.subject())
            }
        });

        match result {
            Err(FeedError::Stopped) => return,
            Ok(()) => {
                tracing::info!(attempt, "push channel reconnected");
                let _ = commands.send(Command::ChannelUp);
                return;
            }
            Err(e) if e.is_auth() => {
                tracing::warn!(error = %e, "push channel rejected credential");
                let _ = commands.send(Command::ChannelFailed(e));
                return;
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "reconnect attempt failed");
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
