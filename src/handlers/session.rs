//! The `session` channel type: `pty-req`/`window-change`/`env`/`shell`/`exec`/`subsystem` request
//! dispatch for one open channel, grounded on
//! `warpgate-protocol-ssh/src/server/session.rs`'s session-channel handling but generalized to run
//! `exec` as a real child process (via [`tokio::process::Command`]) and to hand `shell` off to a
//! pluggable [`crate::shell::Shell`] hook instead of a fixed proxy target.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::channel_writer::ChannelWriter;
use crate::conn::{ChannelEvent, ConnContext, NewChannel, SessionRequest};
use crate::error::SessionError;
use crate::messages::ExitStatusMsg;
use crate::registry::{ChannelHandler, HandlerRegistry};
use crate::session_state::SessionState;
use crate::shell::{Shell, ShellContext};

pub const CHANNEL_TYPE: &str = "session";
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

pub(crate) fn register(registry: &mut HandlerRegistry) {
    registry.register_channel(CHANNEL_TYPE, Arc::new(SessionHandler));
}

struct SessionHandler;

#[async_trait]
impl ChannelHandler for SessionHandler {
    async fn handle(&self, new_channel: NewChannel, ctx: Arc<ConnContext>) {
        let NewChannel {
            channel_id,
            mut events,
            decision,
            ..
        } = new_channel;

        if !ctx.permissions.allow(CHANNEL_TYPE, "") {
            tracing::debug!("session channel denied by permissions");
            let _ = decision.send(false);
            return;
        }
        if decision.send(true).is_err() {
            return;
        }

        let writer = ChannelWriter::new(ctx.handle.clone(), channel_id);
        let mut state = SessionState::new(ctx.environment.clone());
        let exit_code = Arc::new(AtomicU32::new(0));
        let mut exec = None;

        loop {
            tokio::select! {
                _ = state.cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        ChannelEvent::Request { request, reply } => {
                            if !ctx.permissions.allow(CHANNEL_TYPE, request.type_str()) {
                                // Denied: the spec calls for silently dropping the request, not a
                                // channel-failure reply.
                                continue;
                            }
                            let accepted = handle_request(
                                request,
                                &ctx,
                                &mut state,
                                &writer,
                                &exit_code,
                                &mut exec,
                            )
                            .await;
                            let _ = reply.send(accepted);
                        }
                        ChannelEvent::Data(data) => {
                            if let Some(running) = &mut exec {
                                feed_exec_stdin(running, data).await;
                            }
                        }
                        ChannelEvent::ExtendedData { .. } => {}
                        ChannelEvent::Eof => {
                            if let Some(running) = &mut exec {
                                if let Some(mut stdin) = running.stdin.take() {
                                    let _ = stdin.shutdown().await;
                                }
                                running.shell_stdin = None;
                            }
                        }
                        ChannelEvent::Close => break,
                    }
                }
            }
        }

        if let Some(running) = exec.take() {
            running.child_handle.abort();
        }

        let status = ExitStatusMsg {
            status: exit_code.load(Ordering::SeqCst),
        };
        let _ = ctx.handle.exit_status_request(channel_id, status.status).await;
        let _ = ctx.handle.close(channel_id).await;
    }
}

/// State for the (at most one) `exec`/`shell`-spawned task running on this channel. `stdin` is
/// populated for `exec` (a real child process); `shell_stdin` for `shell` (forwarded to the
/// `Shell` hook's [`crate::shell::ShellContext::stdin`]). At most one of the two is ever set.
struct RunningExec {
    stdin: Option<ChildStdin>,
    shell_stdin: Option<mpsc::UnboundedSender<Bytes>>,
    /// Aborts the background task (child-output pump, or the `Shell::run` future) on channel
    /// close; the child process itself is killed on drop via `kill_on_drop`.
    child_handle: tokio::task::JoinHandle<()>,
}

async fn feed_exec_stdin(running: &mut RunningExec, data: Bytes) {
    if let Some(stdin) = &mut running.stdin {
        if stdin.write_all(&data).await.is_err() {
            running.stdin = None;
        }
        return;
    }
    if let Some(tx) = &running.shell_stdin {
        let _ = tx.send(data);
    }
}

async fn handle_request(
    request: SessionRequest,
    ctx: &Arc<ConnContext>,
    state: &mut SessionState,
    writer: &ChannelWriter,
    exit_code: &Arc<AtomicU32>,
    exec: &mut Option<RunningExec>,
) -> bool {
    match request {
        SessionRequest::Pty(msg) => {
            state.apply_pty(&msg);
            true
        }
        SessionRequest::WindowChange(msg) => {
            state.apply_window_change(msg);
            true
        }
        SessionRequest::Env(msg) => {
            state.set_env(msg.name, msg.value);
            true
        }
        SessionRequest::Shell => {
            if exec.is_some() {
                return false;
            }
            *exec = Some(spawn_shell(ctx, state, writer.clone(), exit_code.clone()));
            true
        }
        SessionRequest::Exec(msg) => {
            if exec.is_some() {
                return false;
            }
            match spawn_exec(&msg.command, ctx, state, writer.clone(), exit_code.clone()) {
                Ok(running) => {
                    *exec = Some(running);
                    true
                }
                Err(err) => {
                    tracing::warn!(?err, command = %msg.command, "failed to spawn exec command");
                    exit_code.store(127, Ordering::SeqCst);
                    state.cancel.cancel();
                    false
                }
            }
        }
        SessionRequest::Subsystem(name) => {
            tracing::debug!(subsystem = %name, "subsystem requests are not supported");
            false
        }
        SessionRequest::Other(t) => {
            tracing::debug!(request_type = %t, "unhandled session request");
            false
        }
    }
}

/// Starts the connection's `Shell` hook as a background task and returns immediately so the
/// session's request loop keeps processing further requests (`env`, `window-change`, ...) while
/// it runs. Channel data arriving afterward is forwarded to the hook via `shell_stdin`; its
/// completion trips `state.cancel`, same as an `exec` child exiting.
fn spawn_shell(
    ctx: &Arc<ConnContext>,
    state: &mut SessionState,
    writer: ChannelWriter,
    exit_code: Arc<AtomicU32>,
) -> RunningExec {
    let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
    let shell_ctx = ShellContext {
        environment: state.environment.clone(),
        workdir: ctx.workdir.clone(),
        pty: state.pty.clone(),
        window_change: state.take_window_change_receiver(),
        writer,
        stdin: stdin_rx,
    };
    let shell = ctx.shell.clone();
    let cancel = state.cancel.clone();
    let child_handle = tokio::spawn(async move {
        if let Err(err) = shell.run(shell_ctx).await {
            tracing::debug!(?err, "shell hook returned an error");
            exit_code.store(1, Ordering::SeqCst);
        }
        cancel.cancel();
    });

    RunningExec {
        stdin: None,
        shell_stdin: Some(stdin_tx),
        child_handle,
    }
}

fn spawn_exec(
    command: &str,
    ctx: &Arc<ConnContext>,
    state: &SessionState,
    writer: ChannelWriter,
    exit_code: Arc<AtomicU32>,
) -> Result<RunningExec, SessionError> {
    let args = shell_words::split(command)?;
    let Some((program, rest)) = args.split_first() else {
        return Err(SessionError::Malformed);
    };

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .env_clear()
        .envs(state.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(workdir) = &ctx.workdir {
        cmd.current_dir(workdir);
    }

    let mut child = cmd.spawn().map_err(SessionError::Spawn)?;
    let stdin = child.stdin.take();
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let cancel = state.cancel.clone();
    let child_handle = tokio::spawn(pump_exec(child, stdout, stderr, writer, exit_code, cancel));

    Ok(RunningExec {
        stdin,
        shell_stdin: None,
        child_handle,
    })
}

async fn pump_exec(
    mut child: Child,
    mut stdout: tokio::process::ChildStdout,
    mut stderr: tokio::process::ChildStderr,
    writer: ChannelWriter,
    exit_code: Arc<AtomicU32>,
    cancel: crate::session_state::CancelHandle,
) {
    let mut stdout_buf = [0u8; 8192];
    let mut stderr_buf = [0u8; 8192];
    let mut stdout_open = true;
    let mut stderr_open = true;

    loop {
        if !stdout_open && !stderr_open {
            break;
        }
        tokio::select! {
            n = stdout.read(&mut stdout_buf), if stdout_open => {
                match n {
                    Ok(0) | Err(_) => stdout_open = false,
                    Ok(n) => writer.write(Bytes::copy_from_slice(&stdout_buf[..n])),
                }
            }
            n = stderr.read(&mut stderr_buf), if stderr_open => {
                match n {
                    Ok(0) | Err(_) => stderr_open = false,
                    Ok(n) => writer.write_extended(SSH_EXTENDED_DATA_STDERR, Bytes::copy_from_slice(&stderr_buf[..n])),
                }
            }
        }
    }

    let status = match child.wait().await {
        Ok(status) => status.code().unwrap_or(1) as u32,
        Err(_) => 1,
    };
    exit_code.store(status, Ordering::SeqCst);
    writer.flush().await;
    cancel.cancel();
}
