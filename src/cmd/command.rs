use std::io::{BufRead, BufReader, Error, ErrorKind};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::cmd::command::CommandError::{ExecutionError, ExitStatusError, Killed, TimeoutError};
use timeout_readwrite::TimeoutReader;

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("Error while executing command")]
    ExecutionError(#[from] Error),

    #[error("Command terminated with a non success exit status code: {0}")]
    ExitStatusError(ExitStatus),

    #[error("Command killed due to timeout: {0}")]
    TimeoutError(String),

    #[error("Command killed by request: {0}")]
    Killed(String),
}

#[derive(Debug, Clone)]
pub enum AbortReason {
    Timeout(Duration),
    Canceled(String),
}

impl AbortReason {
    pub fn is_cancel(&self) -> bool {
        matches!(self, AbortReason::Canceled(_))
    }
}

pub enum CommandKillerTrigger<'a> {
    Timeout(Instant, Duration),
    Cancelable(&'a dyn Fn() -> bool),
}

impl<'a> CommandKillerTrigger<'a> {
    pub fn should_abort(&self) -> Option<AbortReason> {
        match self {
            CommandKillerTrigger::Timeout(since, timeout) => {
                if &since.elapsed() >= timeout {
                    Some(AbortReason::Timeout(*timeout))
                } else {
                    None
                }
            }
            CommandKillerTrigger::Cancelable(func) => {
                if (func)() {
                    Some(AbortReason::Canceled("Task Canceled".to_string()))
                } else {
                    None
                }
            }
        }
    }
}

pub enum CommandKiller<'a> {
    None,
    One(CommandKillerTrigger<'a>),
    Two(CommandKillerTrigger<'a>, CommandKillerTrigger<'a>),
}

impl<'a> CommandKiller<'a> {
    pub fn should_abort(&self) -> Option<AbortReason> {
        match self {
            CommandKiller::None => None,
            CommandKiller::One(cmd) => cmd.should_abort(),
            CommandKiller::Two(first, second) => first.should_abort().or_else(|| second.should_abort()),
        }
    }

    pub fn never() -> CommandKiller<'a> {
        CommandKiller::None
    }

    pub fn from_timeout(timeout: Duration) -> CommandKiller<'a> {
        CommandKiller::One(CommandKillerTrigger::Timeout(Instant::now(), timeout))
    }

    pub fn from_cancelable(is_canceled: &'a dyn Fn() -> bool) -> CommandKiller<'a> {
        CommandKiller::One(CommandKillerTrigger::Cancelable(is_canceled))
    }

    pub fn from(timeout: Duration, is_canceled: &'a dyn Fn() -> bool) -> CommandKiller<'a> {
        CommandKiller::Two(
            CommandKillerTrigger::Timeout(Instant::now(), timeout),
            CommandKillerTrigger::Cancelable(is_canceled),
        )
    }
}

/// Child-process wrapper used to fence each per-region scan into its own
/// process image. Stdout is the result pipe back to the parent, stderr
/// carries the child's logs.
pub struct ScanCommand {
    command: Command,
    kill_grace_period: Duration,
}

impl ScanCommand {
    pub fn new<P: AsRef<Path>>(binary: P, args: &[&str], envs: &[(&str, &str)]) -> ScanCommand {
        let mut command = Command::new(binary.as_ref().as_os_str());
        command.args(args);

        envs.iter().for_each(|(k, v)| {
            command.env(k, v);
        });

        ScanCommand {
            command,
            kill_grace_period: Duration::from_secs(60),
        }
    }

    pub fn set_kill_grace_period(&mut self, grace_period: Duration) {
        self.kill_grace_period = grace_period;
    }

    fn kill(&self, cmd_handle: &mut Child) {
        info!("Killing command: {:?}", cmd_handle);

        // SIGINT first and let the process shut down before SIGKILL
        unsafe {
            let pid = cmd_handle.id() as i32;
            let _ = libc::kill(pid, libc::SIGINT);
        }

        let killed_since = Instant::now();
        while let Ok(None) = cmd_handle.try_wait() {
            if killed_since.elapsed() > self.kill_grace_period {
                info!("Command still running after grace period, hard killing it");
                let _ = cmd_handle.kill();
            }
            std::thread::sleep(Duration::from_millis(500));
        }

        let _ = cmd_handle.wait();
    }

    pub fn exec_with_abort<STDOUT, STDERR>(
        &mut self,
        stdout_output: &mut STDOUT,
        stderr_output: &mut STDERR,
        abort_notifier: &CommandKiller,
    ) -> Result<(), CommandError>
    where
        STDOUT: FnMut(String),
        STDERR: FnMut(String),
    {
        info!("command: {:?}", self.command);
        let mut cmd_handle = self
            .command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ExecutionError)?;

        // Read stdout/stderr until timeout is reached
        let reader_timeout = Duration::from_secs(1);
        let stdout = cmd_handle
            .stdout
            .take()
            .ok_or_else(|| ExecutionError(Error::new(ErrorKind::BrokenPipe, "Cannot get stdout for command")))?;
        let mut stdout_reader = BufReader::new(TimeoutReader::new(stdout, reader_timeout)).lines();

        let stderr = cmd_handle
            .stderr
            .take()
            .ok_or_else(|| ExecutionError(Error::new(ErrorKind::BrokenPipe, "Cannot get stderr for command")))?;
        let mut stderr_reader = BufReader::new(TimeoutReader::new(
            stderr,
            Duration::from_secs(0), // don't block on stderr
        ))
        .lines();

        let mut stdout_closed = false;
        let mut stderr_closed = false;
        while !stdout_closed || !stderr_closed {
            // We should abort and kill the process
            if abort_notifier.should_abort().is_some() {
                break;
            }

            // Read on stdout first
            while !stdout_closed {
                let line = match stdout_reader.next() {
                    Some(line) => line,
                    None => {
                        stdout_closed = true;
                        break;
                    }
                };

                match line {
                    Err(ref err) if err.kind() == ErrorKind::TimedOut => break,
                    Ok(line) => stdout_output(line),
                    Err(err) => {
                        error!("Error on stdout of cmd {:?}: {:?}", self.command, err);
                        stdout_closed = true;
                        break;
                    }
                }

                if abort_notifier.should_abort().is_some() {
                    stdout_closed = true;
                    stderr_closed = true;
                    break;
                }
            }

            // Read stderr now
            while !stderr_closed {
                let line = match stderr_reader.next() {
                    Some(line) => line,
                    None => {
                        stderr_closed = true;
                        break;
                    }
                };

                match line {
                    Err(ref err) if err.kind() == ErrorKind::TimedOut => break,
                    Ok(line) => stderr_output(line),
                    Err(err) => {
                        error!("Error on stderr of cmd {:?}: {:?}", self.command, err);
                        stderr_closed = true;
                        break;
                    }
                }

                if abort_notifier.should_abort().is_some() {
                    stdout_closed = true;
                    stderr_closed = true;
                    break;
                }
            }
        }

        // Wait for the process to exit, or kill it on abort
        let exit_status;
        loop {
            match cmd_handle.try_wait() {
                Ok(Some(status)) => {
                    exit_status = status;
                    break;
                }
                Ok(None) => match abort_notifier.should_abort() {
                    None => {}
                    Some(reason) => {
                        let msg = format!("Killing process {:?} due to {:?}", self.command, reason);
                        warn!("{}", msg);
                        self.kill(&mut cmd_handle);

                        // Drain output
                        while let Some(Ok(line)) = stdout_reader.next() {
                            stdout_output(line);
                        }
                        while let Some(Ok(line)) = stderr_reader.next() {
                            stderr_output(line);
                        }

                        return if reason.is_cancel() {
                            Err(Killed(msg))
                        } else {
                            Err(TimeoutError(msg))
                        };
                    }
                },
                Err(err) => return Err(ExecutionError(err)),
            };

            std::thread::sleep(Duration::from_secs(1));
        }

        if !exit_status.success() {
            debug!(
                "command: {:?} terminated with error exist status {:?}",
                self.command, exit_status
            );
            return Err(ExitStatusError(exit_status));
        }

        Ok(())
    }
}
