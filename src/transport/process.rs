use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Bytes written before closing stdin so `dial-stdio` sees the end of the last request
const TERMINATION_SEQUENCE: &[u8] = b"\n\n";
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// A child process used as a socket: writes go to its stdin, reads come from its stdout
#[derive(Debug)]
pub struct ProcessChannel {
    label: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    closed: bool,
}

impl ProcessChannel {
    /// Spawn `program args...` with piped stdin/stdout
    ///
    /// The child ignores `SIGINT`, so a Ctrl-C aimed at the parent does not tear down
    /// connections that are still being read.
    pub fn spawn(label: impl Into<String>, program: &str, args: &[String]) -> io::Result<Self> {
        let label = label.into();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        // SAFETY: signal(2) is async-signal-safe and the closure touches no shared state
        unsafe {
            command.pre_exec(|| {
                libc::signal(libc::SIGINT, libc::SIG_IGN);
                Ok(())
            });
        }

        log::debug!("Spawning {}: {} {}", label, program, args.join(" "));
        let mut child = command.spawn()?;

        let stdin = child.stdin.take();
        let Some(stdout) = child.stdout.take() else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "child stdout was not captured",
            ));
        };

        Ok(Self {
            label,
            child,
            stdin,
            stdout,
            closed: false,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the process is still running
    pub fn is_alive(&mut self) -> bool {
        !self.closed && matches!(self.child.try_wait(), Ok(None))
    }

    /// Send the termination sequence, close stdin, terminate and reap the process
    ///
    /// Calling this more than once is a no-op.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(mut stdin) = self.stdin.take() {
            let goodbye = async {
                stdin.write_all(TERMINATION_SEQUENCE).await?;
                stdin.flush().await
            };
            match tokio::time::timeout(EXIT_GRACE, goodbye).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("{}: stdin already closed: {}", self.label, e),
                Err(_) => log::debug!("{}: timed out writing termination sequence", self.label),
            }
        }

        if matches!(self.child.try_wait(), Ok(Some(_))) {
            log::debug!("{}: process already exited", self.label);
            return Ok(());
        }

        self.terminate();
        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                log::debug!("{}: process exited with {}", self.label, status);
            }
            Err(_) => {
                log::warn!(
                    "{}: process ignored termination for {:?}, killing it",
                    self.label,
                    EXIT_GRACE
                );
                self.child.start_kill()?;
                self.child.wait().await?;
            }
        }

        Ok(())
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        let pid = self.child.id().and_then(|pid| libc::pid_t::try_from(pid).ok());
        match pid {
            // SAFETY: pid belongs to a child we have not reaped yet
            Some(pid) => unsafe {
                libc::kill(pid, libc::SIGTERM);
            },
            None => {
                let _ = self.child.start_kill();
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}

impl AsyncRead for ProcessChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProcessChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_stdin())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

fn closed_stdin() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "process stdin is closed")
}
