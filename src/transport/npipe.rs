use std::io;
use std::time::Duration;

use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};

/// `ERROR_PIPE_BUSY`: every instance of the pipe is taken
const ERROR_PIPE_BUSY: i32 = 231;
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Turn `//./pipe/docker_engine` into `\\.\pipe\docker_engine`
pub fn pipe_name(path: &str) -> String {
    path.replace('/', "\\")
}

/// Open a named pipe, retrying while the server reports it busy
///
/// The caller bounds the retries with its connect timeout.
pub async fn connect(path: &str) -> io::Result<NamedPipeClient> {
    let name = pipe_name(path);
    loop {
        match ClientOptions::new().open(&name) {
            Ok(client) => return Ok(client),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                log::debug!("Pipe {} is busy, retrying", name);
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(BUSY_RETRY_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_slashes() {
        assert_eq!(pipe_name("//./pipe/docker_engine"), r"\\.\pipe\docker_engine");
    }
}
