//! Challenger-side client for talking to the current owner
//!
//! Every wait (connect, write, read) is bounded. Expiry is reported as
//! [`CoordinationError::RemoteUnreachable`] and never retried here; the
//! coordinator decides whether to fall back to claiming ownership.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

use super::protocol::{Command, OK_REPLY, read_line, write_line};
use crate::error::CoordinationError;
use crate::version::Version;

/// Default timeout for connecting to the owner
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default timeout for each reply from the owner
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Policy deciding who survives a challenge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionScheme {
    /// The newcomer always displaces the owner
    ThisInstanceWins,
    /// The lower version yields; ties keep the incumbent
    #[default]
    HighestVersionWins,
}

/// How a challenge ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// The owner released and acknowledged `quit`
    Displaced,
    /// The owner is at least as new as this process
    Conceded { remote_version: String },
}

/// Client for the owner's coordination endpoint
#[derive(Debug, Clone)]
pub struct OwnerClient {
    socket_path: PathBuf,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl OwnerClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Open a connection to the owner
    pub async fn connect(&self) -> Result<OwnerConnection, CoordinationError> {
        debug!(?self.socket_path, "OwnerClient::connect: called");
        let stream = tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| CoordinationError::timed_out("connect", self.connect_timeout))?
            .map_err(|e| CoordinationError::unreachable("connect", e))?;

        let (read_half, write_half) = stream.into_split();
        Ok(OwnerConnection {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout: self.read_timeout,
        })
    }

    /// Ask the owner for its version without side effects
    pub async fn query_version(&self) -> Result<String, CoordinationError> {
        let mut conn = self.connect().await?;
        conn.version().await
    }

    /// Negotiate with the owner under `scheme`
    ///
    /// `Displaced` means the owner has already released the segment and the
    /// endpoint; the caller should claim ownership next.
    pub async fn challenge(
        &self,
        scheme: ResolutionScheme,
        local: &Version,
    ) -> Result<ChallengeOutcome, CoordinationError> {
        debug!(?scheme, %local, "OwnerClient::challenge: called");
        let mut conn = self.connect().await?;

        match scheme {
            ResolutionScheme::ThisInstanceWins => {
                conn.quit().await?;
                info!("Owner displaced unconditionally");
                Ok(ChallengeOutcome::Displaced)
            }
            ResolutionScheme::HighestVersionWins => {
                let remote_raw = conn.version().await?;
                let remote_wins = match Version::parse(&remote_raw) {
                    Some(remote) => {
                        debug!(%remote, %local, "OwnerClient::challenge: comparing versions");
                        remote >= *local
                    }
                    None => {
                        let err = CoordinationError::MalformedRemoteVersion(remote_raw.clone());
                        warn!(error = %err, "Treating owner as older");
                        false
                    }
                };

                if remote_wins {
                    info!(remote_version = %remote_raw, %local, "Owner is at least as new, conceding");
                    return Ok(ChallengeOutcome::Conceded {
                        remote_version: remote_raw,
                    });
                }

                conn.quit().await?;
                info!(remote_version = %remote_raw, %local, "Displaced older owner");
                Ok(ChallengeOutcome::Displaced)
            }
        }
    }
}

/// One open connection to the owner
#[derive(Debug)]
pub struct OwnerConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl OwnerConnection {
    /// Send `version` and return the owner's reply
    pub async fn version(&mut self) -> Result<String, CoordinationError> {
        self.request(Command::Version).await
    }

    /// Send `quit` and wait for `ok`
    pub async fn quit(&mut self) -> Result<(), CoordinationError> {
        let reply = self.request(Command::Quit).await?;
        if reply.trim() != OK_REPLY {
            return Err(CoordinationError::Protocol(reply));
        }
        Ok(())
    }

    async fn request(&mut self, command: Command) -> Result<String, CoordinationError> {
        debug!(command = command.as_line(), "OwnerConnection::request: sending");

        tokio::time::timeout(self.timeout, write_line(&mut self.writer, command.as_line()))
            .await
            .map_err(|_| CoordinationError::timed_out("write", self.timeout))?
            .map_err(|e| CoordinationError::unreachable("write", e))?;

        let reply = tokio::time::timeout(self.timeout, read_line(&mut self.reader))
            .await
            .map_err(|_| CoordinationError::timed_out("read", self.timeout))?
            .map_err(|e| CoordinationError::unreachable("read", e))?
            .ok_or_else(|| CoordinationError::unreachable("read", "connection closed by owner"))?;

        debug!(%reply, "OwnerConnection::request: received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    /// Scripted owner: answers `version` with `version` and `quit` with `quit_reply`
    fn mock_owner(
        listener: UnixListener,
        version: &'static str,
        quit_reply: Option<&'static str>,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = tokio::io::BufReader::new(read_half).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                seen.push(line.clone());
                let reply = match line.as_str() {
                    "version" => Some(version),
                    "quit" => quit_reply,
                    _ => None,
                };
                match reply {
                    Some(reply) => write_half.write_all(format!("{}\n", reply).as_bytes()).await.unwrap(),
                    None => break,
                }
            }
            seen
        })
    }

    fn setup() -> (TempDir, PathBuf, UnixListener) {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("owner.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        (temp, socket_path, listener)
    }

    fn local(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_client_with_timeouts() {
        let client = OwnerClient::new(PathBuf::from("/tmp/x.sock"))
            .with_connect_timeout(Duration::from_millis(50))
            .with_read_timeout(Duration::from_secs(1));
        assert_eq!(client.connect_timeout, Duration::from_millis(50));
        assert_eq!(client.read_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_default_scheme_is_version_based() {
        assert_eq!(ResolutionScheme::default(), ResolutionScheme::HighestVersionWins);
    }

    #[tokio::test]
    async fn test_this_instance_wins_skips_version() {
        let (_temp, socket_path, listener) = setup();
        let owner = mock_owner(listener, "99.0", Some("ok"));

        let client = OwnerClient::new(socket_path);
        let outcome = client
            .challenge(ResolutionScheme::ThisInstanceWins, &local("0.1"))
            .await
            .unwrap();
        assert_eq!(outcome, ChallengeOutcome::Displaced);
        drop(client);

        assert_eq!(owner.await.unwrap(), vec!["quit".to_string()]);
    }

    #[tokio::test]
    async fn test_older_owner_is_displaced() {
        let (_temp, socket_path, listener) = setup();
        let owner = mock_owner(listener, "1.0.0", Some("ok"));

        let outcome = OwnerClient::new(socket_path)
            .challenge(ResolutionScheme::HighestVersionWins, &local("1.1.0"))
            .await
            .unwrap();
        assert_eq!(outcome, ChallengeOutcome::Displaced);
        assert_eq!(owner.await.unwrap(), vec!["version".to_string(), "quit".to_string()]);
    }

    #[tokio::test]
    async fn test_newer_owner_wins() {
        let (_temp, socket_path, listener) = setup();
        let owner = mock_owner(listener, "2.0", Some("ok"));

        let outcome = OwnerClient::new(socket_path)
            .challenge(ResolutionScheme::HighestVersionWins, &local("1.9"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ChallengeOutcome::Conceded {
                remote_version: "2.0".to_string()
            }
        );
        assert_eq!(owner.await.unwrap(), vec!["version".to_string()]);
    }

    #[tokio::test]
    async fn test_equal_versions_keep_incumbent() {
        let (_temp, socket_path, listener) = setup();
        let _owner = mock_owner(listener, "1.2.0", Some("ok"));

        let outcome = OwnerClient::new(socket_path)
            .challenge(ResolutionScheme::HighestVersionWins, &local("1.2"))
            .await
            .unwrap();
        assert!(matches!(outcome, ChallengeOutcome::Conceded { .. }));
    }

    #[tokio::test]
    async fn test_malformed_remote_version_loses() {
        let (_temp, socket_path, listener) = setup();
        let owner = mock_owner(listener, "not-a-version", Some("ok"));

        let outcome = OwnerClient::new(socket_path)
            .challenge(ResolutionScheme::HighestVersionWins, &local("0.0.1"))
            .await
            .unwrap();
        assert_eq!(outcome, ChallengeOutcome::Displaced);
        assert_eq!(owner.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unexpected_quit_reply_is_protocol_error() {
        let (_temp, socket_path, listener) = setup();
        let _owner = mock_owner(listener, "1.0", Some("nope"));

        let err = OwnerClient::new(socket_path)
            .challenge(ResolutionScheme::ThisInstanceWins, &local("1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::Protocol(reply) if reply == "nope"));
    }

    #[tokio::test]
    async fn test_closed_without_reply_is_unreachable() {
        let (_temp, socket_path, listener) = setup();
        let _owner = mock_owner(listener, "1.0", None);

        let err = OwnerClient::new(socket_path)
            .challenge(ResolutionScheme::ThisInstanceWins, &local("1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::RemoteUnreachable { stage: "read", .. }));
    }

    #[tokio::test]
    async fn test_missing_socket_is_unreachable() {
        let temp = TempDir::new().unwrap();
        let client = OwnerClient::new(temp.path().join("missing.sock"));

        let err = client.query_version().await.unwrap_err();
        assert!(matches!(err, CoordinationError::RemoteUnreachable { stage: "connect", .. }));
    }

    #[tokio::test]
    async fn test_silent_owner_times_out() {
        let (_temp, socket_path, listener) = setup();
        // Accept and never answer
        let _owner = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let started = std::time::Instant::now();
        let err = OwnerClient::new(socket_path)
            .with_read_timeout(Duration::from_millis(100))
            .query_version()
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::RemoteUnreachable { stage: "read", .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
