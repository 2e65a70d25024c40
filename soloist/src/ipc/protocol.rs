//! Line-oriented wire protocol between challengers and the owner
//!
//! One command per line, one response line per command:
//!
//! | Command   | Response        |
//! |-----------|-----------------|
//! | `version` | `<version>\n`   |
//! | `quit`    | `ok\n`          |
//!
//! Unknown lines get no response.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Maximum line size in either direction
pub const MAX_LINE_LEN: usize = 1024;

/// Reply the owner sends once it has released ownership
pub const OK_REPLY: &str = "ok";

/// Commands a challenger may send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for the owner's version string
    Version,

    /// Ask the owner to release and terminate
    Quit,

    /// Anything else; ignored by the owner
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "version" => Command::Version,
            "quit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }

    pub fn as_line(&self) -> &str {
        match self {
            Command::Version => "version",
            Command::Quit => "quit",
            Command::Unknown(line) => line,
        }
    }
}

/// Read one line, returning `None` on a clean EOF
///
/// The trailing newline (and `\r`) is stripped. A line longer than
/// [`MAX_LINE_LEN`] is an `InvalidData` error.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64 + 1);
    let bytes_read = limited.read_line(&mut line).await?;

    if bytes_read == 0 {
        debug!("read_line: eof");
        return Ok(None);
    }

    if bytes_read > MAX_LINE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line too large: more than {} bytes", MAX_LINE_LEN),
        ));
    }

    let trimmed = line.trim_end_matches(['\n', '\r']).to_string();
    Ok(Some(trimmed))
}

/// Write one line followed by `\n` and flush
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if line.len() >= MAX_LINE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("line too large: {} bytes", line.len()),
        ));
    }

    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    debug!(%line, "write_line: sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(Command::parse("version"), Command::Version);
        assert_eq!(Command::parse("quit\r"), Command::Quit);
        assert_eq!(Command::parse("  quit  "), Command::Quit);
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(Command::parse("VERSION"), Command::Unknown("VERSION".to_string()));
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }

    #[test]
    fn test_as_line() {
        assert_eq!(Command::Version.as_line(), "version");
        assert_eq!(Command::Quit.as_line(), "quit");
    }

    #[tokio::test]
    async fn test_read_lines_until_eof() {
        let data: &[u8] = b"version\r\nquit\n";
        let mut reader = BufReader::new(data);

        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("version"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("quit"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_unterminated_final_line() {
        let data: &[u8] = b"1.2.3";
        let mut reader = BufReader::new(data);
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("1.2.3"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_line() {
        let data = vec![b'a'; MAX_LINE_LEN + 10];
        let mut reader = BufReader::new(data.as_slice());
        let err = read_line(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let mut out = Vec::new();
        write_line(&mut out, "ok").await.unwrap();
        assert_eq!(out, b"ok\n");
    }

    #[tokio::test]
    async fn test_write_rejects_oversized_line() {
        let mut out = Vec::new();
        let line = "x".repeat(MAX_LINE_LEN);
        assert!(write_line(&mut out, &line).await.is_err());
        assert!(out.is_empty());
    }
}
