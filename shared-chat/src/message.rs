use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Commands a store client sends to the server.
///
/// TTLs travel as milliseconds so short leases stay representable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    SetIfAbsent {
        key: String,
        value: String,
        ttl_ms: u64,
    },
    SetIfPresent {
        key: String,
        value: String,
        ttl_ms: u64,
    },
    Delete {
        key: String,
    },
    SetAdd {
        set: String,
        member: String,
    },
    SetRemove {
        set: String,
        member: String,
    },
    SetMembers {
        set: String,
    },
    Publish {
        channel: String,
        payload: String,
    },
    Subscribe {
        channel: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Flag { value: bool },
    Members { members: Vec<String> },
    Delivered { receivers: usize },
    Subscribed { channel: String },
    Message { channel: String, payload: String },
    Error { message: String },
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    // One JSON document per line; blank lines are keep-alive noise.
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_use_tagged_snake_case_json() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        write_message(
            &mut writer,
            &Request::SetIfAbsent {
                key: "online.alice".into(),
                value: "alice".into(),
                ttl_ms: 120_000,
            },
        )
        .await
        .expect("write request");
        drop(writer);

        let mut raw = String::new();
        reader.read_line(&mut raw).await.expect("read raw line");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["type"], "set_if_absent");
        assert_eq!(value["ttl_ms"], 120_000);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let input: &[u8] = b"\r\n\n{\"type\":\"flag\",\"value\":true}\n";
        let mut reader = tokio::io::BufReader::new(input);

        let parsed = read_message::<_, Response>(&mut reader)
            .await
            .expect("read response")
            .expect("expected response");
        assert_eq!(parsed, Response::Flag { value: true });

        let end = read_message::<_, Response>(&mut reader)
            .await
            .expect("read eof");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_data() {
        let input: &[u8] = b"{not json}\n";
        let mut reader = tokio::io::BufReader::new(input);

        let err = read_message::<_, Response>(&mut reader)
            .await
            .expect_err("malformed line should fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
