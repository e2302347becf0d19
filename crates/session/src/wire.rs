// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing for envelopes: a 4-byte big-endian length prefix followed
//! by a JSON body, adapted from the daemon IPC wire format the teacher
//! repo used for its length-prefixed request/response protocol.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::SessionError;

/// Dispatch/result payloads are workflow parameters, not archives — 16 MiB
/// is generous headroom over the teacher's 200 MiB archive-oriented cap.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, SessionError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(SessionError::MessageTooLarge { size: json.len(), max: MAX_MESSAGE_SIZE });
    }
    Ok(json)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SessionError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>, SessionError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(SessionError::ConnectionClosed);
        }
        Err(e) => return Err(SessionError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(SessionError::MessageTooLarge { size: len, max: MAX_MESSAGE_SIZE });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_message<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> Result<(), SessionError> {
    let len = data.len();
    if len > MAX_MESSAGE_SIZE {
        return Err(SessionError::MessageTooLarge { size: len, max: MAX_MESSAGE_SIZE });
    }
    writer.write_all(&(len as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_envelope<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: std::time::Duration,
) -> Result<wf_core::Envelope, SessionError> {
    let bytes = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| SessionError::Timeout)??;
    decode(&bytes)
}

pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &wf_core::Envelope,
    timeout: std::time::Duration,
) -> Result<(), SessionError> {
    let data = encode(envelope)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| SessionError::Timeout)?
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
