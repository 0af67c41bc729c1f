// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Minimal line-oriented control client for the local gateway daemon. This
// is the production `Gateway`; its wire format with the daemon is an
// implementation detail the rest of the engine never sees.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{connection_error, BoxedStream, Destination, Gateway, Session};
use crate::error::{EngineError, Result};

pub struct SamGateway {
    gateway_address: String,
}

impl SamGateway {
    pub fn new(gateway_address: impl Into<String>) -> Self {
        Self {
            gateway_address: gateway_address.into(),
        }
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>> {
        let stream = TcpStream::connect(&self.gateway_address)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        Ok(BufReader::new(stream))
    }

    async fn command(&self, conn: &mut BufReader<TcpStream>, line: &str) -> Result<String> {
        conn.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        let mut response = String::new();
        conn.read_line(&mut response)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        if response.is_empty() {
            return Err(connection_error("gateway closed the connection"));
        }

        Ok(response.trim_end().to_string())
    }
}

pub struct SamSession {
    control: TcpStream,
}

#[async_trait]
impl Session for SamSession {
    async fn wait_closed(&mut self) {
        let mut buf = [0u8; 1];

        // A zero-length read signals the daemon closed the control
        // channel, i.e. the session died.
        loop {
            match self.control.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.control.shutdown().await;
    }
}

#[async_trait]
impl Gateway for SamGateway {
    async fn create_session(
        &self,
        session_name: &str,
        local_destination: &str,
    ) -> Result<Box<dyn Session>> {
        let mut conn = self.connect().await?;

        let resp = self
            .command(
                &mut conn,
                &format!(
                    "SESSION CREATE ID={} DESTINATION={}",
                    session_name, local_destination
                ),
            )
            .await?;

        if resp.contains("DUPLICATED_DEST") {
            return Err(EngineError::DuplicatedDestination);
        }

        if !resp.contains("OK") {
            return Err(connection_error(format!("session create failed: {}", resp)));
        }

        Ok(Box::new(SamSession {
            control: conn.into_inner(),
        }))
    }

    async fn stream_connect(
        &self,
        session_name: &str,
        target_destination: &Destination,
    ) -> Result<BoxedStream> {
        let mut conn = self.connect().await?;

        let resp = self
            .command(
                &mut conn,
                &format!(
                    "STREAM CONNECT ID={} DESTINATION={}",
                    session_name, target_destination
                ),
            )
            .await?;

        if !resp.contains("OK") {
            return Err(EngineError::PeerNotFound(target_destination.clone()));
        }

        Ok(Box::new(conn.into_inner()))
    }

    async fn stream_accept(&self, session_name: &str) -> Result<(String, BoxedStream)> {
        let mut conn = self.connect().await?;

        let resp = self
            .command(&mut conn, &format!("STREAM ACCEPT ID={}", session_name))
            .await?;

        if !resp.contains("OK") {
            return Err(connection_error(format!("stream accept failed: {}", resp)));
        }

        let mut remote = String::new();
        conn.read_line(&mut remote)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        Ok((remote.trim_end().to_string(), Box::new(conn.into_inner())))
    }

    async fn destination_lookup(&self, base32_address: &str) -> Result<Destination> {
        let mut conn = self.connect().await?;

        let resp = self
            .command(
                &mut conn,
                &format!("NAMING LOOKUP NAME={}.b32", base32_address),
            )
            .await?;

        resp.split("VALUE=")
            .nth(1)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| EngineError::PeerNotFound(base32_address.to_string()))
    }

    async fn new_destination(&self) -> Result<(String, Vec<u8>)> {
        let mut conn = self.connect().await?;

        let resp = self.command(&mut conn, "DEST GENERATE").await?;

        let base32 = resp
            .split("PUB=")
            .nth(1)
            .and_then(|s| s.split_whitespace().next())
            .ok_or_else(|| connection_error("malformed DEST GENERATE response"))?
            .to_string();

        let priv_hex = resp
            .split("PRIV=")
            .nth(1)
            .and_then(|s| s.split_whitespace().next())
            .unwrap_or("");

        Ok((base32, hex_decode(priv_hex)))
    }
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len() / 2 * 2)
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
