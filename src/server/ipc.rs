// Local socket protocol: one length-prefixed JSON request per connection,
// answered by one length-prefixed JSON response

use crate::error::{QueryMindError, Result};
use crate::server::service::AskRequest;
use crate::storage::NewMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Maximum frame size (10MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Requests a client can send to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Answer a question
    Ask(AskRequest),
    /// Report corpus sizes and index kind
    Health,
    ListConversations {
        user_id: String,
    },
    CreateConversation {
        user_id: String,
        #[serde(default)]
        title: Option<String>,
    },
    RenameConversation {
        conversation_id: String,
        title: String,
    },
    DeleteConversation {
        conversation_id: String,
    },
    ListMessages {
        conversation_id: String,
    },
    SaveMessage(NewMessage),
    /// Stop the server after answering
    Shutdown,
}

/// Response sent back for every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    /// Create a successful response
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Create a successful response with data
    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Decode the payload of a successful response
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T> {
        if !self.success {
            return Err(QueryMindError::Server(
                self.message
                    .unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        let data = self.data.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(data).map_err(|e| QueryMindError::Json {
            source: e,
            context: "Unexpected response payload".to_string(),
        })
    }
}

/// Unix domain socket listener
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Bind to the socket path and start listening
    ///
    /// A leftover socket file from a crashed server is replaced; a socket
    /// with a live server behind it is an error.
    pub async fn bind(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            if UnixStream::connect(&self.socket_path).await.is_ok() {
                return Err(QueryMindError::Server(format!(
                    "Another server is already listening on {:?}",
                    self.socket_path
                )));
            }
            std::fs::remove_file(&self.socket_path).map_err(|e| QueryMindError::Io {
                source: e,
                context: format!("Failed to remove stale socket: {:?}", self.socket_path),
            })?;
        }

        // Ensure parent directory exists
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QueryMindError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| QueryMindError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;

        self.listener = Some(listener);

        tracing::info!("Listening on {:?}", self.socket_path);
        Ok(())
    }

    /// Accept the next connection
    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| QueryMindError::Server("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| QueryMindError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;

        Ok(stream)
    }

    /// Stop listening and remove the socket file
    pub fn shutdown(&mut self) -> Result<()> {
        self.listener = None;
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| QueryMindError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Read one length-prefixed JSON frame
pub async fn read_frame<T, S>(stream: &mut S) -> Result<T>
where
    T: DeserializeOwned,
    S: AsyncRead + Unpin,
{
    // 4-byte big-endian length prefix
    let length = stream.read_u32().await.map_err(|e| QueryMindError::Io {
        source: e,
        context: "Failed to read frame length".to_string(),
    })?;

    if length > MAX_MESSAGE_SIZE {
        return Err(QueryMindError::Server(format!(
            "Message too large: {} bytes (max: {})",
            length, MAX_MESSAGE_SIZE
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    stream
        .read_exact(&mut buffer)
        .await
        .map_err(|e| QueryMindError::Io {
            source: e,
            context: "Failed to read frame payload".to_string(),
        })?;

    serde_json::from_slice(&buffer).map_err(|e| QueryMindError::Json {
        source: e,
        context: "Failed to deserialize frame".to_string(),
    })
}

/// Write one length-prefixed JSON frame and flush it
pub async fn write_frame<T, S>(stream: &mut S, value: &T) -> Result<()>
where
    T: Serialize,
    S: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(value).map_err(|e| QueryMindError::Json {
        source: e,
        context: "Failed to serialize frame".to_string(),
    })?;

    if payload.len() > MAX_MESSAGE_SIZE as usize {
        return Err(QueryMindError::Server(format!(
            "Message too large: {} bytes (max: {})",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    stream
        .write_u32(payload.len() as u32)
        .await
        .map_err(|e| QueryMindError::Io {
            source: e,
            context: "Failed to write frame length".to_string(),
        })?;

    stream
        .write_all(&payload)
        .await
        .map_err(|e| QueryMindError::Io {
            source: e,
            context: "Failed to write frame payload".to_string(),
        })?;

    stream.flush().await.map_err(|e| QueryMindError::Io {
        source: e,
        context: "Failed to flush frame".to_string(),
    })?;

    Ok(())
}

/// Client side of the socket protocol
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Connect, send one request and wait for its response
    pub async fn send(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
                    QueryMindError::ServerNotRunning {
                        path: self.socket_path.clone(),
                    }
                }
                _ => QueryMindError::Io {
                    source: e,
                    context: format!("Failed to connect to server at {:?}", self.socket_path),
                },
            })?;

        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await
    }
}
