// Cluster memory: a namespaced key/value store workers use to pass large
// intermediate values by reference instead of round-tripping through a
// stage's return value. Backed by a Unix domain socket so worker processes
// (not just worker tasks in this process) can share it.
//
// Wire protocol: each message is a 4-byte big-endian length prefix followed
// by a bincode-encoded `Request`/`Response`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dagforge_core::error::{DagforgeError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
enum Request {
    Put { namespace: String, key: String, value: Vec<u8> },
    Get { namespace: String, key: String },
    Delete { namespace: String, key: String },
    Clear { namespace: String },
}

#[derive(Debug, Serialize, Deserialize)]
enum Response {
    Ok,
    Value(Option<Vec<u8>>),
    Error(String),
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Backing store, shared by the server task and (when running in-process)
/// any local shortcut clients.
#[derive(Default)]
struct Store {
    namespaces: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl Store {
    fn put(&mut self, namespace: &str, key: String, value: Vec<u8>) {
        self.namespaces.entry(namespace.to_string()).or_default().insert(key, value);
    }

    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.namespaces.get(namespace).and_then(|ns| ns.get(key)).cloned()
    }

    fn delete(&mut self, namespace: &str, key: &str) {
        if let Some(ns) = self.namespaces.get_mut(namespace) {
            ns.remove(key);
        }
    }

    fn clear(&mut self, namespace: &str) {
        self.namespaces.remove(namespace);
    }
}

/// Listens on a Unix domain socket and serves `Request`s against an
/// in-process `Store`. One server per executor process; multiple worker
/// processes connect to it as clients.
pub struct ClusterMemoryServer {
    socket_path: PathBuf,
    store: Arc<RwLock<Store>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ClusterMemoryServer {
    pub async fn bind(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if socket_path.exists() {
            let _ = std::fs::remove_file(&socket_path);
        }
        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| DagforgeError::ExecutorUnavailable(format!("binding cluster memory socket: {e}")))?;
        let store = Arc::new(RwLock::new(Store::default()));

        let accept_store = store.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let store = accept_store.clone();
                        tokio::spawn(serve_connection(stream, store));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "cluster memory listener stopped accepting");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            socket_path,
            store,
            handle: Some(handle),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// In-process shortcut for the executor's own task, bypassing the
    /// socket round trip.
    pub fn local_client(&self) -> LocalClusterMemory {
        LocalClusterMemory { store: self.store.clone() }
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

impl Drop for ClusterMemoryServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_connection(mut stream: UnixStream, store: Arc<RwLock<Store>>) {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "cluster memory connection read failed");
                break;
            }
        };
        let request: Request = match bincode::deserialize(&frame) {
            Ok(req) => req,
            Err(err) => {
                let response = Response::Error(format!("malformed request: {err}"));
                let _ = send_response(&mut stream, &response).await;
                continue;
            }
        };

        let response = match request {
            Request::Put { namespace, key, value } => {
                store.write().put(&namespace, key, value);
                Response::Ok
            }
            Request::Get { namespace, key } => Response::Value(store.read().get(&namespace, &key)),
            Request::Delete { namespace, key } => {
                store.write().delete(&namespace, &key);
                Response::Ok
            }
            Request::Clear { namespace } => {
                store.write().clear(&namespace);
                Response::Ok
            }
        };

        if send_response(&mut stream, &response).await.is_err() {
            break;
        }
    }
}

async fn send_response(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    let payload = bincode::serialize(response).expect("Response always serializes");
    write_frame(stream, &payload).await
}

/// In-process handle to the server's store, skipping the socket.
#[derive(Clone)]
pub struct LocalClusterMemory {
    store: Arc<RwLock<Store>>,
}

impl LocalClusterMemory {
    pub fn put<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(|e| DagforgeError::Internal(e.into()))?;
        self.store.write().put(namespace, key.to_string(), bytes);
        Ok(())
    }

    pub fn get<T: for<'de> Deserialize<'de>>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        match self.store.read().get(namespace, key) {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes).map_err(|e| DagforgeError::Internal(e.into()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn delete(&self, namespace: &str, key: &str) {
        self.store.write().delete(namespace, key);
    }

    pub fn clear(&self, namespace: &str) {
        self.store.write().clear(namespace);
    }
}

/// Socket client for out-of-process workers.
pub struct ClusterMemoryClient {
    stream: tokio::sync::Mutex<UnixStream>,
}

impl ClusterMemoryClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(socket_path.as_ref())
            .await
            .map_err(|e| DagforgeError::ExecutorUnavailable(format!("connecting to cluster memory: {e}")))?;
        Ok(Self { stream: tokio::sync::Mutex::new(stream) })
    }

    async fn roundtrip(&self, request: Request) -> Result<Response> {
        let mut stream = self.stream.lock().await;
        let payload = bincode::serialize(&request).map_err(|e| DagforgeError::Internal(e.into()))?;
        write_frame(&mut *stream, &payload)
            .await
            .map_err(|e| DagforgeError::Broker(format!("cluster memory write failed: {e}")))?;
        let frame = read_frame(&mut *stream)
            .await
            .map_err(|e| DagforgeError::Broker(format!("cluster memory read failed: {e}")))?
            .ok_or_else(|| DagforgeError::Broker("cluster memory connection closed".to_string()))?;
        bincode::deserialize(&frame).map_err(|e| DagforgeError::Internal(e.into()))
    }

    pub async fn put<T: Serialize + Sync>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(|e| DagforgeError::Internal(e.into()))?;
        match self
            .roundtrip(Request::Put {
                namespace: namespace.to_string(),
                key: key.to_string(),
                value: bytes,
            })
            .await?
        {
            Response::Ok => Ok(()),
            Response::Error(msg) => Err(DagforgeError::Broker(msg)),
            Response::Value(_) => Err(DagforgeError::Internal(anyhow::anyhow!("unexpected response to put"))),
        }
    }

    pub async fn get<T: for<'de> Deserialize<'de>>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        match self
            .roundtrip(Request::Get { namespace: namespace.to_string(), key: key.to_string() })
            .await?
        {
            Response::Value(Some(bytes)) => {
                let value = bincode::deserialize(&bytes).map_err(|e| DagforgeError::Internal(e.into()))?;
                Ok(Some(value))
            }
            Response::Value(None) => Ok(None),
            Response::Error(msg) => Err(DagforgeError::Broker(msg)),
            Response::Ok => Err(DagforgeError::Internal(anyhow::anyhow!("unexpected response to get"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn socket_round_trip_stores_and_retrieves() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("cluster.sock");
        let server = ClusterMemoryServer::bind(&socket_path).await.unwrap();

        let client = ClusterMemoryClient::connect(&socket_path).await.unwrap();
        client.put("run-1", "s1", &vec![1, 2, 3]).await.unwrap();

        let value: Option<Vec<i32>> = client.get("run-1", "s1").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        let missing: Option<Vec<i32>> = client.get("run-1", "missing").await.unwrap();
        assert_eq!(missing, None);

        drop(server);
    }

    #[test]
    fn local_client_bypasses_the_socket() {
        let store = Arc::new(RwLock::new(Store::default()));
        let local = LocalClusterMemory { store };
        local.put("ns", "k", &42i32).unwrap();
        let value: Option<i32> = local.get("ns", "k").unwrap();
        assert_eq!(value, Some(42));
        local.delete("ns", "k");
        let value: Option<i32> = local.get("ns", "k").unwrap();
        assert_eq!(value, None);
    }
}
