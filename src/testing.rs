//! 单元测试与路由测试使用的内存远端文件系统。

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWrite;

use crate::remote::{
    ConnectError, RemoteEntry, RemoteError, RemoteMetadata, RemoteReader, RemoteSession,
    RemoteWriter, SessionFactory,
};
use crate::remote_path;
use crate::vault::Secret;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Default)]
struct FsState {
    nodes: BTreeMap<String, Node>,
    failing_removals: HashSet<String>,
}

/// 绝对路径到节点的共享树，`/` 始终存在。
#[derive(Clone)]
pub struct MemoryFs {
    state: Arc<Mutex<FsState>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            state: Arc::new(Mutex::new(FsState {
                nodes,
                failing_removals: HashSet::new(),
            })),
        }
    }
}

fn not_found(path: &str) -> RemoteError {
    RemoteError::Status(format!("no such file: {path}"))
}

fn mtime() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

impl MemoryFs {
    pub fn put_dir(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let mut current = String::from("/");
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = remote_path::join(&current, segment);
            state.nodes.entry(current.clone()).or_insert(Node::Dir);
        }
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.put_dir(remote_path::parent(path));
        let mut state = self.state.lock().unwrap();
        state
            .nodes
            .insert(path.to_string(), Node::File(data.to_vec()));
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().nodes.contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.state.lock().unwrap().nodes.get(path), Some(Node::Dir))
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock().unwrap().nodes.get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn fail_removal_of(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_removals
            .insert(path.to_string());
    }

    fn children(state: &FsState, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        state
            .nodes
            .keys()
            .filter(|key| key.len() > prefix.len() && key.starts_with(&prefix))
            .filter(|key| !key[prefix.len()..].contains('/'))
            .cloned()
            .collect()
    }

    fn metadata(node: &Node) -> RemoteMetadata {
        match node {
            Node::Dir => RemoteMetadata {
                size: 4096,
                is_dir: true,
                is_symlink: false,
                modified: Some(mtime()),
            },
            Node::File(data) => RemoteMetadata {
                size: data.len() as u64,
                is_dir: false,
                is_symlink: false,
                modified: Some(mtime()),
            },
        }
    }
}

/// 基于 [`MemoryFs`] 的会话工厂，统计打开与关闭次数。
#[derive(Clone)]
pub struct MemoryFactory {
    fs: MemoryFs,
    users: Arc<HashMap<String, String>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    unreachable: bool,
}

impl MemoryFactory {
    pub fn with_user(username: &str, password: &str) -> Self {
        let mut users = HashMap::new();
        users.insert(username.to_string(), password.to_string());
        Self {
            fs: MemoryFs::default(),
            users: Arc::new(users),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            unreachable: false,
        }
    }

    /// 每次连接都在传输层失败的工厂。
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::with_user("nobody", "nobody")
        }
    }

    pub fn fs(&self) -> MemoryFs {
        self.fs.clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MemoryFactory {
    async fn open(
        &self,
        username: &str,
        secret: &Secret,
    ) -> Result<Arc<dyn RemoteSession>, ConnectError> {
        if self.unreachable {
            return Err(ConnectError::Transport("connection refused".into()));
        }
        match self.users.get(username) {
            Some(password) if password == secret.expose() => {}
            _ => return Err(ConnectError::AuthRejected),
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySession {
            fs: self.fs.clone(),
            closed: self.closed.clone(),
            is_closed: Mutex::new(false),
        }))
    }
}

struct MemorySession {
    fs: MemoryFs,
    closed: Arc<AtomicUsize>,
    is_closed: Mutex<bool>,
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let state = self.fs.state.lock().unwrap();
        match state.nodes.get(path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => {
                return Err(RemoteError::Status(format!("not a directory: {path}")));
            }
            None => return Err(not_found(path)),
        }
        Ok(MemoryFs::children(&state, path)
            .into_iter()
            .map(|child| RemoteEntry {
                name: remote_path::base_name(&child).to_string(),
                metadata: MemoryFs::metadata(&state.nodes[&child]),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<RemoteMetadata, RemoteError> {
        let state = self.fs.state.lock().unwrap();
        state
            .nodes
            .get(path)
            .map(MemoryFs::metadata)
            .ok_or_else(|| not_found(path))
    }

    async fn lstat(&self, path: &str) -> Result<RemoteMetadata, RemoteError> {
        self.stat(path).await
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, RemoteError> {
        match self.fs.state.lock().unwrap().nodes.get(path) {
            Some(Node::File(data)) => Ok(Box::new(io::Cursor::new(data.clone()))),
            Some(Node::Dir) => Err(RemoteError::Status(format!("is a directory: {path}"))),
            None => Err(not_found(path)),
        }
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, RemoteError> {
        let mut state = self.fs.state.lock().unwrap();
        match state.nodes.get(remote_path::parent(path)) {
            Some(Node::Dir) => {}
            _ => return Err(not_found(remote_path::parent(path))),
        }
        if matches!(state.nodes.get(path), Some(Node::Dir)) {
            return Err(RemoteError::Status(format!("is a directory: {path}")));
        }
        state.nodes.insert(path.to_string(), Node::File(Vec::new()));
        Ok(Box::new(MemoryWriter {
            fs: self.fs.clone(),
            path: path.to_string(),
        }))
    }

    async fn remove_file(&self, path: &str) -> Result<(), RemoteError> {
        let mut state = self.fs.state.lock().unwrap();
        if state.failing_removals.contains(path) {
            return Err(RemoteError::Status(format!("permission denied: {path}")));
        }
        match state.nodes.get(path) {
            Some(Node::File(_)) => {
                state.nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => Err(RemoteError::Status(format!("is a directory: {path}"))),
            None => Err(not_found(path)),
        }
    }

    async fn remove_dir(&self, path: &str) -> Result<(), RemoteError> {
        let mut state = self.fs.state.lock().unwrap();
        if state.failing_removals.contains(path) {
            return Err(RemoteError::Status(format!("permission denied: {path}")));
        }
        match state.nodes.get(path) {
            Some(Node::Dir) if !MemoryFs::children(&state, path).is_empty() => {
                Err(RemoteError::Status(format!("directory not empty: {path}")))
            }
            Some(Node::Dir) => {
                state.nodes.remove(path);
                Ok(())
            }
            Some(Node::File(_)) => Err(RemoteError::Status(format!("not a directory: {path}"))),
            None => Err(not_found(path)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let mut state = self.fs.state.lock().unwrap();
        if !state.nodes.contains_key(from) {
            return Err(not_found(from));
        }
        if state.nodes.contains_key(to) {
            return Err(RemoteError::Status(format!("file already exists: {to}")));
        }
        if !matches!(state.nodes.get(remote_path::parent(to)), Some(Node::Dir)) {
            return Err(not_found(remote_path::parent(to)));
        }
        let prefix = format!("{from}/");
        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|key| *key == from || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = state.nodes.remove(&key) {
                let renamed = format!("{to}{}", &key[from.len()..]);
                state.nodes.insert(renamed, node);
            }
        }
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        let mut state = self.fs.state.lock().unwrap();
        if state.nodes.contains_key(path) {
            return Err(RemoteError::Status(format!("file already exists: {path}")));
        }
        if !matches!(state.nodes.get(remote_path::parent(path)), Some(Node::Dir)) {
            return Err(not_found(remote_path::parent(path)));
        }
        state.nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let mut is_closed = self.is_closed.lock().unwrap();
        if !*is_closed {
            *is_closed = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryWriter {
    fs: MemoryFs,
    path: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.fs.state.lock().unwrap();
        match state.nodes.get_mut(&self.path) {
            Some(Node::File(data)) => {
                data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                "file removed while writing",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
