//! # Connection Pool
//!
//! Purpose: Reuse TCP connections for the sync client and drive the frame
//! decoder over each connection's read buffer.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Resumable Reads**: Bytes stay in the connection's `BytesMut` until
//!    `decode_buf` reports a complete reply, so partial reads just loop.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use kvwire_common::{CommandMode, CommandPacket, Encoding, KvError, KvResult, Value};

use crate::resp::decode_buf;

/// Callback for errors that cost the client a connection.
pub type ErrorHook = Arc<dyn Fn(&KvError) + Send + Sync>;

const READ_CHUNK: usize = 4096;

/// Pool configuration for the sync client.
#[derive(Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout; blocking commands ignore it.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Text or bytes for string replies.
    pub encoding: Encoding,
    /// Invoked when a connection is discarded after an error.
    pub on_error: Option<ErrorHook>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// Replayed on every connection the pool opens.
    init: RwLock<Vec<CommandPacket>>,
    closed: AtomicBool,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool with the provided configuration.
    ///
    /// The address is validated here; connections are opened lazily.
    pub fn new(config: PoolConfig) -> KvResult<Self> {
        parse_addr(&config.addr)?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                init: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquires a connection from the pool.
    pub fn acquire(&self) -> KvResult<PooledConnection> {
        if self.is_closed() {
            return Err(KvError::ConnectionClosed);
        }
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(KvError::PoolExhausted);
        }

        match self.open() {
            Ok(conn) => {
                debug!(addr = %self.inner.config.addr, "pool connection opened");
                Ok(PooledConnection::new(self.inner.clone(), conn))
            }
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    fn open(&self) -> KvResult<Connection> {
        let mut conn = Connection::connect(&self.inner.config)?;
        for packet in self.inner.init.read().iter() {
            if let Some(reply) = conn.exec(packet)? {
                reply.check()?;
            }
        }
        Ok(conn)
    }

    /// Registers a command every pooled connection must run once.
    ///
    /// Idle connections opened without it are dropped; connections in use
    /// are the caller's responsibility.
    pub fn add_init_command(&self, packet: CommandPacket) {
        self.inner.init.write().push(packet);
        let mut state = self.inner.state.lock();
        let dropped = state.idle.len();
        state.total = state.total.saturating_sub(dropped);
        state.idle.clear();
    }

    /// Opens a connection outside the pool limits, for long-lived use.
    pub fn connect_dedicated(&self) -> KvResult<Connection> {
        if self.is_closed() {
            return Err(KvError::ConnectionClosed);
        }
        Connection::connect(&self.inner.config)
    }

    /// Drops idle connections and refuses further acquires.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut state = self.inner.state.lock();
        let dropped = state.idle.len();
        state.total = state.total.saturating_sub(dropped);
        state.idle.clear();
        debug!(dropped, "pool closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Idle and total connection counts.
    pub fn stats(&self) -> (usize, usize) {
        let state = self.inner.state.lock();
        (state.idle.len(), state.total)
    }

    fn pop_idle(&self) -> Option<Connection> {
        self.inner.state.lock().idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock();
        if !self.is_closed() && state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Sends `packet` and reads its reply; `None` for `WITHOUT_RESULT`.
    pub fn exec(&mut self, packet: &CommandPacket) -> KvResult<Option<Value>> {
        let conn = self.conn.as_mut().ok_or(KvError::ConnectionClosed)?;
        let response = conn.exec(packet);
        if let Err(err) = &response {
            if err.is_connection_fatal() {
                // Unknown stream position; never hand this connection out again.
                self.valid = false;
                warn!(error = %err, command = packet.name(), "pool connection discarded");
                if let Some(hook) = &self.pool.config.on_error {
                    hook(err);
                }
            }
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if self.valid {
            pool.return_connection(conn);
        } else {
            pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    read_timeout: Option<Duration>,
    encoding: Encoding,
}

impl Connection {
    fn connect(config: &PoolConfig) -> KvResult<Self> {
        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout)?;
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(256),
            read_timeout: config.read_timeout,
            encoding: config.encoding,
        })
    }

    /// Encodes and writes one packet.
    pub fn send(&mut self, packet: &CommandPacket) -> KvResult<()> {
        self.write_buf.clear();
        packet.encode(&mut self.write_buf);
        self.stream.write_all(&self.write_buf)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads until one complete frame is buffered and decodes it.
    pub fn read_value(&mut self) -> KvResult<Value> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(value) = decode_buf(&mut self.read_buf, self.encoding)? {
                return Ok(value);
            }
            let read = self.stream.read(&mut chunk)?;
            if read == 0 {
                return Err(KvError::ConnectionClosed);
            }
            self.read_buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Reads the next reply, skipping out-of-band push frames.
    fn read_reply(&mut self) -> KvResult<Value> {
        loop {
            match self.read_value()? {
                Value::Push(items) => trace!(len = items.len(), "push frame skipped"),
                value => return Ok(value),
            }
        }
    }

    /// Sends `packet` and reads its reply according to its mode.
    ///
    /// `WITH_BLOCK` lifts the read timeout for this reply only and
    /// `WITHOUT_RESULT` skips the read.
    pub fn exec(&mut self, packet: &CommandPacket) -> KvResult<Option<Value>> {
        self.send(packet)?;
        if packet.has_mode(CommandMode::WITHOUT_RESULT) {
            return Ok(None);
        }
        if !packet.has_mode(CommandMode::WITH_BLOCK) || self.read_timeout.is_none() {
            return self.read_reply().map(Some);
        }

        self.stream.set_read_timeout(None)?;
        let reply = self.read_reply();
        self.stream.set_read_timeout(self.read_timeout)?;
        reply.map(Some)
    }

    /// Second handle on the socket, for shutting it down from another thread.
    pub fn try_clone_stream(&self) -> KvResult<TcpStream> {
        Ok(self.stream.try_clone()?)
    }

    /// Removes the read timeout, for connections that wait on pushes.
    pub fn clear_read_timeout(&mut self) -> KvResult<()> {
        self.read_timeout = None;
        self.stream.set_read_timeout(None)?;
        Ok(())
    }
}

fn parse_addr(addr: &str) -> KvResult<SocketAddr> {
    addr.parse().map_err(|_| KvError::InvalidAddress)
}

fn connect_stream(config: &PoolConfig) -> KvResult<TcpStream> {
    let addr = parse_addr(&config.addr)?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(addr: &str) -> PoolConfig {
        PoolConfig {
            addr: addr.to_string(),
            max_idle: 1,
            max_total: 1,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
            encoding: Encoding::Text,
            on_error: None,
        }
    }

    #[test]
    fn rejects_invalid_address() {
        assert!(matches!(
            ConnectionPool::new(config("not an address")),
            Err(KvError::InvalidAddress)
        ));
    }

    #[test]
    fn closed_pool_refuses_acquire() {
        let pool = ConnectionPool::new(config("127.0.0.1:1")).unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire(), Err(KvError::ConnectionClosed)));
        assert_eq!(pool.stats(), (0, 0));
    }
}
