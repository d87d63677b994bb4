//! # Command Packets
//!
//! Purpose: Describe one outgoing command as wire arguments plus the
//! `CommandMode` flags the transport and the caching layer act on.
//!
//! ## Design Principles
//!
//! 1. **Build Once**: A packet is assembled with consuming builder calls and is
//!    read-only afterwards; the transport encodes it exactly once.
//! 2. **Stable Argument Encoding**: Whether an argument travels as text or raw
//!    bytes is fixed when it is added.
//! 3. **Keys Are Marked**: `input_key` records argument positions so the cache
//!    matcher can see a command's keys without knowing its grammar.
//!
//! ## Wire Layout
//!
//! ```text
//! CommandPacket { name: "CLIENT", sub_command: "TRACKING", args: ["ON"] }
//!
//! *3\r\n
//! $6\r\nCLIENT\r\n
//! $8\r\nTRACKING\r\n
//! $2\r\nON\r\n
//! ```

use std::borrow::Cow;
use std::fmt;

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

bitflags! {
    /// Intent flags attached to every command packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CONNECTION = 1 << 2;
        const TRANSACTION = 1 << 3;
        const SCRIPT = 1 << 4;
        const PUB = 1 << 5;
        const SUB = 1 << 6;
        const UNSUB = 1 << 7;
        const KEYSPACE = 1 << 8;
        const SERVER = 1 << 9;
        const SENTINEL = 1 << 10;
        /// Blocking command; the transport must not apply the normal read timeout.
        const WITH_BLOCK = 1 << 11;
        /// Fire-and-forget; no reply is read.
        const WITHOUT_RESULT = 1 << 12;
        /// Does not refresh the connection's last-active timestamp.
        const WITHOUT_ACTIVE_TIME = 1 << 13;
        /// Read whose reply may be served from and stored in the local cache.
        const WITH_CLIENT_SIDE_CACHE = 1 << 14;
    }
}

/// One wire argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    Text(String),
    Bytes(Bytes),
}

impl Arg {
    /// Raw bytes as written to the wire.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Arg::Text(text) => text.as_bytes(),
            Arg::Bytes(bytes) => bytes,
        }
    }

    /// Text view, decoding bytes lossily.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Arg::Text(text) => Cow::Borrowed(text),
            Arg::Bytes(bytes) => String::from_utf8_lossy(bytes),
        }
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Text(text.to_string())
    }
}

impl From<String> for Arg {
    fn from(text: String) -> Self {
        Arg::Text(text)
    }
}

impl From<&String> for Arg {
    fn from(text: &String) -> Self {
        Arg::Text(text.clone())
    }
}

impl From<&[u8]> for Arg {
    fn from(bytes: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(bytes: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for Arg {
    fn from(bytes: Bytes) -> Self {
        Arg::Bytes(bytes)
    }
}

macro_rules! arg_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Text(value.to_string())
                }
            }
        )*
    };
}

arg_from_display!(i32, i64, u32, u64, usize, f64);

/// Outgoing command: name, optional sub-command, arguments and mode flags.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPacket {
    name: String,
    sub_command: Option<String>,
    args: Vec<Arg>,
    key_indexes: Vec<usize>,
    mode: CommandMode,
}

impl CommandPacket {
    /// Starts a packet for `name` with no arguments and empty mode.
    pub fn new(name: impl Into<String>) -> Self {
        CommandPacket {
            name: name.into(),
            sub_command: None,
            args: Vec::new(),
            key_indexes: Vec::new(),
            mode: CommandMode::empty(),
        }
    }

    pub fn sub_command(mut self, sub_command: impl Into<String>) -> Self {
        self.sub_command = Some(sub_command.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends a raw binary argument.
    pub fn arg_bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.arg(Arg::Bytes(bytes.into()))
    }

    /// Appends `arg` only when `condition` holds.
    pub fn arg_if(self, condition: bool, arg: impl Into<Arg>) -> Self {
        if condition {
            self.arg(arg)
        } else {
            self
        }
    }

    /// Appends a key argument and records its position.
    pub fn input_key(mut self, key: impl Into<Arg>) -> Self {
        self.key_indexes.push(self.args.len());
        self.args.push(key.into());
        self
    }

    pub fn input_keys<I, A>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        for key in keys {
            self = self.input_key(key);
        }
        self
    }

    /// Adds mode flags to the packet.
    pub fn mode(mut self, mode: CommandMode) -> Self {
        self.mode |= mode;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn sub_command_name(&self) -> Option<&str> {
        self.sub_command.as_deref()
    }

    #[inline]
    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    #[inline]
    pub fn command_mode(&self) -> CommandMode {
        self.mode
    }

    #[inline]
    pub fn has_mode(&self, mode: CommandMode) -> bool {
        self.mode.contains(mode)
    }

    /// Keys marked with `input_key`, in argument order.
    pub fn keys(&self) -> impl Iterator<Item = Cow<'_, str>> + '_ {
        self.key_indexes
            .iter()
            .filter_map(|&idx| self.args.get(idx))
            .map(Arg::to_text)
    }

    /// Raw bytes of the marked keys, in argument order.
    pub fn key_bytes(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.key_indexes
            .iter()
            .filter_map(|&idx| self.args.get(idx))
            .map(Arg::as_bytes)
    }

    /// Number of wire arguments including the name and sub-command.
    pub fn wire_len(&self) -> usize {
        1 + usize::from(self.sub_command.is_some()) + self.args.len()
    }

    /// Encodes the packet as a RESP array of bulk strings.
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(b'*');
        push_usize(out, self.wire_len());
        out.put_slice(b"\r\n");
        push_bulk(out, self.name.as_bytes());
        if let Some(sub_command) = &self.sub_command {
            push_bulk(out, sub_command.as_bytes());
        }
        for arg in &self.args {
            push_bulk(out, arg.as_bytes());
        }
    }

    /// The encoded packet; two packets are equal on the wire iff these are.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.freeze()
    }
}

impl fmt::Display for CommandPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(sub_command) = &self.sub_command {
            write!(f, " {}", sub_command)?;
        }
        for arg in &self.args {
            write!(f, " {}", arg.to_text())?;
        }
        Ok(())
    }
}

fn push_bulk(out: &mut BytesMut, data: &[u8]) {
    out.put_u8(b'$');
    push_usize(out, data.len());
    out.put_slice(b"\r\n");
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Digits go through a stack buffer so encoding never allocates.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    buf[..len].reverse();
    out.put_slice(&buf[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_tell_apart_what_display_merges() {
        let split = CommandPacket::new("MGET").input_keys(["a", "b"]);
        let joined = CommandPacket::new("MGET").input_key("a b");
        assert_eq!(split.to_string(), joined.to_string());
        assert_ne!(split.to_bytes(), joined.to_bytes());

        let binary = CommandPacket::new("GET").input_key(&b"\xff"[..]);
        assert_eq!(binary.key_bytes().collect::<Vec<_>>(), vec![&b"\xff"[..]]);
    }

    #[test]
    fn encodes_command() {
        let packet = CommandPacket::new("GET").input_key("key");
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_sub_command_and_binary_args() {
        let packet = CommandPacket::new("CLIENT")
            .sub_command("TRACKING")
            .arg("ON")
            .arg_bytes(&b"\x00\xff"[..]);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        assert_eq!(
            &buf[..],
            b"*4\r\n$6\r\nCLIENT\r\n$8\r\nTRACKING\r\n$2\r\nON\r\n$2\r\n\x00\xff\r\n"
        );
    }

    #[test]
    fn keys_follow_input_key_positions() {
        let packet = CommandPacket::new("MSET")
            .input_key("a")
            .arg("1")
            .input_key("b")
            .arg("2");
        let keys: Vec<_> = packet.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn arg_if_skips_false_conditions() {
        let packet = CommandPacket::new("SET")
            .input_key("k")
            .arg("v")
            .arg_if(false, "NX")
            .arg_if(true, "GET");
        assert_eq!(packet.to_string(), "SET k v GET");
    }

    #[test]
    fn modes_accumulate() {
        let packet = CommandPacket::new("BLPOP")
            .mode(CommandMode::READ)
            .mode(CommandMode::WITH_BLOCK);
        assert!(packet.has_mode(CommandMode::READ | CommandMode::WITH_BLOCK));
        assert!(!packet.has_mode(CommandMode::WRITE));
    }

    #[test]
    fn numeric_args_render_as_decimal() {
        let packet = CommandPacket::new("EXPIRE").input_key("k").arg(10u64).arg(1.5f64);
        assert_eq!(packet.to_string(), "EXPIRE k 10 1.5");
    }
}
