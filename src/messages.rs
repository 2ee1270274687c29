//! Typed representations of the Connection Protocol payload bodies this crate cares about.
//!
//! russh hands us already-parsed arguments at the `Handler` trait boundary, so these structs are
//! not on the hot path of a live connection; they exist so the wire shapes are documented and
//! independently testable, and so a future transport swap has a stable boundary to target.

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug)]
pub struct DecodeError;

fn get_string(buf: &mut impl Buf) -> Result<String, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(DecodeError);
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| DecodeError)
}

fn get_bytes(buf: &mut impl Buf) -> Result<Bytes, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(DecodeError);
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_u32(buf: &mut impl Buf) -> Result<u32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError);
    }
    Ok(buf.get_u32())
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, b: &[u8]) {
    buf.put_u32(b.len() as u32);
    buf.put_slice(b);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenDirectMsg {
    pub remote_addr: String,
    pub remote_port: u32,
    pub origin_addr: String,
    pub origin_port: u32,
}

impl ChannelOpenDirectMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.remote_addr);
        buf.put_u32(self.remote_port);
        put_string(&mut buf, &self.origin_addr);
        buf.put_u32(self.origin_port);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            remote_addr: get_string(&mut buf)?,
            remote_port: get_u32(&mut buf)?,
            origin_addr: get_string(&mut buf)?,
            origin_port: get_u32(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLocalChannelOpenDirectMsg {
    pub socket_path: String,
}

impl StreamLocalChannelOpenDirectMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.socket_path);
        put_string(&mut buf, "");
        buf.put_u32(0);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        let socket_path = get_string(&mut buf)?;
        let _reserved_str = get_string(&mut buf)?;
        let _reserved_u32 = get_u32(&mut buf)?;
        Ok(Self { socket_path })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardMsg {
    pub bind_addr: String,
    pub bind_port: u32,
}

impl ForwardMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.bind_addr);
        buf.put_u32(self.bind_port);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            bind_addr: get_string(&mut buf)?,
            bind_port: get_u32(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardResponseMsg {
    pub bound_port: u32,
}

impl ForwardResponseMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(self.bound_port);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            bound_port: get_u32(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedTcpIpPayload {
    pub bind_addr: String,
    pub bound_port: u32,
    pub origin_addr: String,
    pub origin_port: u32,
}

impl ForwardedTcpIpPayload {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.bind_addr);
        buf.put_u32(self.bound_port);
        put_string(&mut buf, &self.origin_addr);
        buf.put_u32(self.origin_port);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            bind_addr: get_string(&mut buf)?,
            bound_port: get_u32(&mut buf)?,
            origin_addr: get_string(&mut buf)?,
            origin_port: get_u32(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLocalChannelForwardMsg {
    pub socket_path: String,
}

impl StreamLocalChannelForwardMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.socket_path);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            socket_path: get_string(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedStreamLocalPayload {
    pub socket_path: String,
}

impl ForwardedStreamLocalPayload {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.socket_path);
        put_string(&mut buf, "");
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        let socket_path = get_string(&mut buf)?;
        let _reserved = get_string(&mut buf)?;
        Ok(Self { socket_path })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequestMsg {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
    pub modes: Bytes,
}

impl PtyRequestMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.term);
        buf.put_u32(self.cols);
        buf.put_u32(self.rows);
        buf.put_u32(self.width_px);
        buf.put_u32(self.height_px);
        put_bytes(&mut buf, &self.modes);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            term: get_string(&mut buf)?,
            cols: get_u32(&mut buf)?,
            rows: get_u32(&mut buf)?,
            width_px: get_u32(&mut buf)?,
            height_px: get_u32(&mut buf)?,
            modes: get_bytes(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyWindowChangeMsg {
    pub cols: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
}

impl PtyWindowChangeMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(self.cols);
        buf.put_u32(self.rows);
        buf.put_u32(self.width_px);
        buf.put_u32(self.height_px);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            cols: get_u32(&mut buf)?,
            rows: get_u32(&mut buf)?,
            width_px: get_u32(&mut buf)?,
            height_px: get_u32(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetenvRequest {
    pub name: String,
    pub value: String,
}

impl SetenvRequest {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.name);
        put_string(&mut buf, &self.value);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            name: get_string(&mut buf)?,
            value: get_string(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecMsg {
    pub command: String,
}

impl ExecMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.command);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            command: get_string(&mut buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatusMsg {
    pub status: u32,
}

impl ExitStatusMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(self.status);
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            status: get_u32(&mut buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_open_direct_roundtrip() {
        let msg = ChannelOpenDirectMsg {
            remote_addr: "example.com".into(),
            remote_port: 443,
            origin_addr: "10.0.0.1".into(),
            origin_port: 52344,
        };
        let encoded = msg.encode();
        let decoded = ChannelOpenDirectMsg::decode(encoded.clone()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn streamlocal_open_direct_roundtrip() {
        let msg = StreamLocalChannelOpenDirectMsg {
            socket_path: "/var/run/app.sock".into(),
        };
        let decoded = StreamLocalChannelOpenDirectMsg::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn forward_msg_roundtrip() {
        let msg = ForwardMsg {
            bind_addr: "0.0.0.0".into(),
            bind_port: 0,
        };
        let decoded = ForwardMsg::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn forward_response_roundtrip() {
        let msg = ForwardResponseMsg { bound_port: 33221 };
        let decoded = ForwardResponseMsg::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn forwarded_tcpip_roundtrip() {
        let msg = ForwardedTcpIpPayload {
            bind_addr: "0.0.0.0".into(),
            bound_port: 2222,
            origin_addr: "192.168.1.2".into(),
            origin_port: 9001,
        };
        let decoded = ForwardedTcpIpPayload::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn streamlocal_forward_roundtrip() {
        let msg = StreamLocalChannelForwardMsg {
            socket_path: "/tmp/a.sock".into(),
        };
        let decoded = StreamLocalChannelForwardMsg::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn forwarded_streamlocal_roundtrip() {
        let msg = ForwardedStreamLocalPayload {
            socket_path: "/tmp/b.sock".into(),
        };
        let decoded = ForwardedStreamLocalPayload::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn pty_request_roundtrip() {
        let msg = PtyRequestMsg {
            term: "xterm-256color".into(),
            cols: 80,
            rows: 24,
            width_px: 0,
            height_px: 0,
            modes: Bytes::from_static(&[0]),
        };
        let decoded = PtyRequestMsg::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn pty_window_change_roundtrip() {
        let msg = PtyWindowChangeMsg {
            cols: 132,
            rows: 43,
            width_px: 800,
            height_px: 600,
        };
        let decoded = PtyWindowChangeMsg::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn setenv_roundtrip() {
        let msg = SetenvRequest {
            name: "LANG".into(),
            value: "C.UTF-8".into(),
        };
        let decoded = SetenvRequest::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn exec_roundtrip() {
        let msg = ExecMsg {
            command: "echo 'hi there'".into(),
        };
        let decoded = ExecMsg::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn exit_status_roundtrip() {
        let msg = ExitStatusMsg { status: 1 };
        let decoded = ExitStatusMsg::decode(msg.encode()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.put_slice(b"short");
        assert!(ChannelOpenDirectMsg::decode(buf.freeze()).is_err());
    }
}
