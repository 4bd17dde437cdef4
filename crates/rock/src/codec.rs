//! Wire framing.
//!
//! Every frame is a four-byte big-endian length (counting everything after
//! the length field) followed by a one-byte type tag and the tag's header:
//!
//! ```text
//! request:  0x01 | sn u32 | cmd u32 | body...
//! response: 0x02 | sn u32 | result i32 | len u16 | result_str | body...
//! notify:   0x03 | cmd u32 | body...
//! ```
//!
//! Frames shorter than their fixed header or longer than the cap are
//! protocol errors that tear the connection down.

use {
    bytes::{Buf, BufMut, BytesMut},
    tokio_util::codec::{Decoder, Encoder},
};

use crate::{
    error::RockError,
    message::{RockMessage, RockNotify, RockRequest, RockResponse},
};

const TAG_REQUEST: u8 = 0x01;
const TAG_RESPONSE: u8 = 0x02;
const TAG_NOTIFY: u8 = 0x03;

/// Default frame cap.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RockCodec {
    max_frame: usize,
}

impl Default for RockCodec {
    fn default() -> Self {
        Self {
            max_frame: MAX_FRAME_BYTES,
        }
    }
}

impl RockCodec {
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Decoder for RockCodec {
    type Item = RockMessage;
    type Error = RockError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RockMessage>, RockError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame {
            return Err(RockError::FrameTooLarge {
                len,
                cap: self.max_frame,
            });
        }
        if len < 1 {
            return Err(RockError::Protocol("empty frame".into()));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut frame = src.split_to(len);
        let tag = frame.get_u8();
        let msg = match tag {
            TAG_REQUEST => {
                if frame.remaining() < 8 {
                    return Err(RockError::Protocol("request frame shorter than header".into()));
                }
                RockMessage::Request(RockRequest {
                    sn: frame.get_u32(),
                    cmd: frame.get_u32(),
                    body: frame.freeze(),
                })
            },
            TAG_RESPONSE => {
                if frame.remaining() < 10 {
                    return Err(RockError::Protocol("response frame shorter than header".into()));
                }
                let sn = frame.get_u32();
                let result = frame.get_i32();
                let str_len = frame.get_u16() as usize;
                if frame.remaining() < str_len {
                    return Err(RockError::Protocol("result_str overruns frame".into()));
                }
                let result_str = String::from_utf8(frame.split_to(str_len).to_vec())
                    .map_err(|_| RockError::Protocol("result_str is not UTF-8".into()))?;
                RockMessage::Response(RockResponse {
                    sn,
                    result,
                    result_str,
                    body: frame.freeze(),
                })
            },
            TAG_NOTIFY => {
                if frame.remaining() < 4 {
                    return Err(RockError::Protocol("notify frame shorter than header".into()));
                }
                RockMessage::Notify(RockNotify {
                    cmd: frame.get_u32(),
                    body: frame.freeze(),
                })
            },
            other => {
                return Err(RockError::Protocol(format!("unknown frame tag 0x{other:02x}")));
            },
        };
        Ok(Some(msg))
    }
}

impl Encoder<RockMessage> for RockCodec {
    type Error = RockError;

    fn encode(&mut self, msg: RockMessage, dst: &mut BytesMut) -> Result<(), RockError> {
        let len = match &msg {
            RockMessage::Request(r) => 1 + 8 + r.body.len(),
            RockMessage::Response(r) => 1 + 10 + r.result_str.len() + r.body.len(),
            RockMessage::Notify(n) => 1 + 4 + n.body.len(),
        };
        if len > self.max_frame {
            return Err(RockError::FrameTooLarge {
                len,
                cap: self.max_frame,
            });
        }
        dst.reserve(4 + len);
        dst.put_u32(len as u32);
        match msg {
            RockMessage::Request(r) => {
                dst.put_u8(TAG_REQUEST);
                dst.put_u32(r.sn);
                dst.put_u32(r.cmd);
                dst.put_slice(&r.body);
            },
            RockMessage::Response(r) => {
                if r.result_str.len() > u16::MAX as usize {
                    return Err(RockError::Protocol("result_str too long".into()));
                }
                dst.put_u8(TAG_RESPONSE);
                dst.put_u32(r.sn);
                dst.put_i32(r.result);
                dst.put_u16(r.result_str.len() as u16);
                dst.put_slice(r.result_str.as_bytes());
                dst.put_slice(&r.body);
            },
            RockMessage::Notify(n) => {
                dst.put_u8(TAG_NOTIFY);
                dst.put_u32(n.cmd);
                dst.put_slice(&n.body);
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn round_trip(msg: RockMessage) -> RockMessage {
        let mut codec = RockCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn request_round_trip() {
        let msg = RockMessage::Request(RockRequest {
            sn: 7,
            cmd: 101,
            body: Bytes::from_static(b"{\"uid\":42}"),
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn response_round_trip() {
        let msg = RockMessage::Response(RockResponse {
            sn: 7,
            result: 409,
            result_str: "gateway mismatch".into(),
            body: Bytes::from_static(b"{}"),
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn notify_round_trip() {
        let msg = RockMessage::Notify(RockNotify {
            cmd: 910,
            body: Bytes::from_static(b"[]"),
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn partial_frame_wants_more() {
        let mut codec = RockCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(
                RockMessage::Notify(RockNotify {
                    cmd: 1,
                    body: Bytes::from_static(b"abcdef"),
                }),
                &mut buf,
            )
            .unwrap();
        let full = buf.clone();

        // Feed one byte at a time; only the final byte yields a frame.
        let mut partial = BytesMut::new();
        for (i, b) in full.iter().enumerate() {
            partial.put_u8(*b);
            let out = codec.decode(&mut partial).unwrap();
            if i + 1 < full.len() {
                assert!(out.is_none());
            } else {
                assert!(out.is_some());
            }
        }
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut codec = RockCodec::default();
        let mut buf = BytesMut::new();
        for sn in [1u32, 2] {
            codec
                .encode(
                    RockMessage::Request(RockRequest {
                        sn,
                        cmd: 5,
                        body: Bytes::new(),
                    }),
                    &mut buf,
                )
                .unwrap();
        }
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        match (first, second) {
            (RockMessage::Request(a), RockMessage::Request(b)) => {
                assert_eq!(a.sn, 1);
                assert_eq!(b.sn, 2);
            },
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn oversize_frame_rejected() {
        let mut codec = RockCodec::with_max_frame(64);
        let mut buf = BytesMut::new();
        buf.put_u32(65);
        buf.put_u8(TAG_NOTIFY);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RockError::FrameTooLarge { len: 65, cap: 64 })
        ));
    }

    #[test]
    fn frame_at_cap_accepted() {
        let mut codec = RockCodec::with_max_frame(1 + 4 + 8);
        let mut buf = BytesMut::new();
        codec
            .encode(
                RockMessage::Notify(RockNotify {
                    cmd: 1,
                    body: Bytes::from_static(b"12345678"),
                }),
                &mut buf,
            )
            .unwrap();
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn short_header_rejected() {
        let mut codec = RockCodec::default();
        let mut buf = BytesMut::new();
        // Declared length 3 cannot hold a request header.
        buf.put_u32(3);
        buf.put_u8(TAG_REQUEST);
        buf.put_u8(0);
        buf.put_u8(0);
        assert!(matches!(codec.decode(&mut buf), Err(RockError::Protocol(_))));
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut codec = RockCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0x7f);
        assert!(matches!(codec.decode(&mut buf), Err(RockError::Protocol(_))));
    }
}
