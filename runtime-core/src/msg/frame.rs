//! Data messages and audio/video frames

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use super::{Msg, MsgKind, Payload};

/// Pixel layout of a raw video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb24,
    Rgba,
    Bgr24,
    Bgra,
    I420,
    Nv12,
}

/// Unidirectional data message with an opaque payload buffer.
#[derive(Debug, Clone)]
pub struct Data(pub(crate) Msg);

impl Data {
    pub fn new(name: impl Into<String>) -> Self {
        Data(Msg::new(MsgKind::Data, name, Payload::Data { buf: Bytes::new() }))
    }

    pub fn buf(&self) -> &Bytes {
        match &self.0.payload {
            Payload::Data { buf } => buf,
            _ => unreachable!("data payload"),
        }
    }

    pub fn set_buf(&mut self, buf: Bytes) {
        if let Payload::Data { buf: slot } = &mut self.0.payload {
            *slot = buf;
        }
    }

    pub(crate) fn from_msg(msg: Msg) -> Self {
        debug_assert_eq!(msg.kind, MsgKind::Data);
        Data(msg)
    }

    pub(crate) fn into_msg(self) -> Msg {
        self.0
    }
}

impl From<Data> for Msg {
    fn from(data: Data) -> Msg {
        data.0
    }
}

impl Deref for Data {
    type Target = Msg;
    fn deref(&self) -> &Msg {
        &self.0
    }
}

impl DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Msg {
        &mut self.0
    }
}

/// PCM audio frame.
#[derive(Debug, Clone)]
pub struct AudioFrame(pub(crate) Msg);

impl AudioFrame {
    pub fn new(name: impl Into<String>) -> Self {
        AudioFrame(Msg::new(
            MsgKind::AudioFrame,
            name,
            Payload::AudioFrame {
                buf: Bytes::new(),
                sample_rate: 0,
                channels: 0,
                samples_per_channel: 0,
                timestamp_us: 0,
            },
        ))
    }

    pub fn buf(&self) -> &Bytes {
        match &self.0.payload {
            Payload::AudioFrame { buf, .. } => buf,
            _ => unreachable!("audio payload"),
        }
    }

    pub fn set_buf(&mut self, data: Bytes) {
        if let Payload::AudioFrame { buf, .. } = &mut self.0.payload {
            *buf = data;
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self.0.payload {
            Payload::AudioFrame { sample_rate, .. } => sample_rate,
            _ => 0,
        }
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        if let Payload::AudioFrame { sample_rate, .. } = &mut self.0.payload {
            *sample_rate = rate;
        }
    }

    pub fn channels(&self) -> u32 {
        match self.0.payload {
            Payload::AudioFrame { channels, .. } => channels,
            _ => 0,
        }
    }

    pub fn set_channels(&mut self, n: u32) {
        if let Payload::AudioFrame { channels, .. } = &mut self.0.payload {
            *channels = n;
        }
    }

    pub fn samples_per_channel(&self) -> u32 {
        match self.0.payload {
            Payload::AudioFrame {
                samples_per_channel,
                ..
            } => samples_per_channel,
            _ => 0,
        }
    }

    pub fn set_samples_per_channel(&mut self, n: u32) {
        if let Payload::AudioFrame {
            samples_per_channel,
            ..
        } = &mut self.0.payload
        {
            *samples_per_channel = n;
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        match self.0.payload {
            Payload::AudioFrame { timestamp_us, .. } => timestamp_us,
            _ => 0,
        }
    }

    pub fn set_timestamp_us(&mut self, ts: u64) {
        if let Payload::AudioFrame { timestamp_us, .. } = &mut self.0.payload {
            *timestamp_us = ts;
        }
    }

    pub(crate) fn from_msg(msg: Msg) -> Self {
        debug_assert_eq!(msg.kind, MsgKind::AudioFrame);
        AudioFrame(msg)
    }

    pub(crate) fn into_msg(self) -> Msg {
        self.0
    }
}

impl From<AudioFrame> for Msg {
    fn from(frame: AudioFrame) -> Msg {
        frame.0
    }
}

impl Deref for AudioFrame {
    type Target = Msg;
    fn deref(&self) -> &Msg {
        &self.0
    }
}

impl DerefMut for AudioFrame {
    fn deref_mut(&mut self) -> &mut Msg {
        &mut self.0
    }
}

/// Video frame, raw or encoded.
#[derive(Debug, Clone)]
pub struct VideoFrame(pub(crate) Msg);

impl VideoFrame {
    pub fn new(name: impl Into<String>) -> Self {
        VideoFrame(Msg::new(
            MsgKind::VideoFrame,
            name,
            Payload::VideoFrame {
                buf: Bytes::new(),
                width: 0,
                height: 0,
                pixel_format: PixelFormat::Rgb24,
                timestamp_us: 0,
            },
        ))
    }

    pub fn buf(&self) -> &Bytes {
        match &self.0.payload {
            Payload::VideoFrame { buf, .. } => buf,
            _ => unreachable!("video payload"),
        }
    }

    pub fn set_buf(&mut self, data: Bytes) {
        if let Payload::VideoFrame { buf, .. } = &mut self.0.payload {
            *buf = data;
        }
    }

    pub fn width(&self) -> u32 {
        match self.0.payload {
            Payload::VideoFrame { width, .. } => width,
            _ => 0,
        }
    }

    pub fn height(&self) -> u32 {
        match self.0.payload {
            Payload::VideoFrame { height, .. } => height,
            _ => 0,
        }
    }

    pub fn set_dimensions(&mut self, w: u32, h: u32) {
        if let Payload::VideoFrame { width, height, .. } = &mut self.0.payload {
            *width = w;
            *height = h;
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        match self.0.payload {
            Payload::VideoFrame { pixel_format, .. } => pixel_format,
            _ => PixelFormat::Rgb24,
        }
    }

    pub fn set_pixel_format(&mut self, format: PixelFormat) {
        if let Payload::VideoFrame { pixel_format, .. } = &mut self.0.payload {
            *pixel_format = format;
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        match self.0.payload {
            Payload::VideoFrame { timestamp_us, .. } => timestamp_us,
            _ => 0,
        }
    }

    pub fn set_timestamp_us(&mut self, ts: u64) {
        if let Payload::VideoFrame { timestamp_us, .. } = &mut self.0.payload {
            *timestamp_us = ts;
        }
    }

    pub(crate) fn from_msg(msg: Msg) -> Self {
        debug_assert_eq!(msg.kind, MsgKind::VideoFrame);
        VideoFrame(msg)
    }

    pub(crate) fn into_msg(self) -> Msg {
        self.0
    }
}

impl From<VideoFrame> for Msg {
    fn from(frame: VideoFrame) -> Msg {
        frame.0
    }
}

impl Deref for VideoFrame {
    type Target = Msg;
    fn deref(&self) -> &Msg {
        &self.0
    }
}

impl DerefMut for VideoFrame {
    fn deref_mut(&mut self) -> &mut Msg {
        &mut self.0
    }
}
