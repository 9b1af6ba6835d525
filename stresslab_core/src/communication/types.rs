//! Value types shared by every transport: sample formats, endpoint
//! descriptions, resolve filters and multiplexed chunk buffers.

use crate::error::{StressError, StressResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nominal rate of a stream without a fixed sampling frequency.
pub const IRREGULAR_RATE: f64 = 0.0;

/// Value every numeric buffer is pre-filled with.
const FILL_VALUE: f64 = 17.3;

/// Value every string buffer is pre-filled with.
const FILL_STRING: &str = "test";

/// Closed set of per-channel sample formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelFormat {
    Int8,
    Int16,
    Int32,
    Float32,
    Double64,
    String,
}

impl ChannelFormat {
    /// All formats, in a stable order.
    pub const ALL: [ChannelFormat; 6] = [
        ChannelFormat::Int8,
        ChannelFormat::Int16,
        ChannelFormat::Int32,
        ChannelFormat::Float32,
        ChannelFormat::Double64,
        ChannelFormat::String,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelFormat::Int8 => "int8",
            ChannelFormat::Int16 => "int16",
            ChannelFormat::Int32 => "int32",
            ChannelFormat::Float32 => "float32",
            ChannelFormat::Double64 => "double64",
            ChannelFormat::String => "string",
        }
    }
}

impl fmt::Display for ChannelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelFormat {
    type Err = StressError;

    fn from_str(s: &str) -> StressResult<Self> {
        ChannelFormat::ALL
            .iter()
            .copied()
            .find(|fmt| fmt.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StressError::InvalidInput(format!("unknown channel format '{}'", s)))
    }
}

/// Immutable description of one published stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    /// Content type tag (e.g. "EEG")
    pub stream_type: String,
    pub channel_count: u32,
    pub channel_format: ChannelFormat,
    /// Samples per second; [`IRREGULAR_RATE`] for irregular streams
    pub nominal_srate: f64,
    /// Unique per instance, so two streams with equal name/type stay distinct
    pub source_id: String,
}

impl EndpointConfig {
    /// Create a config with a fresh unique source id.
    pub fn new(
        name: impl Into<String>,
        stream_type: impl Into<String>,
        channel_count: u32,
        nominal_srate: f64,
        channel_format: ChannelFormat,
    ) -> Self {
        Self {
            name: name.into(),
            stream_type: stream_type.into(),
            channel_count,
            channel_format,
            nominal_srate,
            source_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn is_irregular(&self) -> bool {
        self.nominal_srate <= IRREGULAR_RATE
    }

    /// Short label used in log lines.
    pub fn label(&self) -> String {
        format!(
            "{}({},{},{},{})",
            self.name, self.stream_type, self.channel_count, self.channel_format, self.nominal_srate
        )
    }
}

/// What a consumer resolves streams by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveFilter {
    Name(String),
    Type(String),
}

impl ResolveFilter {
    pub fn matches(&self, config: &EndpointConfig) -> bool {
        match self {
            ResolveFilter::Name(name) => &config.name == name,
            ResolveFilter::Type(ty) => &config.stream_type == ty,
        }
    }
}

impl fmt::Display for ResolveFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveFilter::Name(name) => write!(f, "name='{}'", name),
            ResolveFilter::Type(ty) => write!(f, "type='{}'", ty),
        }
    }
}

/// Typed storage behind a [`ChunkBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Double64(Vec<f64>),
    String(Vec<String>),
}

macro_rules! chunk_data_dispatch {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ChunkData::Int8($v) => $body,
            ChunkData::Int16($v) => $body,
            ChunkData::Int32($v) => $body,
            ChunkData::Float32($v) => $body,
            ChunkData::Double64($v) => $body,
            ChunkData::String($v) => $body,
        }
    };
}

/// Multiplexed (sample-major) buffer: sample `i`, channel `c` lives at
/// index `i * channels + c`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkBuffer {
    channels: usize,
    data: ChunkData,
}

impl ChunkBuffer {
    /// Allocate a buffer holding `samples` samples of `channels` channels,
    /// pre-filled with a constant.
    pub fn filled(format: ChannelFormat, channels: usize, samples: usize) -> Self {
        let channels = channels.max(1);
        let len = channels * samples;
        let data = match format {
            ChannelFormat::Int8 => ChunkData::Int8(vec![FILL_VALUE as i8; len]),
            ChannelFormat::Int16 => ChunkData::Int16(vec![FILL_VALUE as i16; len]),
            ChannelFormat::Int32 => ChunkData::Int32(vec![FILL_VALUE as i32; len]),
            ChannelFormat::Float32 => ChunkData::Float32(vec![FILL_VALUE as f32; len]),
            ChannelFormat::Double64 => ChunkData::Double64(vec![FILL_VALUE; len]),
            ChannelFormat::String => ChunkData::String(vec![FILL_STRING.to_string(); len]),
        };
        Self { channels, data }
    }

    pub fn format(&self) -> ChannelFormat {
        match self.data {
            ChunkData::Int8(_) => ChannelFormat::Int8,
            ChunkData::Int16(_) => ChannelFormat::Int16,
            ChunkData::Int32(_) => ChannelFormat::Int32,
            ChunkData::Float32(_) => ChannelFormat::Float32,
            ChunkData::Double64(_) => ChannelFormat::Double64,
            ChunkData::String(_) => ChannelFormat::String,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &ChunkData {
        &self.data
    }

    /// Number of whole samples the buffer holds.
    pub fn capacity_samples(&self) -> usize {
        let len = chunk_data_dispatch!(&self.data, v => v.len());
        len / self.channels
    }

    /// Copy `samples` samples starting at `start` into a new buffer.
    pub fn slice(&self, start: usize, samples: usize) -> StressResult<ChunkBuffer> {
        self.check_range(start, samples)?;
        let (lo, hi) = (start * self.channels, (start + samples) * self.channels);
        let data = match &self.data {
            ChunkData::Int8(v) => ChunkData::Int8(v[lo..hi].to_vec()),
            ChunkData::Int16(v) => ChunkData::Int16(v[lo..hi].to_vec()),
            ChunkData::Int32(v) => ChunkData::Int32(v[lo..hi].to_vec()),
            ChunkData::Float32(v) => ChunkData::Float32(v[lo..hi].to_vec()),
            ChunkData::Double64(v) => ChunkData::Double64(v[lo..hi].to_vec()),
            ChunkData::String(v) => ChunkData::String(v[lo..hi].to_vec()),
        };
        Ok(ChunkBuffer {
            channels: self.channels,
            data,
        })
    }

    /// Copy `samples` samples from `src[src_start..]` into `self[dst_start..]`.
    ///
    /// Both buffers must share format and channel count.
    pub fn copy_from(
        &mut self,
        dst_start: usize,
        src: &ChunkBuffer,
        src_start: usize,
        samples: usize,
    ) -> StressResult<()> {
        if src.channels != self.channels {
            return Err(StressError::InvalidInput(format!(
                "channel count mismatch: {} vs {}",
                src.channels, self.channels
            )));
        }
        self.check_range(dst_start, samples)?;
        src.check_range(src_start, samples)?;

        let ch = self.channels;
        let (dlo, dhi) = (dst_start * ch, (dst_start + samples) * ch);
        let (slo, shi) = (src_start * ch, (src_start + samples) * ch);
        match (&mut self.data, &src.data) {
            (ChunkData::Int8(d), ChunkData::Int8(s)) => d[dlo..dhi].copy_from_slice(&s[slo..shi]),
            (ChunkData::Int16(d), ChunkData::Int16(s)) => {
                d[dlo..dhi].copy_from_slice(&s[slo..shi])
            }
            (ChunkData::Int32(d), ChunkData::Int32(s)) => {
                d[dlo..dhi].copy_from_slice(&s[slo..shi])
            }
            (ChunkData::Float32(d), ChunkData::Float32(s)) => {
                d[dlo..dhi].copy_from_slice(&s[slo..shi])
            }
            (ChunkData::Double64(d), ChunkData::Double64(s)) => {
                d[dlo..dhi].copy_from_slice(&s[slo..shi])
            }
            (ChunkData::String(d), ChunkData::String(s)) => {
                d[dlo..dhi].clone_from_slice(&s[slo..shi])
            }
            _ => {
                return Err(StressError::InvalidInput(format!(
                    "format mismatch: {} vs {}",
                    src.format(),
                    self.format()
                )))
            }
        }
        Ok(())
    }

    fn check_range(&self, start: usize, samples: usize) -> StressResult<()> {
        let capacity = self.capacity_samples();
        if start + samples > capacity {
            return Err(StressError::InvalidInput(format!(
                "sample range {}..{} exceeds buffer capacity {}",
                start,
                start + samples,
                capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_buffer_shape() {
        let buf = ChunkBuffer::filled(ChannelFormat::Int16, 4, 25);
        assert_eq!(buf.channels(), 4);
        assert_eq!(buf.capacity_samples(), 25);
        assert_eq!(buf.format(), ChannelFormat::Int16);
        match buf.data() {
            ChunkData::Int16(v) => assert!(v.iter().all(|&x| x == 17)),
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn test_copy_from_rejects_format_mismatch() {
        let mut dst = ChunkBuffer::filled(ChannelFormat::Float32, 2, 4);
        let src = ChunkBuffer::filled(ChannelFormat::Double64, 2, 4);
        assert!(dst.copy_from(0, &src, 0, 2).is_err());
    }

    #[test]
    fn test_copy_from_rejects_overflow() {
        let mut dst = ChunkBuffer::filled(ChannelFormat::String, 3, 2);
        let src = ChunkBuffer::filled(ChannelFormat::String, 3, 5);
        assert!(dst.copy_from(0, &src, 0, 3).is_err());
        assert!(dst.copy_from(1, &src, 4, 1).is_ok());
    }

    #[test]
    fn test_slice_copies_requested_samples() {
        let buf = ChunkBuffer::filled(ChannelFormat::Int32, 3, 10);
        let part = buf.slice(2, 5).unwrap();
        assert_eq!(part.capacity_samples(), 5);
        assert!(buf.slice(8, 5).is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("FLOAT32".parse::<ChannelFormat>().unwrap(), ChannelFormat::Float32);
        assert!("float16".parse::<ChannelFormat>().is_err());
    }

    #[test]
    fn test_resolve_filter_matching() {
        let cfg = EndpointConfig::new("Test1", "EEG", 8, 250.0, ChannelFormat::Float32);
        assert!(ResolveFilter::Type("EEG".into()).matches(&cfg));
        assert!(ResolveFilter::Name("Test1".into()).matches(&cfg));
        assert!(!ResolveFilter::Type("Audio".into()).matches(&cfg));
    }

    #[test]
    fn test_source_ids_are_unique() {
        let a = EndpointConfig::new("Test1", "EEG", 1, 10.0, ChannelFormat::Int8);
        let b = EndpointConfig::new("Test1", "EEG", 1, 10.0, ChannelFormat::Int8);
        assert_ne!(a.source_id, b.source_id);
    }
}
