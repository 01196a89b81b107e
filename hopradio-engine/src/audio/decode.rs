//! Audio decoding via symphonia.
//!
//! Two entry points: [`decode_bytes`] fully decodes an in-memory blob
//! (rotation tracks and cached offline entries), and
//! [`StreamingDecoder`] pulls packets incrementally from a live byte
//! source (continuous remote streams).
//!
//! All output is interleaved stereo f32; mono sources are duplicated,
//! extra channels are dropped.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Fully decoded audio, stereo interleaved.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

fn probe(
    source: Box<dyn MediaSource>,
    hint_ext: Option<&str>,
) -> Result<(Box<dyn FormatReader>, Box<dyn Decoder>, u32)> {
    let mss = MediaSourceStream::new(source, Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = hint_ext {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("failed to probe format: {e}")))?;
    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("no audio track found".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Decode("sample rate not found".to_string()))?;

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("unsupported codec: {e}")))?;

    debug!(track_id, sample_rate, "audio source probed");
    Ok((format, decoder, sample_rate))
}

/// Collapse an interleaved multi-channel block into stereo.
fn fold_to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            for &s in samples {
                out.push(s);
                out.push(s);
            }
        }
        _ => {
            for frame in samples.chunks_exact(channels) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

/// Decode an entire in-memory blob.
pub fn decode_bytes(data: Vec<u8>, hint_ext: Option<&str>) -> Result<DecodedAudio> {
    let cursor = std::io::Cursor::new(data);
    let (mut format, mut decoder, sample_rate) = probe(Box::new(cursor), hint_ext)?;

    let mut samples = Vec::new();
    let mut buf: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Decode(format!("packet read failed: {e}"))),
        };
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let sbuf = buf.get_or_insert_with(|| {
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                });
                sbuf.copy_interleaved_ref(decoded);
                fold_to_stereo(sbuf.samples(), spec.channels.count(), &mut samples);
            }
            // Corrupt packet; symphonia recovers on the next one.
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "skipping undecodable packet");
            }
            Err(e) => return Err(Error::Decode(format!("decode failed: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Decode("source produced no audio".to_string()));
    }
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Incremental decoder over a live byte source.
pub struct StreamingDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    buf: Option<SampleBuffer<f32>>,
    sample_rate: u32,
}

impl StreamingDecoder {
    /// Probe the source and prepare for packet-by-packet decoding.
    pub fn open(source: Box<dyn MediaSource>, hint_ext: Option<&str>) -> Result<Self> {
        let (format, decoder, sample_rate) = probe(source, hint_ext)?;
        Ok(Self {
            format,
            decoder,
            buf: None,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode the next packet into stereo samples. `Ok(None)` means the
    /// source ended cleanly.
    pub fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(Error::Decode(format!("stream read failed: {e}"))),
            };
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let sbuf = self.buf.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                    });
                    sbuf.copy_interleaved_ref(decoded);
                    let mut out = Vec::with_capacity(sbuf.samples().len());
                    fold_to_stereo(sbuf.samples(), spec.channels.count(), &mut out);
                    return Ok(Some(out));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(error = %e, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("stream decode failed: {e}"))),
            }
        }
    }
}

/// Linear-interpolation resampler for rate mismatches between the
/// source and the output device. Quality is adequate for compressed
/// radio sources; the graph's EQ runs after this.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.len() < 4 {
        return samples.to_vec();
    }
    let in_frames = samples.len() / 2;
    let out_frames = (in_frames as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let mut out = Vec::with_capacity(out_frames * 2);
    for n in 0..out_frames {
        let pos = n as f64 * step;
        let i = pos as usize;
        let frac = (pos - i as f64) as f32;
        let j = (i + 1).min(in_frames - 1);
        for ch in 0..2 {
            let a = samples[i * 2 + ch];
            let b = samples[j * 2 + ch];
            out.push(a + (b - a) * frac);
        }
    }
    out
}
