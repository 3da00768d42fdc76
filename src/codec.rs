//! Streaming zstd primitives behind the seek/cache machinery.
//!
//! Resynchronization points are zstd frame boundaries: a full-sync flush
//! closes the current frame and opens a fresh one, so decoding can start at
//! the byte right after it with a freshly reset decoder. The decoder walks
//! across concatenated frames on its own.

use zstd::stream::raw::{CParameter, DParameter, Decoder, Encoder, InBuffer, Operation, OutBuffer};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FlushMode {
    /// Emit everything buffered so far without ending the frame.
    Pending,
    /// Close the current frame and start a new one.
    FullSync,
    /// Close the last frame; nothing follows.
    EndOfStream,
}

/// Bytes moved by one codec call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Progress {
    pub consumed: usize,
    pub produced: usize,
}

pub(crate) struct BlockEncoder {
    inner: Encoder<'static>,
}

impl BlockEncoder {
    /// `window_log` 0 keeps zstd's default window for `level`.
    pub(crate) fn new(level: i32, window_log: u32) -> Result<Self> {
        let mut inner = Encoder::new(level).map_err(codec_error)?;
        if window_log > 0 {
            inner
                .set_parameter(CParameter::WindowLog(window_log))
                .map_err(codec_error)?;
        }
        Ok(Self { inner })
    }

    pub(crate) fn compress(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let mut input = InBuffer::around(input);
        let mut output = OutBuffer::around(output);
        self.inner.run(&mut input, &mut output).map_err(codec_error)?;
        Ok(Progress {
            consumed: input.pos(),
            produced: output.pos(),
        })
    }

    /// Drain pending output for `mode`. Call until it reports `true`.
    pub(crate) fn flush(&mut self, mode: FlushMode, output: &mut [u8]) -> Result<(usize, bool)> {
        let mut out = OutBuffer::around(output);
        let remaining = match mode {
            FlushMode::Pending => self.inner.flush(&mut out),
            FlushMode::FullSync | FlushMode::EndOfStream => self.inner.finish(&mut out, true),
        }
        .map_err(codec_error)?;
        let produced = out.pos();
        let done = remaining == 0;
        if done && mode == FlushMode::FullSync {
            self.inner.reinit().map_err(codec_error)?;
        }
        Ok((produced, done))
    }
}

pub(crate) struct BlockDecoder {
    inner: Decoder<'static>,
}

impl BlockDecoder {
    /// Frames written with a `window_log` above zstd's default decoder
    /// limit need it raised to match.
    pub(crate) fn new(window_log: u32) -> Result<Self> {
        let mut inner = Decoder::new().map_err(codec_error)?;
        if window_log > 0 {
            inner
                .set_parameter(DParameter::WindowLogMax(window_log))
                .map_err(codec_error)?;
        }
        Ok(Self { inner })
    }

    pub(crate) fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let mut input = InBuffer::around(input);
        let mut output = OutBuffer::around(output);
        self.inner.run(&mut input, &mut output).map_err(codec_error)?;
        Ok(Progress {
            consumed: input.pos(),
            produced: output.pos(),
        })
    }

    /// Drop any partial frame so decoding can restart at a seek point.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.inner.reinit().map_err(codec_error)
    }
}

fn codec_error(err: std::io::Error) -> Error {
    Error::Codec(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frames(chunks: &[&[u8]]) -> Vec<u8> {
        let mut encoder = BlockEncoder::new(3, 0).expect("encoder");
        let mut out = Vec::new();
        let mut scratch = vec![0u8; 1024];
        for (i, chunk) in chunks.iter().enumerate() {
            let mut pos = 0;
            while pos < chunk.len() {
                let progress = encoder.compress(&chunk[pos..], &mut scratch).expect("compress");
                pos += progress.consumed;
                out.extend_from_slice(&scratch[..progress.produced]);
            }
            let mode = if i + 1 == chunks.len() {
                FlushMode::EndOfStream
            } else {
                FlushMode::FullSync
            };
            loop {
                let (produced, done) = encoder.flush(mode, &mut scratch).expect("flush");
                out.extend_from_slice(&scratch[..produced]);
                if done {
                    break;
                }
            }
        }
        out
    }

    fn decode_all(decoder: &mut BlockDecoder, mut input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut scratch = vec![0u8; 512];
        loop {
            let progress = decoder.decompress(input, &mut scratch).expect("decompress");
            input = &input[progress.consumed..];
            out.extend_from_slice(&scratch[..progress.produced]);
            if progress.consumed == 0 && progress.produced == 0 {
                break;
            }
        }
        out
    }

    #[test]
    fn full_sync_frames_decode_back_to_back() {
        let a = vec![b'a'; 3000];
        let b: Vec<u8> = (0..3000).map(|i| (i % 97) as u8).collect();
        let encoded = encode_frames(&[&a, &b]);

        let mut decoder = BlockDecoder::new(0).expect("decoder");
        let decoded = decode_all(&mut decoder, &encoded);
        assert_eq!(decoded.len(), 6000);
        assert_eq!(&decoded[..3000], a.as_slice());
        assert_eq!(&decoded[3000..], b.as_slice());
    }

    #[test]
    fn frames_are_independently_decodable() {
        let a = vec![b'x'; 2000];
        let b = vec![b'y'; 2000];
        let first_only = encode_frames(&[&a]);
        let both = encode_frames(&[&a, &b]);
        // A full-sync frame is byte-identical to the same data closed as end of stream.
        assert_eq!(&both[..first_only.len()], first_only.as_slice());

        let mut decoder = BlockDecoder::new(0).expect("decoder");
        decoder.reset().expect("reset");
        let decoded = decode_all(&mut decoder, &both[first_only.len()..]);
        assert_eq!(decoded, b);
    }

    #[test]
    fn pending_flush_emits_output_inside_one_frame() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();
        let mut encoder = BlockEncoder::new(3, 0).expect("encoder");
        let mut scratch = vec![0u8; 64 * 1024];
        let mut out = Vec::new();

        let progress = encoder.compress(&data, &mut scratch).expect("compress");
        assert_eq!(progress.consumed, data.len());
        out.extend_from_slice(&scratch[..progress.produced]);
        let before = out.len();
        loop {
            let (produced, done) = encoder.flush(FlushMode::Pending, &mut scratch).expect("flush");
            out.extend_from_slice(&scratch[..produced]);
            if done {
                break;
            }
        }
        assert!(out.len() > before);

        // Everything written so far decodes without the frame being closed.
        let mut decoder = BlockDecoder::new(0).expect("decoder");
        assert_eq!(decode_all(&mut decoder, &out), data);

        loop {
            let (produced, done) = encoder
                .flush(FlushMode::EndOfStream, &mut scratch)
                .expect("finish");
            out.extend_from_slice(&scratch[..produced]);
            if done {
                break;
            }
        }
        let mut decoder = BlockDecoder::new(0).expect("decoder");
        assert_eq!(decode_all(&mut decoder, &out), data);
    }

    #[test]
    fn window_log_is_applied_to_both_sides() {
        let data = vec![b'w'; 100_000];
        let mut encoder = BlockEncoder::new(3, 20).expect("encoder");
        let mut scratch = vec![0u8; 64 * 1024];
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let progress = encoder.compress(&data[pos..], &mut scratch).expect("compress");
            pos += progress.consumed;
            out.extend_from_slice(&scratch[..progress.produced]);
        }
        loop {
            let (produced, done) = encoder
                .flush(FlushMode::EndOfStream, &mut scratch)
                .expect("finish");
            out.extend_from_slice(&scratch[..produced]);
            if done {
                break;
            }
        }
        let mut decoder = BlockDecoder::new(20).expect("decoder");
        assert_eq!(decode_all(&mut decoder, &out), data);
        assert!(BlockEncoder::new(3, 99).is_err());
    }
}
