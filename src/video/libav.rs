//! In-process decoding through the libav bindings.

use std::path::Path;

use ffmpeg::decoder::video::Video as VideoDecoder;
use ffmpeg::format::context::Input;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::{format::pixel::Pixel, frame::video::Video};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use tracing::instrument;

use crate::{ForgeError, ForgeResult};

use super::reader::{VideoOpener, VideoReader};

#[derive(Debug, Default, Clone, Copy)]
pub struct LibavOpener;

impl VideoOpener for LibavOpener {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn open(&self, path: &Path) -> ForgeResult<Box<dyn VideoReader>> {
        ffmpeg::init().map_err(|err| ForgeError::Video(format!("ffmpeg init failed: {err}")))?;

        let input = ffmpeg::format::input(&path)
            .map_err(|err| decode_error(path, format!("open failed: {err}")))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| decode_error(path, "no video stream found".to_string()))?;
        let stream_index = stream.index();
        let frame_rate = f64::from(stream.avg_frame_rate());
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Err(decode_error(path, "unknown frame rate".to_string()));
        }

        let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|err| ForgeError::Video(format!("codec context: {err}")))?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .map_err(|err| ForgeError::Video(format!("video decoder: {err}")))?;

        Ok(Box::new(LibavReader {
            input,
            decoder,
            stream_index,
            frame_rate,
            decoded: Video::empty(),
            converted: Video::empty(),
            flushed: false,
        }))
    }
}

/// Reader pulling packets on demand and decoding them with libavcodec.
pub struct LibavReader {
    input: Input,
    decoder: VideoDecoder,
    stream_index: usize,
    frame_rate: f64,
    decoded: Video,
    converted: Video,
    flushed: bool,
}

impl VideoReader for LibavReader {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn grab(&mut self) -> ForgeResult<bool> {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => return Ok(true),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {}
                Err(ffmpeg::Error::Eof) => return Ok(false),
                Err(err) => return Err(ForgeError::Video(format!("receive frame: {err}"))),
            }
            if self.flushed {
                return Ok(false);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|err| ForgeError::Video(format!("send packet: {err}")))?,
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.decoder
                        .send_eof()
                        .map_err(|err| ForgeError::Video(format!("send eof: {err}")))?;
                    self.flushed = true;
                }
                Err(err) => return Err(ForgeError::Video(format!("read packet: {err}"))),
            }
        }
    }

    fn retrieve(&mut self) -> ForgeResult<RgbImage> {
        // Built per retrieved frame; the sws context is not Send.
        let mut scaler = Scaler::get(
            self.decoded.format(),
            self.decoded.width(),
            self.decoded.height(),
            Pixel::RGB24,
            self.decoded.width(),
            self.decoded.height(),
            Flags::BILINEAR,
        )
        .map_err(|err| ForgeError::Video(format!("scaler init failed: {err}")))?;
        self.converted.set_format(Pixel::RGB24);
        self.converted.set_width(self.decoded.width());
        self.converted.set_height(self.decoded.height());
        scaler
            .run(&self.decoded, &mut self.converted)
            .map_err(|err| ForgeError::Video(format!("scale frame: {err}")))?;

        let width = self.converted.width();
        let height = self.converted.height();
        let stride = self.converted.stride(0);
        let row = width as usize * 3;
        let plane = self.converted.data(0);
        if plane.len() < stride * height as usize {
            return Err(ForgeError::Video(
                "decoded plane smaller than expected".to_string(),
            ));
        }

        let mut bytes = Vec::with_capacity(row * height as usize);
        for line in plane.chunks(stride).take(height as usize) {
            bytes.extend_from_slice(&line[..row]);
        }
        RgbImage::from_raw(width, height, bytes)
            .ok_or_else(|| ForgeError::Video("frame buffer size mismatch".to_string()))
    }
}

fn decode_error(path: &Path, message: String) -> ForgeError {
    ForgeError::Video(format!("{}: {message}", path.display()))
}
