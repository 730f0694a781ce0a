use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context as _, anyhow, bail};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::format::context::Output as OutputContext;
use ffmpeg_next::software::scaling::context::Context as Scaler;
use ffmpeg_next::software::scaling::flag::Flags;
use ffmpeg_next::{Dictionary, Packet, Rational, codec, format, frame, threading};
use image::RgbImage;
use image::imageops::{self, FilterType};
use tracing::{debug, info, trace};

/// MPEG-4 Part 2, the codec behind the `mp4v` fourcc.
const VIDEO_CODEC: codec::Id = codec::Id::MPEG4;
const VIDEO_BIT_RATE: usize = 4_000_000;
const GOP_SIZE: u32 = 12;

static NUM_CPUS: LazyLock<usize> = LazyLock::new(|| {
    let n = num_cpus::get();
    let num = if n > 16 { 16 } else { n };
    info!(num, "Detecting CPU cores");
    num
});

fn setup_video_encoder(
    job_id: &str,
    octx: &mut OutputContext,
    width: u32,
    height: u32,
    fps: i32,
) -> anyhow::Result<(usize, codec::encoder::video::Encoder)> {
    debug!(%job_id, width, height, fps, "Setting up MPEG-4 video encoder...");

    let codec_finder = codec::encoder::find(VIDEO_CODEC)
        .ok_or_else(|| anyhow!("MPEG-4 Encoder: Codec not found"))?;
    let global_header = octx
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);

    let mut enc_config = codec::Context::new_with_codec(codec_finder)
        .encoder()
        .video()
        .map_err(|e| anyhow!("MPEG-4 Encoder: Failed to create config: {e}"))?;

    if global_header {
        enc_config.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    let mut threading_config = threading::Config::default();
    // Slice threads are capped by the number of macroblock rows
    threading_config.count = (*NUM_CPUS).min((height as usize / 16).max(1));
    threading_config.kind = threading::Type::Slice;
    enc_config.set_threading(threading_config);

    enc_config.set_format(Pixel::YUV420P);
    enc_config.set_width(width);
    enc_config.set_height(height);
    enc_config.set_time_base(Rational::new(1, fps));
    enc_config.set_frame_rate(Some(Rational::new(fps, 1)));
    enc_config.set_bit_rate(VIDEO_BIT_RATE);
    enc_config.set_gop(GOP_SIZE);

    let opened_encoder = enc_config
        .open_with(Dictionary::new())
        .map_err(|e| anyhow!("MPEG-4 Encoder: Failed to open: {e}"))?;
    debug!(%job_id, "MPEG-4 video encoder opened successfully.");

    let mut ost_video = octx.add_stream(codec_finder.id())?;
    ost_video.set_parameters(&opened_encoder);
    ost_video.set_time_base(Rational::new(1, fps));
    debug!(%job_id, "Video stream added to output with index {}", ost_video.index());

    Ok((ost_video.index(), opened_encoder))
}

/// Drains every packet the encoder has ready and writes it to the output.
fn write_encoded_packets(
    job_id: &str,
    encoder: &mut codec::encoder::video::Encoder,
    octx: &mut OutputContext,
    stream_index: usize,
    encoder_time_base: Rational,
) -> anyhow::Result<()> {
    let stream_time_base = octx
        .stream(stream_index)
        .ok_or_else(|| anyhow!("Failed to get output stream for index {stream_index}"))?
        .time_base();

    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(encoder_time_base, stream_time_base);
        trace!(%job_id, pts = ?packet.pts(), dts = ?packet.dts(), "Writing video packet");
        packet
            .write_interleaved(octx)
            .map_err(|e| anyhow!("Output: Error writing interleaved video packet: {e}"))?;
    }

    Ok(())
}

/// Copies packed RGB rows into a frame whose lines may be padded.
fn fill_rgb_frame(image: &RgbImage, target: &mut frame::Video) {
    let row_len = image.width() as usize * 3;
    let stride = target.stride(0);
    let data = target.data_mut(0);
    for (y, row) in image.as_raw().chunks_exact(row_len).enumerate() {
        let start = y * stride;
        data[start..start + row_len].copy_from_slice(row);
    }
}

/// Encodes `frames` into an MP4 file at `output`.
///
/// Frames that differ in size from the first one are resized to match it.
pub fn save_frames_as_video(
    job_id: &str,
    frames: &[RgbImage],
    output: &Path,
    fps: u32,
) -> anyhow::Result<()> {
    let Some(first) = frames.first() else {
        bail!("No frames to encode");
    };
    let (width, height) = first.dimensions();
    if width % 2 != 0 || height % 2 != 0 {
        bail!("Frame dimensions must be even for YUV420P, got {width}x{height}");
    }
    let fps = i32::try_from(fps).context("fps out of range")?;
    if fps <= 0 {
        bail!("fps must be greater than 0");
    }

    debug!(%job_id, ?output, frames = frames.len(), fps, "Encoding frames to MP4");
    let mut octx = format::output_as(output, "mp4")
        .map_err(|e| anyhow!("Failed to create output context: {e}"))?;

    let encoder_time_base = Rational::new(1, fps);
    let (stream_index, mut encoder) = setup_video_encoder(job_id, &mut octx, width, height, fps)?;

    octx.write_header()
        .map_err(|e| anyhow!("Output: Failed to write context header: {e}"))?;

    let mut scaler = Scaler::get(
        Pixel::RGB24,
        width,
        height,
        Pixel::YUV420P,
        width,
        height,
        Flags::BILINEAR,
    )?;
    let mut rgb_frame = frame::Video::new(Pixel::RGB24, width, height);
    let mut yuv_frame = frame::Video::empty();

    for (pts, image) in frames.iter().enumerate() {
        if image.dimensions() == (width, height) {
            fill_rgb_frame(image, &mut rgb_frame);
        } else {
            let resized = imageops::resize(image, width, height, FilterType::Triangle);
            fill_rgb_frame(&resized, &mut rgb_frame);
        }

        scaler.run(&rgb_frame, &mut yuv_frame)?;
        yuv_frame.set_pts(Some(pts as i64));
        encoder
            .send_frame(&yuv_frame)
            .map_err(|e| anyhow!("MPEG-4 Encoder: Error sending frame {pts}: {e}"))?;
        write_encoded_packets(job_id, &mut encoder, &mut octx, stream_index, encoder_time_base)?;
    }

    debug!(%job_id, "Sending EOF to video encoder...");
    encoder.send_eof()?;
    write_encoded_packets(job_id, &mut encoder, &mut octx, stream_index, encoder_time_base)?;

    octx.write_trailer()
        .map_err(|e| anyhow!("Output: Failed to write trailer: {e}"))?;
    info!(%job_id, ?output, frames = frames.len(), "Video written");
    Ok(())
}

/// Writes `frame` as the thumbnail; the format follows the file extension.
pub fn save_thumbnail(job_id: &str, frame: &RgbImage, output: &Path) -> anyhow::Result<()> {
    frame
        .save(output)
        .with_context(|| format!("Failed to write thumbnail {}", output.display()))?;
    debug!(%job_id, ?output, "Thumbnail written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frames(count: usize, width: u32, height: u32) -> Vec<RgbImage> {
        (0..count)
            .map(|i| {
                RgbImage::from_fn(width, height, |x, y| {
                    Rgb([(x as usize + i * 8) as u8, y as u8, (i * 20) as u8])
                })
            })
            .collect()
    }

    #[test]
    fn test_save_frames_as_video() {
        ffmpeg_next::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clip.mp4");

        save_frames_as_video("test", &frames(8, 64, 48), &output, 8).unwrap();

        let ictx = format::input(&output).unwrap();
        let stream = ictx.streams().best(ffmpeg_next::media::Type::Video).unwrap();
        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .unwrap()
            .decoder()
            .video()
            .unwrap();
        assert_eq!((decoder.width(), decoder.height()), (64, 48));
        assert_eq!(decoder.id(), VIDEO_CODEC);
    }

    #[test]
    fn test_mismatched_frames_are_resized() {
        ffmpeg_next::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("mixed.mp4");

        let mut clip = frames(3, 32, 32);
        clip.extend(frames(2, 48, 40));
        save_frames_as_video("test", &clip, &output, 4).unwrap();
        assert!(std::fs::metadata(&output).unwrap().len() > 0);
    }

    #[test]
    fn test_rejects_empty_and_odd_input() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("bad.mp4");

        assert!(save_frames_as_video("test", &[], &output, 8).is_err());
        assert!(save_frames_as_video("test", &frames(2, 33, 32), &output, 8).is_err());
        assert!(save_frames_as_video("test", &frames(2, 32, 32), &output, 0).is_err());
    }

    #[test]
    fn test_save_thumbnail_as_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("thumb.jpg");

        save_thumbnail("test", &frames(1, 16, 16)[0], &output).unwrap();
        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(&bytes[..3], &[0xFF, 0xD8, 0xFF]);
    }
}
