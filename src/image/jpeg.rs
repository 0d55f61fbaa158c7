use std::{
    env::{self, VarError},
    process,
    sync::OnceLock,
};

use anyhow::bail;
use image::{ImageBuffer, RgbaImage};
use jpeg_decoder::PixelFormat;

use super::Image;

const ENV_VAR_JPEG_BACKEND: &str = "FORMCHECK_JPEG_BACKEND";

/// JPEG decoding backends selectable via `FORMCHECK_JPEG_BACKEND`.
#[derive(Debug, Clone, Copy)]
enum JpegBackend {
    /// Goes through the `image` crate's format detection and decoder.
    Image,
    /// Calls the `jpeg-decoder` crate directly, skipping the `image` crate's extra copy.
    JpegDecoder,
}

const DEFAULT_BACKEND: JpegBackend = JpegBackend::JpegDecoder;

fn backend() -> JpegBackend {
    static BACKEND: OnceLock<JpegBackend> = OnceLock::new();
    *BACKEND.get_or_init(|| {
        let backend = match env::var(ENV_VAR_JPEG_BACKEND).as_deref() {
            Ok("image") => JpegBackend::Image,
            Ok("jpeg-decoder") => JpegBackend::JpegDecoder,
            Err(VarError::NotPresent) => DEFAULT_BACKEND,
            Ok(invalid) => {
                eprintln!(
                    "invalid value set for `{ENV_VAR_JPEG_BACKEND}` variable: '{invalid}'; exiting"
                );
                process::exit(1);
            }
            Err(VarError::NotUnicode(s)) => {
                eprintln!(
                    "invalid value set for `{ENV_VAR_JPEG_BACKEND}` variable: {}; exiting",
                    s.to_string_lossy()
                );
                process::exit(1);
            }
        };
        log::debug!("using JPEG backend {:?}", backend);
        backend
    })
}

pub(super) fn decode_jpeg(data: &[u8]) -> anyhow::Result<Image> {
    let buf = match backend() {
        JpegBackend::Image => {
            image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgba8()
        }
        JpegBackend::JpegDecoder => decode_with_jpeg_decoder(data)?,
    };

    Ok(Image { buf })
}

fn decode_with_jpeg_decoder(data: &[u8]) -> anyhow::Result<RgbaImage> {
    let mut decoder = jpeg_decoder::Decoder::new(data);
    let pixels = decoder.decode()?;
    let Some(info) = decoder.info() else {
        bail!("JPEG decoder returned no image metadata");
    };

    let rgba = match info.pixel_format {
        PixelFormat::RGB24 => pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect::<Vec<_>>(),
        PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l, 255]).collect(),
        other => bail!("unsupported JPEG pixel format {:?}", other),
    };

    match ImageBuffer::from_raw(u32::from(info.width), u32::from(info.height), rgba) {
        Some(buf) => Ok(buf),
        None => bail!(
            "decoded JPEG data does not match its {}x{} size",
            info.width,
            info.height
        ),
    }
}
