//! Fixture archives and images, generated in memory.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::{Cursor, Write};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// A `width` x `height` image whose pixels depend on `seed`, so different
/// seeds give different bytes.
fn image(width: u32, height: u32, seed: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([seed, (x % 256) as u8, (y % 256) as u8])
    }))
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

pub(crate) fn png(width: u32, height: u32, seed: u8) -> Vec<u8> {
    encode(&image(width, height, seed), ImageFormat::Png)
}

pub(crate) fn jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    encode(&image(width, height, seed), ImageFormat::Jpeg)
}

pub(crate) fn gif(width: u32, height: u32, seed: u8) -> Vec<u8> {
    encode(&DynamicImage::ImageRgba8(image(width, height, seed).to_rgba8()), ImageFormat::Gif)
}

/// Lossless, the only WebP flavour `image` can encode.
pub(crate) fn webp(width: u32, height: u32, seed: u8) -> Vec<u8> {
    encode(&DynamicImage::ImageRgba8(image(width, height, seed).to_rgba8()), ImageFormat::WebP)
}

pub(crate) fn bmp(width: u32, height: u32, seed: u8) -> Vec<u8> {
    encode(&image(width, height, seed), ImageFormat::Bmp)
}

/// Builds a ZIP archive in memory. Entries are written in call order.
pub(crate) struct ZipBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl ZipBuilder {
    pub(crate) fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        }
    }

    pub(crate) fn deflated(mut self) -> Self {
        self.options = self.options.compression_method(CompressionMethod::Deflated);
        self
    }

    pub(crate) fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.writer.start_file(name, self.options).unwrap();
        self.writer.write_all(data).unwrap();
        self
    }

    pub(crate) fn directory(mut self, name: &str) -> Self {
        self.writer.add_directory(name, self.options).unwrap();
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.writer.finish().unwrap().into_inner()
    }
}

/// A chapter archive of valid PNG pages, one per name, each with distinct
/// pixels.
pub(crate) fn chapter_zip(names: &[&str]) -> Vec<u8> {
    names
        .iter()
        .enumerate()
        .fold(ZipBuilder::new(), |builder, (i, name)| builder.file(name, &png(10, 10, i as u8)))
        .finish()
}
