use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

use anyhow::{anyhow, bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView};
use log::{debug, warn};
use lopdf::{Document, Object, ObjectId, Stream};
use rayon::prelude::*;

use super::Transform;
use crate::intake::InputItem;
use crate::quality::EngineParam;

/// Shrinks a PDF by re-encoding its embedded raster images as JPEG.
///
/// Images with a soft mask are split: colour goes to JPEG, the mask is
/// re-deflated as 8-bit gray. Palette images are expanded through their
/// lookup table. Images in a space that JPEG cannot carry (Separation,
/// DeviceN, Lab) or with a remapping `/Decode` are left as they are.
#[derive(Debug, Clone)]
pub struct PdfImageRecompressor {
    max_dim: u32,
}

impl PdfImageRecompressor {
    pub const DEFAULT_MAX_DIM: u32 = 1500;

    pub fn new(max_dim: u32) -> Self {
        Self { max_dim }
    }
}

impl Default for PdfImageRecompressor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_DIM)
    }
}

impl Transform for PdfImageRecompressor {
    fn name(&self) -> &str {
        "pdf-images"
    }

    fn transform(&mut self, item: &InputItem, param: EngineParam) -> Result<Vec<u8>> {
        let quality = param
            .jpeg_quality()
            .with_context(|| format!("PDF engine cannot use {}", param))?;

        let mut doc =
            Document::load_from(Cursor::new(item.bytes())).context("Failed to load PDF")?;

        if doc.is_encrypted() {
            if let Err(e) = doc.decrypt(b"") {
                warn!("{}: could not decrypt with empty password: {:?}", item.name(), e);
            }
        }

        let mut recompressed = 0usize;
        for (object_id, smask_id) in image_objects(&doc) {
            match recompress_image(&mut doc, object_id, smask_id, quality, self.max_dim) {
                Ok(actions) => {
                    debug!("{}: image {}: {}", item.name(), object_id.0, actions);
                    recompressed += 1;
                }
                Err(e) => debug!("{}: skipped image {}: {:#}", item.name(), object_id.0, e),
            }
        }

        if recompressed == 0 {
            bail!("No recompressible images in {}", item.name());
        }

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).context("Failed to save PDF")?;
        Ok(buffer)
    }
}

/// Image XObjects paired with their soft mask, masks themselves excluded.
fn image_objects(doc: &Document) -> Vec<(ObjectId, Option<ObjectId>)> {
    let mut masks = HashSet::new();
    let mut images = Vec::new();

    for (id, object) in &doc.objects {
        let Object::Stream(stream) = object else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(|o| o.as_name())
            .map(|name| name == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let smask = match stream.dict.get(b"SMask") {
            Ok(Object::Reference(sid)) => Some(*sid),
            _ => None,
        };
        if let Some(sid) = smask {
            masks.insert(sid);
        }
        images.push((*id, smask));
    }

    images.retain(|(id, _)| !masks.contains(id));
    images
}

/// Follows indirect references in `Filter`/`DecodeParms` so lopdf can decode.
fn resolve_indirect(doc: &mut Document, object_id: ObjectId, key: &[u8]) {
    let resolved = match doc.objects.get(&object_id) {
        Some(Object::Stream(stream)) => match stream.dict.get(key) {
            Ok(Object::Reference(id)) => Some(doc.objects.get(id).cloned().unwrap_or(Object::Null)),
            Ok(Object::Array(arr)) if arr.iter().any(|o| matches!(o, Object::Reference(_))) => {
                Some(Object::Array(
                    arr.iter()
                        .map(|o| match o {
                            Object::Reference(id) => doc.objects.get(id).cloned().unwrap_or(o.clone()),
                            other => other.clone(),
                        })
                        .collect(),
                ))
            }
            _ => None,
        },
        _ => None,
    };

    if let (Some(value), Some(Object::Stream(stream))) = (resolved, doc.objects.get_mut(&object_id))
    {
        stream.dict.set(key.to_vec(), value);
    }
}

fn filter_names(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|o| match o {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Raw sample bytes of a stream, with a manual zlib pass when lopdf refuses.
fn decode_stream(stream: &Stream) -> Result<Vec<u8>> {
    let filters = filter_names(stream);
    if filters.is_empty() {
        return Ok(stream.content.clone());
    }

    match stream.decompressed_content() {
        Ok(content) => Ok(content),
        Err(e) if filters.iter().all(|f| f == b"FlateDecode") => {
            let mut decoder = flate2::read::ZlibDecoder::new(&stream.content[..]);
            let mut buffer = Vec::new();
            decoder
                .read_to_end(&mut buffer)
                .with_context(|| format!("Manual zlib failed after {:?}", e))?;
            Ok(buffer)
        }
        Err(e) => Err(anyhow!("Decompression failed: {:?}", e)),
    }
}

fn dimension(stream: &Stream, key: &[u8]) -> u32 {
    stream
        .dict
        .get(key)
        .and_then(|o| o.as_i64())
        .unwrap_or(0)
        .max(0) as u32
}

fn cmyk_to_rgb(content: &[u8]) -> Vec<u8> {
    content
        .par_chunks(4)
        .flat_map_iter(|cmyk| {
            if cmyk.len() < 4 {
                return [0, 0, 0];
            }
            let k = 1.0 - cmyk[3] as f32 / 255.0;
            let channel = |v: u8| ((1.0 - v as f32 / 255.0) * k * 255.0) as u8;
            [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
        })
        .collect()
}

/// How an image's samples turn into colour.
#[derive(Debug, Clone, PartialEq)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    /// One byte per pixel into `palette`, which holds `hival + 1` entries
    /// of the base model.
    Indexed {
        base: Box<ColorModel>,
        hival: u8,
        palette: Vec<u8>,
    },
}

impl ColorModel {
    fn components(&self) -> usize {
        match self {
            ColorModel::Gray => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
            ColorModel::Indexed { .. } => 1,
        }
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object> {
    match object {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| anyhow!("Dangling reference {:?}: {:?}", id, e)),
        other => Ok(other),
    }
}

fn color_model(doc: &Document, object: &Object) -> Result<ColorModel> {
    match resolve(doc, object)? {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(ColorModel::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(ColorModel::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorModel::Cmyk),
            other => bail!("Unsupported colour space /{}", String::from_utf8_lossy(other)),
        },
        Object::Array(parts) => {
            let family = match parts.first().map(|o| resolve(doc, o)) {
                Some(Ok(Object::Name(name))) => name.as_slice(),
                _ => bail!("Malformed colour space array"),
            };
            match family {
                b"CalGray" => Ok(ColorModel::Gray),
                b"CalRGB" => Ok(ColorModel::Rgb),
                b"ICCBased" => {
                    let profile = match parts.get(1).map(|o| resolve(doc, o)) {
                        Some(Ok(Object::Stream(s))) => s,
                        _ => bail!("ICCBased without a profile stream"),
                    };
                    match profile.dict.get(b"N").and_then(|o| o.as_i64()) {
                        Ok(1) => Ok(ColorModel::Gray),
                        Ok(3) => Ok(ColorModel::Rgb),
                        Ok(4) => Ok(ColorModel::Cmyk),
                        _ => bail!("ICCBased profile with unsupported /N"),
                    }
                }
                b"Indexed" | b"I" => indexed_model(doc, parts),
                other => bail!("Unsupported colour space /{}", String::from_utf8_lossy(other)),
            }
        }
        _ => bail!("Malformed colour space"),
    }
}

/// `[/Indexed base hival lookup]`
fn indexed_model(doc: &Document, parts: &[Object]) -> Result<ColorModel> {
    let [_, base, hival, lookup] = parts else {
        bail!("Indexed colour space needs four entries");
    };
    let base = color_model(doc, base)?;
    if matches!(base, ColorModel::Indexed { .. }) {
        bail!("Indexed colour space over another Indexed space");
    }
    let hival = match resolve(doc, hival)?.as_i64() {
        Ok(v @ 0..=255) => v as u8,
        _ => bail!("Indexed hival out of range"),
    };
    let palette = match resolve(doc, lookup)? {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(s) => decode_stream(s).context("Failed to decode palette")?,
        _ => bail!("Indexed lookup is neither a string nor a stream"),
    };

    let needed = (hival as usize + 1) * base.components();
    if palette.len() < needed {
        bail!("Palette holds {} bytes, needs {}", palette.len(), needed);
    }
    Ok(ColorModel::Indexed {
        base: Box::new(base),
        hival,
        palette,
    })
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// Fails on any `/Decode` that remaps samples; the re-encoded image could
/// not carry it.
fn check_decode(doc: &Document, stream: &Stream, model: &ColorModel) -> Result<()> {
    let ranges = match stream.dict.get(b"Decode") {
        Ok(object) => match resolve(doc, object)? {
            Object::Array(ranges) => ranges,
            Object::Null => return Ok(()),
            _ => bail!("Malformed /Decode"),
        },
        Err(_) => return Ok(()),
    };
    let high = match model {
        ColorModel::Indexed { .. } => {
            let bits = dimension(stream, b"BitsPerComponent").clamp(1, 16);
            ((1u32 << bits) - 1) as f64
        }
        _ => 1.0,
    };
    let identity = ranges.len() == model.components() * 2
        && ranges.chunks(2).all(|pair| {
            matches!(
                (number(&pair[0]), number(&pair[1])),
                (Some(lo), Some(hi)) if lo == 0.0 && hi == high
            )
        });
    if !identity {
        bail!("Non-identity /Decode");
    }
    Ok(())
}

fn samples_to_image(
    model: &ColorModel,
    width: u32,
    height: u32,
    content: Vec<u8>,
) -> Option<DynamicImage> {
    match model {
        ColorModel::Gray => image::GrayImage::from_raw(width, height, content).map(DynamicImage::ImageLuma8),
        ColorModel::Rgb => image::RgbImage::from_raw(width, height, content).map(DynamicImage::ImageRgb8),
        ColorModel::Cmyk => {
            if content.len() % 4 != 0 {
                return None;
            }
            image::RgbImage::from_raw(width, height, cmyk_to_rgb(&content)).map(DynamicImage::ImageRgb8)
        }
        ColorModel::Indexed { base, hival, palette } => {
            let n = base.components();
            let (hival, palette) = (*hival, palette.as_slice());
            let expanded: Vec<u8> = content
                .iter()
                .flat_map(move |&index| {
                    let at = index.min(hival) as usize * n;
                    palette[at..at + n].iter().copied()
                })
                .collect();
            samples_to_image(base, width, height, expanded)
        }
    }
}

fn decode_image(
    doc: &Document,
    stream: &Stream,
    content: Vec<u8>,
    is_jpeg: bool,
) -> Result<DynamicImage> {
    if stream.dict.get(b"ImageMask").and_then(|o| o.as_bool()).unwrap_or(false) {
        bail!("Stencil masks are left alone");
    }
    let model = match stream.dict.get(b"ColorSpace") {
        Ok(object) => color_model(doc, object)?,
        Err(_) => bail!("Image without a colour space"),
    };
    check_decode(doc, stream, &model)?;

    if is_jpeg {
        if matches!(model, ColorModel::Indexed { .. }) {
            bail!("Indexed colour space on a JPEG stream");
        }
        return image::load_from_memory(&content).context("Failed to decode embedded JPEG");
    }

    if dimension(stream, b"BitsPerComponent") != 8 {
        bail!("Unsupported bit depth");
    }

    let width = dimension(stream, b"Width");
    let height = dimension(stream, b"Height");
    samples_to_image(&model, width, height, content).ok_or_else(|| {
        anyhow!("Sample data does not match {}x{} in {:?}", width, height, model)
    })
}

fn recompress_image(
    doc: &mut Document,
    object_id: ObjectId,
    smask_id: Option<ObjectId>,
    quality: u8,
    max_dim: u32,
) -> Result<String> {
    resolve_indirect(doc, object_id, b"Filter");
    resolve_indirect(doc, object_id, b"DecodeParms");

    let mut actions = Vec::new();

    let mut img = {
        let stream = match doc.objects.get(&object_id) {
            Some(Object::Stream(s)) => s,
            _ => bail!("Object not a stream"),
        };
        let is_jpeg = filter_names(stream).iter().any(|f| f == b"DCTDecode");
        let content = if is_jpeg {
            actions.push("was JPEG".to_string());
            // lopdf does not decode DCT; the raw content is the JPEG file
            stream.content.clone()
        } else {
            decode_stream(stream)?
        };
        decode_image(doc, stream, content, is_jpeg)?
    };

    if let Some(smask_id) = smask_id {
        let mask = match doc.objects.get(&smask_id) {
            Some(Object::Stream(s)) => {
                let content = decode_stream(s).context("Failed to decompress mask")?;
                image::GrayImage::from_raw(dimension(s, b"Width"), dimension(s, b"Height"), content)
            }
            _ => bail!("SMask not a stream"),
        };
        match mask {
            Some(mask) if mask.dimensions() == img.dimensions() => {
                let mut rgba = img.to_rgba8();
                for (x, y, pixel) in rgba.enumerate_pixels_mut() {
                    pixel[3] = mask.get_pixel(x, y)[0];
                }
                img = DynamicImage::ImageRgba8(rgba);
                actions.push("applied SMask".to_string());
            }
            _ => bail!("SMask does not match image dimensions"),
        }
    }

    if img.width() > max_dim || img.height() > max_dim {
        let before = img.dimensions();
        img = img.resize(max_dim, max_dim, FilterType::Lanczos3);
        actions.push(format!(
            "resize {}x{} -> {}x{}",
            before.0,
            before.1,
            img.width(),
            img.height()
        ));
    }

    let (w, h) = img.dimensions();
    let rgba = img.to_rgba8();
    let rgb: Vec<u8> = rgba.pixels().flat_map(|p| [p[0], p[1], p[2]]).collect();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode(&rgb, w, h, ColorType::Rgb8.into())?;
    actions.push(format!("re-encode: JPEG(q={})", quality));

    if let Some(Object::Stream(stream)) = doc.objects.get_mut(&object_id) {
        stream.dict.set("Length", Object::Integer(jpeg.len() as i64));
        stream.content = jpeg;
        stream.dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        stream.dict.set("Width", Object::Integer(w as i64));
        stream.dict.set("Height", Object::Integer(h as i64));
        stream.dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
        stream.dict.set("BitsPerComponent", Object::Integer(8));
        stream.dict.remove(b"DecodeParms");
        stream.dict.remove(b"Decode");
    }

    if let Some(smask_id) = smask_id {
        let alpha: Vec<u8> = rgba.pixels().map(|p| p[3]).collect();
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
        encoder.write_all(&alpha)?;
        let mask = encoder.finish()?;

        if let Some(Object::Stream(stream)) = doc.objects.get_mut(&smask_id) {
            stream.dict.set("Length", Object::Integer(mask.len() as i64));
            stream.content = mask;
            stream.dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
            stream.dict.set("Width", Object::Integer(w as i64));
            stream.dict.set("Height", Object::Integer(h as i64));
            stream.dict.set("ColorSpace", Object::Name(b"DeviceGray".to_vec()));
            stream.dict.set("BitsPerComponent", Object::Integer(8));
            stream.dict.remove(b"DecodeParms");
            stream.dict.remove(b"Decode");
        }
        actions.push("mask: Flate".to_string());
    }

    Ok(actions.join(", "))
}
