use std::io::Cursor;

use edge_vision_common::config::{InputLayout, InputType};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};

use crate::model::{InputSpec, InputTensor, TensorData};
use crate::InferenceError;

pub fn decode_jpeg(jpeg: &[u8]) -> Result<DynamicImage, InferenceError> {
    ImageReader::new(Cursor::new(jpeg))
        .with_guessed_format()
        .map_err(|e| InferenceError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| InferenceError::Decode(e.to_string()))
}

/// Resize to the model input and convert to its element type and layout.
///
/// `u8` models get raw pixels, `i8` models get pixels shifted by -128, and
/// `f32` models get pixels mapped to `[-1, 1]`.
pub fn to_input_tensor(image: &DynamicImage, spec: InputSpec) -> InputTensor {
    let rgb = image.to_rgb8();
    let rgb = if rgb.dimensions() == (spec.width, spec.height) {
        rgb
    } else {
        image::imageops::resize(&rgb, spec.width, spec.height, FilterType::CatmullRom)
    };

    let pixels = match spec.layout {
        InputLayout::Nhwc => rgb.into_raw(),
        InputLayout::Nchw => planar(&rgb),
    };

    let data = match spec.element {
        InputType::U8 => TensorData::U8(pixels),
        InputType::I8 => TensorData::I8(
            pixels
                .into_iter()
                .map(|p| (i16::from(p) - 128) as i8)
                .collect(),
        ),
        InputType::F32 => TensorData::F32(
            pixels
                .into_iter()
                .map(|p| (f32::from(p) - 127.5) / 127.5)
                .collect(),
        ),
    };

    InputTensor {
        shape: spec.shape(),
        data,
    }
}

fn planar(rgb: &RgbImage) -> Vec<u8> {
    let plane = (rgb.width() * rgb.height()) as usize;
    let mut out = vec![0u8; plane * 3];
    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + i] = pixel.0[c];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn spec(width: u32, height: u32, element: InputType, layout: InputLayout) -> InputSpec {
        InputSpec {
            width,
            height,
            element,
            layout,
        }
    }

    fn two_pixel_image() -> DynamicImage {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([0, 128, 255]));
        img.put_pixel(1, 0, Rgb([10, 20, 30]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn u8_nhwc_is_raw_interleaved() {
        let tensor = to_input_tensor(
            &two_pixel_image(),
            spec(2, 1, InputType::U8, InputLayout::Nhwc),
        );
        assert_eq!(tensor.shape, [1, 1, 2, 3]);
        assert_eq!(tensor.data, TensorData::U8(vec![0, 128, 255, 10, 20, 30]));
    }

    #[test]
    fn nchw_is_planar() {
        let tensor = to_input_tensor(
            &two_pixel_image(),
            spec(2, 1, InputType::U8, InputLayout::Nchw),
        );
        assert_eq!(tensor.shape, [1, 3, 1, 2]);
        assert_eq!(tensor.data, TensorData::U8(vec![0, 10, 128, 20, 255, 30]));
    }

    #[test]
    fn i8_is_shifted() {
        let tensor = to_input_tensor(
            &two_pixel_image(),
            spec(2, 1, InputType::I8, InputLayout::Nhwc),
        );
        assert_eq!(
            tensor.data,
            TensorData::I8(vec![-128, 0, 127, -118, -108, -98])
        );
    }

    #[test]
    fn f32_is_centered() {
        let tensor = to_input_tensor(
            &two_pixel_image(),
            spec(2, 1, InputType::F32, InputLayout::Nhwc),
        );
        let TensorData::F32(values) = tensor.data else {
            panic!("expected f32 tensor");
        };
        assert_eq!(values[0], -1.0);
        assert_eq!(values[2], 1.0);
        assert!((values[1] - 0.5 / 127.5).abs() < 1e-6);
    }

    #[test]
    fn resizes_to_model_input() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([7, 7, 7])));
        let tensor = to_input_tensor(&img, spec(16, 16, InputType::U8, InputLayout::Nhwc));
        assert_eq!(tensor.shape, [1, 16, 16, 3]);
        assert!(tensor.check().is_ok());
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_jpeg(b"not a jpeg"),
            Err(InferenceError::Decode(_))
        ));
    }
}
