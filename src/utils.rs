use burn::{prelude::*, tensor::TensorData};
use image::{Rgb, RgbImage};
use std::path::Path;

use crate::error::Result;

/// Loads an image as a `[1, 3, H, W]` tensor with values in `[-1, 1]`.
pub fn load_image<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Tensor<B, 4>> {
    let image = image::open(path)?.to_rgb8();
    Ok(image_to_tensor(&image, device))
}

pub fn image_to_tensor<B: Backend>(image: &RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (width, height) = image.dimensions();

    // HWC bytes -> [-1, 1]
    let data = image
        .as_raw()
        .iter()
        .map(|&c| c as f32 / 127.5 - 1.0)
        .collect::<Vec<_>>();

    Tensor::<B, 3>::from_data(
        TensorData::new(data, [height as usize, width as usize, 3]),
        device,
    )
    .permute([2, 0, 1])
    .unsqueeze()
}

/// Converts the first image of a `[N, 3, H, W]` batch back to 8-bit RGB.
pub fn tensor_to_image<B: Backend>(tensor: Tensor<B, 4>) -> RgbImage {
    let [_, channels, height, width] = tensor.dims();
    assert_eq!(channels, 3, "expected an RGB tensor, got {channels} channels");

    let image: Tensor<B, 3> = tensor.slice([0..1]).squeeze(0);
    let values = image
        .permute([1, 2, 0])
        .into_data()
        .iter::<f32>()
        .map(|c| (255.0 * ((c.clamp(-1.0, 1.0) + 1.0) / 2.0)).round() as u8)
        .collect::<Vec<_>>();

    let mut output = RgbImage::new(width as u32, height as u32);
    for (pixel, rgb) in output.pixels_mut().zip(values.chunks_exact(3)) {
        *pixel = Rgb([rgb[0], rgb[1], rgb[2]]);
    }
    output
}

pub fn save_image<B: Backend, P: AsRef<Path>>(tensor: Tensor<B, 4>, path: P) -> Result<()> {
    tensor_to_image(tensor).save(path)?;
    Ok(())
}
