#![allow(dead_code)]

use std::fs::File;
use std::path::Path;
use tiff::encoder::{colortype, TiffEncoder};

/// Write one acquisition with a page per band, every pixel of a band set to
/// the given value
pub fn write_acquisition(path: &Path, width: u32, height: u32, band_values: &[f32]) {
    let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
    for value in band_values {
        let pixels = vec![*value; (width * height) as usize];
        encoder
            .write_image::<colortype::Gray32Float>(width, height, &pixels)
            .unwrap();
    }
}

/// Write one acquisition from explicit per-band pixel data
pub fn write_bands(path: &Path, width: u32, height: u32, bands: &[Vec<f32>]) {
    let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
    for band in bands {
        encoder
            .write_image::<colortype::Gray32Float>(width, height, band)
            .unwrap();
    }
}

/// NDVI of constant red and near-infrared bands
pub fn ndvi(red: f32, nir: f32) -> f64 {
    let (red, nir) = (red as f64, nir as f64);
    (nir - red) / (nir + red)
}
