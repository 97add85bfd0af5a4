//! Band extraction from GeoTIFF acquisitions

use crate::error::{ForecastError, Result};
use band_math::BandMap;
use ndarray::Array2;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::ColorType;
use tracing::debug;

/// Reads the requested bands of one raster file into memory
#[derive(Debug, Clone)]
pub struct RasterBandExtractor {
    band_names: Vec<String>,
}

impl RasterBandExtractor {
    /// Create a new extractor. Band names bind to raster bands by position.
    pub fn new<S: AsRef<str>>(band_names: &[S]) -> Self {
        Self {
            band_names: band_names.iter().map(|b| b.as_ref().to_string()).collect(),
        }
    }

    /// Names bound by this extractor, in band order
    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    /// Read `path` and return its bands keyed by name
    pub fn extract(&self, path: &Path) -> Result<BandMap> {
        let bands = read_bands(path).map_err(|err| ForecastError::BandExtraction {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        if bands.len() < self.band_names.len() {
            return Err(ForecastError::BandExtraction {
                path: path.to_path_buf(),
                reason: format!(
                    "raster has {} band(s) but {} were requested ({})",
                    bands.len(),
                    self.band_names.len(),
                    self.band_names.join(", ")
                ),
            });
        }

        debug!("Read {} band(s) from {}", bands.len(), path.display());

        Ok(self.band_names.iter().cloned().zip(bands).collect())
    }
}

/// Read every band of a TIFF as `f64`.
///
/// Multi-sample (chunky) images yield one band per sample; single-sample
/// images yield one band per page. The file is closed before returning.
pub fn read_bands(path: &Path) -> Result<Vec<Array2<f64>>> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

    let mut bands = Vec::new();
    loop {
        let (width, height) = decoder.dimensions()?;
        let samples = samples_per_pixel(decoder.colortype()?)?;
        let pixels = decoding_to_f64(decoder.read_image()?)?;
        bands.extend(deinterleave(pixels, height as usize, width as usize, samples)?);

        if samples > 1 || !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    Ok(bands)
}

fn samples_per_pixel(color: ColorType) -> Result<usize> {
    match color {
        ColorType::Gray(_) => Ok(1),
        ColorType::GrayA(_) => Ok(2),
        ColorType::RGB(_) => Ok(3),
        ColorType::RGBA(_) | ColorType::CMYK(_) => Ok(4),
        other => Err(ForecastError::DataError(format!(
            "Unsupported TIFF color type {:?}",
            other
        ))),
    }
}

fn decoding_to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    Ok(match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
        #[allow(unreachable_patterns)]
        _ => {
            return Err(ForecastError::DataError(
                "Unsupported TIFF sample format".to_string(),
            ))
        }
    })
}

fn deinterleave(
    pixels: Vec<f64>,
    height: usize,
    width: usize,
    samples: usize,
) -> Result<Vec<Array2<f64>>> {
    let expected = height * width * samples;
    if pixels.len() != expected {
        return Err(ForecastError::DataError(format!(
            "Expected {} samples ({}x{}x{}), decoded {}",
            expected,
            height,
            width,
            samples,
            pixels.len()
        )));
    }

    if samples == 1 {
        let band = Array2::from_shape_vec((height, width), pixels)
            .map_err(|e| ForecastError::DataError(e.to_string()))?;
        return Ok(vec![band]);
    }

    Ok((0..samples)
        .map(|s| Array2::from_shape_fn((height, width), |(r, c)| pixels[(r * width + c) * samples + s]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;
    use tiff::encoder::{colortype, TiffEncoder};

    #[test]
    fn test_multipage_bands_bind_by_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scene.tif");
        {
            let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
            encoder
                .write_image::<colortype::Gray32Float>(2, 2, &[0.1, 0.2, 0.3, 0.4])
                .unwrap();
            encoder
                .write_image::<colortype::Gray32Float>(2, 2, &[0.5, 0.6, 0.7, 0.8])
                .unwrap();
        }

        let bands = RasterBandExtractor::new(&["B04", "B08"]).extract(&path).unwrap();
        assert_eq!(bands.len(), 2);
        assert!((bands["B04"][[1, 0]] - 0.3).abs() < 1e-6);
        assert!((bands["B08"][[0, 1]] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_chunky_samples_are_deinterleaved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rgb.tif");
        {
            let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
            // two pixels: (1,2,3) and (4,5,6)
            encoder
                .write_image::<colortype::RGB16>(2, 1, &[1, 2, 3, 4, 5, 6])
                .unwrap();
        }

        let bands = read_bands(&path).unwrap();
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[0].as_slice().unwrap(), &[1.0, 4.0]);
        assert_eq!(bands[2].as_slice().unwrap(), &[3.0, 6.0]);
    }

    #[test]
    fn test_too_many_requested_bands() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("single.tif");
        {
            let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
            encoder
                .write_image::<colortype::Gray8>(1, 1, &[7])
                .unwrap();
        }

        let err = RasterBandExtractor::new(&["B04", "B08"])
            .extract(&path)
            .unwrap_err();
        assert!(matches!(err, ForecastError::BandExtraction { .. }));
    }

    #[test]
    fn test_garbage_file_is_a_band_extraction_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.tif");
        std::fs::write(&path, b"not a tiff").unwrap();

        let err = RasterBandExtractor::new(&["B04"]).extract(&path).unwrap_err();
        assert!(matches!(err, ForecastError::BandExtraction { .. }));
    }
}
