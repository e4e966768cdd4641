//! Raster frames handed from frame sources to the feature extractor

use crate::error::ExtractionError;

/// Fixed-size raster, 3 bytes per pixel in BGR order
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Single-channel luminance raster
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// Solid-colour frame
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * Self::CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&bgr);
        }
        Self { width, height, data }
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::CHANNELS
    }

    /// Check the buffer matches the declared dimensions
    pub fn validate(&self) -> Result<(), ExtractionError> {
        let expected = Self::byte_len(self.width, self.height);
        if self.data.len() != expected || expected == 0 {
            return Err(ExtractionError::MalformedFrame {
                width: self.width,
                height: self.height,
                expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        self.data[idx..idx + Self::CHANNELS].copy_from_slice(&bgr);
    }

    /// Luminance conversion (0.299 R + 0.587 G + 0.114 B)
    pub fn to_gray(&self) -> GrayFrame {
        let data = self
            .data
            .chunks_exact(Self::CHANNELS)
            .map(|px| {
                let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
                ((299 * r + 587 * g + 114 * b + 500) / 1000) as u8
            })
            .collect();
        GrayFrame {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

impl GrayFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn same_shape(&self, other: &GrayFrame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Otsu's global threshold
    pub fn otsu_threshold(&self) -> u8 {
        let mut histogram = [0u64; 256];
        for &v in &self.data {
            histogram[v as usize] += 1;
        }

        let total = self.data.len() as f64;
        if total == 0.0 {
            return 0;
        }
        let sum_all: f64 = histogram
            .iter()
            .enumerate()
            .map(|(i, &c)| i as f64 * c as f64)
            .sum();

        let mut sum_bg = 0.0;
        let mut weight_bg = 0.0;
        let mut best = (0u8, 0.0f64);

        for (t, &count) in histogram.iter().enumerate() {
            weight_bg += count as f64;
            if weight_bg == 0.0 {
                continue;
            }
            let weight_fg = total - weight_bg;
            if weight_fg == 0.0 {
                break;
            }
            sum_bg += t as f64 * count as f64;
            let mean_bg = sum_bg / weight_bg;
            let mean_fg = (sum_all - sum_bg) / weight_fg;
            let between = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
            if between > best.1 {
                best = (t as u8, between);
            }
        }
        best.0
    }

    /// Binarise at the Otsu threshold (pixels above become 255)
    pub fn binarize_otsu(&self) -> GrayFrame {
        let threshold = self.otsu_threshold();
        GrayFrame {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .map(|&v| if v > threshold { 255 } else { 0 })
                .collect(),
        }
    }

    /// Binary PGM (P5) encoding, accepted on stdin by OCR tools
    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_short_buffer() {
        let frame = Frame::new(4, 4, vec![0; 10]);
        assert!(matches!(
            frame.validate(),
            Err(ExtractionError::MalformedFrame { expected: 48, got: 10, .. })
        ));
        assert!(Frame::filled(4, 4, [1, 2, 3]).validate().is_ok());
    }

    #[test]
    fn test_gray_conversion_uses_bgr_order() {
        // Pure red in BGR order
        let red = Frame::filled(1, 1, [0, 0, 255]);
        assert_eq!(red.to_gray().data, vec![76]);

        let blue = Frame::filled(1, 1, [255, 0, 0]);
        assert_eq!(blue.to_gray().data, vec![29]);

        let white = Frame::filled(2, 2, [255, 255, 255]);
        assert!(white.to_gray().data.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_otsu_splits_bimodal_image() {
        let mut data = vec![20u8; 50];
        data.extend(vec![220u8; 50]);
        let gray = GrayFrame::new(10, 10, data);

        let t = gray.otsu_threshold();
        assert!((20..220).contains(&t));

        let binary = gray.binarize_otsu();
        assert_eq!(binary.data.iter().filter(|&&v| v == 255).count(), 50);
    }

    #[test]
    fn test_pgm_header() {
        let gray = GrayFrame::new(2, 1, vec![0, 255]);
        let pgm = gray.to_pgm();
        assert!(pgm.starts_with(b"P5\n2 1\n255\n"));
        assert_eq!(&pgm[pgm.len() - 2..], &[0, 255]);
    }
}
