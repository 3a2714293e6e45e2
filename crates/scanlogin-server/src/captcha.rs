//! Image captcha generation and checking

use chrono::{DateTime, Duration, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use rand::Rng;
use std::io::Cursor;
use thiserror::Error;

/// Characters a captcha is drawn from; look-alikes (0/O, 1/I) are left out
pub const ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const CODE_LENGTH: usize = 4;
pub const IMAGE_WIDTH: u32 = 160;
pub const IMAGE_HEIGHT: u32 = 60;

const SCALE: u32 = 5;
const GLYPH_GAP: u32 = 8;

/// 5x7 bitmaps for each character of [`ALPHABET`], in the same order
const GLYPHS: [[u8; 7]; 32] = [
    [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001], // A
    [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110], // B
    [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110], // C
    [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110], // D
    [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111], // E
    [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000], // F
    [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111], // G
    [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001], // H
    [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100], // J
    [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001], // K
    [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111], // L
    [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001], // M
    [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001], // N
    [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000], // P
    [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101], // Q
    [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001], // R
    [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110], // S
    [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100], // T
    [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110], // U
    [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100], // V
    [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010], // W
    [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001], // X
    [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100], // Y
    [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111], // Z
    [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111], // 2
    [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110], // 3
    [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110], // 5
    [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000], // 7
    [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100], // 9
];

/// Captcha check failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptchaError {
    #[error("Captcha expired, please refresh")]
    Expired,
    #[error("Wrong captcha")]
    Mismatch,
}

/// A captcha code held by one session
#[derive(Debug, Clone)]
pub struct Captcha {
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

impl Captcha {
    /// Draw a new random code
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let alphabet = ALPHABET.as_bytes();
        let code = (0..CODE_LENGTH)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect();
        Self {
            code,
            issued_at: Utc::now(),
        }
    }

    /// Check user input, ignoring case and surrounding whitespace
    pub fn verify(&self, input: &str, lifetime: Duration) -> Result<(), CaptchaError> {
        if Utc::now() >= self.issued_at + lifetime {
            return Err(CaptchaError::Expired);
        }
        if !input.trim().eq_ignore_ascii_case(&self.code) {
            return Err(CaptchaError::Mismatch);
        }
        Ok(())
    }

    /// Render the code as a PNG with a little noise
    pub fn render_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut rng = rand::thread_rng();
        let mut img = RgbImage::from_pixel(IMAGE_WIDTH, IMAGE_HEIGHT, Rgb([240, 242, 245]));

        let glyph_width = 5 * SCALE;
        let glyph_height = 7 * SCALE;
        let total = CODE_LENGTH as u32 * glyph_width + (CODE_LENGTH as u32 - 1) * GLYPH_GAP;
        let mut x0 = (IMAGE_WIDTH - total) / 2;

        for c in self.code.chars() {
            let Some(glyph) = glyph(c) else {
                continue;
            };
            let y0 = rng.gen_range(4..=IMAGE_HEIGHT - glyph_height - 4);
            let color = Rgb([
                rng.gen_range(10..110),
                rng.gen_range(10..110),
                rng.gen_range(60..160),
            ]);

            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..5u32 {
                    if bits & (1 << (4 - col)) == 0 {
                        continue;
                    }
                    for dy in 0..SCALE {
                        for dx in 0..SCALE {
                            img.put_pixel(x0 + col * SCALE + dx, y0 + row as u32 * SCALE + dy, color);
                        }
                    }
                }
            }
            x0 += glyph_width + GLYPH_GAP;
        }

        for _ in 0..2 {
            let (ax, ay) = (0.0, rng.gen_range(0.0..IMAGE_HEIGHT as f32));
            let (bx, by) = (
                IMAGE_WIDTH as f32 - 1.0,
                rng.gen_range(0.0..IMAGE_HEIGHT as f32),
            );
            let color = Rgb([rng.gen_range(100..200), rng.gen_range(100..200), 120]);
            for step in 0..IMAGE_WIDTH {
                let t = step as f32 / (IMAGE_WIDTH - 1) as f32;
                let x = (ax + (bx - ax) * t) as u32;
                let y = ((ay + (by - ay) * t) as u32).min(IMAGE_HEIGHT - 1);
                img.put_pixel(x, y, color);
            }
        }

        for _ in 0..180 {
            let x = rng.gen_range(0..IMAGE_WIDTH);
            let y = rng.gen_range(0..IMAGE_HEIGHT);
            let shade = rng.gen_range(90..200);
            img.put_pixel(x, y, Rgb([shade, shade, shade]));
        }

        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

fn glyph(c: char) -> Option<&'static [u8; 7]> {
    ALPHABET.find(c).map(|i| &GLYPHS[i])
}
