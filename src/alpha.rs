//! Alpha reconstruction from a white-backdrop / black-backdrop render pair.
//!
//! A pixel with foreground `fg` and coverage `a` composited over backdrop `b` is
//! `fg·a + b·(1-a)`. Over black that is `fg·a`, over white `fg·a + (1-a)`, so the
//! per-channel difference `white - black` is `1 - a`. Alpha is the mean of the three
//! per-channel estimates and color is recovered by dividing the black render by alpha.
//!
//! The subject is assumed to be pixel-identical in both renders. Nothing here checks that.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Alpha at or below this is treated as fully transparent when recovering color.
pub const ALPHA_EPSILON: f32 = 1.0 / 255.0;

/// Tightest backdrop separation, per channel, still usable for normalization.
const MIN_BACKDROP_DISTANCE: f32 = 1.0 / 255.0;

/// RGB pixels normalized to `[0, 1]`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 3]>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixels: Vec<[f32; 3]>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(PipelineError::ImageError(format!(
                "{}x{} buffer needs {} pixels, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: u32, height: u32, rgb: [f32; 3]) -> Self {
        Self {
            width,
            height,
            pixels: vec![rgb; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[[f32; 3]] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn set(&mut self, x: u32, y: u32, rgb: [f32; 3]) {
        if x < self.width && y < self.height {
            let idx = y as usize * self.width as usize + x as usize;
            self.pixels[idx] = rgb;
        }
    }

    /// Mean color of the four corner patches, each `margin` pixels square. `None` for an
    /// empty buffer.
    fn corner_mean(&self, margin: u32) -> Option<[f32; 3]> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let m = margin.min(self.width).min(self.height).max(1);
        let xs = [0, self.width - m];
        let ys = [0, self.height - m];
        let mut sum = [0.0f64; 3];
        let mut count = 0u64;
        for &y0 in &ys {
            for &x0 in &xs {
                for y in y0..y0 + m {
                    for x in x0..x0 + m {
                        let px = self.pixels[y as usize * self.width as usize + x as usize];
                        for c in 0..3 {
                            sum[c] += px[c] as f64;
                        }
                        count += 1;
                    }
                }
            }
        }
        let n = count.max(1) as f64;
        Some([
            (sum[0] / n) as f32,
            (sum[1] / n) as f32,
            (sum[2] / n) as f32,
        ])
    }
}

/// Unpremultiplied RGBA output, every channel clamped to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaBuffer {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl RgbaBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// 8-bit RGBA bytes, row-major, rounded to nearest.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|px| px.map(to_u8))
            .collect()
    }
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// How the backdrop colors are known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackdropModel {
    /// Backdrops are exactly `(1,1,1)` and `(0,0,0)`.
    Ideal,
    /// Estimate both backdrops from the corner patches of each render. The patch side is
    /// `max(width, height) * margin_fraction`, at least one pixel.
    Sampled { margin_fraction: f32 },
}

impl Default for BackdropModel {
    fn default() -> Self {
        BackdropModel::Ideal
    }
}

impl BackdropModel {
    pub fn sampled() -> Self {
        BackdropModel::Sampled {
            margin_fraction: 0.05,
        }
    }
}

/// Snap near-transparent and near-opaque alpha to the extremes and stretch the rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlphaThresholds {
    pub low: f32,
    pub high: f32,
}

impl Default for AlphaThresholds {
    fn default() -> Self {
        Self {
            low: 0.05,
            high: 0.92,
        }
    }
}

impl AlphaThresholds {
    fn apply(&self, alpha: f32) -> f32 {
        if alpha < self.low {
            0.0
        } else if alpha > self.high {
            1.0
        } else if alpha <= 0.0 || alpha >= 1.0 {
            alpha
        } else {
            ((alpha - self.low) / (self.high - self.low)).clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AlphaOptions {
    pub backdrop: BackdropModel,
    pub thresholds: Option<AlphaThresholds>,
}

impl AlphaOptions {
    pub fn with_backdrop(mut self, backdrop: BackdropModel) -> Self {
        self.backdrop = backdrop;
        self
    }

    pub fn with_thresholds(mut self, thresholds: AlphaThresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let BackdropModel::Sampled { margin_fraction } = self.backdrop {
            if !(margin_fraction > 0.0 && margin_fraction <= 0.5) {
                return Err(PipelineError::ConfigurationError(format!(
                    "backdrop margin fraction must be in (0, 0.5], got {}",
                    margin_fraction
                )));
            }
        }
        if let Some(t) = self.thresholds {
            if !(0.0 <= t.low && t.low < t.high && t.high <= 1.0) {
                return Err(PipelineError::ConfigurationError(format!(
                    "alpha thresholds need 0 <= low < high <= 1, got {} / {}",
                    t.low, t.high
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AlphaStats {
    pub transparent: usize,
    pub opaque: usize,
    pub edge: usize,
}

impl AlphaStats {
    pub fn total(&self) -> usize {
        self.transparent + self.opaque + self.edge
    }

    pub fn fraction(count: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        }
    }

    fn record(&mut self, alpha: f32) {
        if alpha <= 0.0 {
            self.transparent += 1;
        } else if alpha >= 1.0 {
            self.opaque += 1;
        } else {
            self.edge += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedAlpha {
    pub image: RgbaBuffer,
    pub stats: AlphaStats,
    /// Backdrop colors used for normalization, white first.
    pub backdrops: ([f32; 3], [f32; 3]),
}

/// Reconstruct RGBA from the same subject rendered over white and over black.
pub fn extract(white: &PixelBuffer, black: &PixelBuffer, options: &AlphaOptions) -> Result<ExtractedAlpha> {
    if white.dimensions() != black.dimensions() {
        return Err(PipelineError::DimensionMismatch {
            white_width: white.width,
            white_height: white.height,
            black_width: black.width,
            black_height: black.height,
        });
    }
    options.validate()?;

    let (white_bg, black_bg) = match options.backdrop {
        BackdropModel::Ideal => ([1.0; 3], [0.0; 3]),
        BackdropModel::Sampled { margin_fraction } => {
            let margin = ((white.width.max(white.height) as f32) * margin_fraction) as u32;
            match (white.corner_mean(margin), black.corner_mean(margin)) {
                (Some(white_bg), Some(black_bg)) => {
                    log::debug!(
                        "Sampled backdrops: white={:?} black={:?}",
                        white_bg,
                        black_bg
                    );
                    (white_bg, black_bg)
                }
                _ => ([1.0; 3], [0.0; 3]),
            }
        }
    };

    let mut distance = [1.0f32; 3];
    let mut black_base = [0.0f32; 3];
    for c in 0..3 {
        let d = white_bg[c] - black_bg[c];
        if d < MIN_BACKDROP_DISTANCE {
            log::warn!(
                "Backdrop distance on channel {} is {:.4}; using ideal backdrops for it",
                c,
                d
            );
        } else {
            distance[c] = d;
            black_base[c] = black_bg[c];
        }
    }

    let mut stats = AlphaStats::default();
    let pixels = white
        .pixels
        .iter()
        .zip(black.pixels.iter())
        .map(|(w, b)| {
            let mut sum = 0.0f32;
            for c in 0..3 {
                sum += 1.0 - (w[c] - b[c]) / distance[c];
            }
            let mut alpha = (sum / 3.0).clamp(0.0, 1.0);
            if let Some(thresholds) = options.thresholds {
                alpha = thresholds.apply(alpha);
            }
            stats.record(alpha);

            let mut rgba = [0.0f32, 0.0, 0.0, alpha];
            for c in 0..3 {
                let fg = if alpha > ALPHA_EPSILON {
                    (b[c] - black_base[c] * (1.0 - alpha)) / alpha
                } else {
                    b[c]
                };
                rgba[c] = fg.clamp(0.0, 1.0);
            }
            rgba
        })
        .collect();

    Ok(ExtractedAlpha {
        image: RgbaBuffer {
            width: white.width,
            height: white.height,
            pixels,
        },
        stats,
        backdrops: (white_bg, black_bg),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f32 = 1.0 / 255.0;

    fn composite(fg: [f32; 3], a: f32, backdrop: f32) -> [f32; 3] {
        fg.map(|c| c * a + backdrop * (1.0 - a))
    }

    fn pair(fg: [f32; 3], a: f32) -> (PixelBuffer, PixelBuffer) {
        (
            PixelBuffer::filled(1, 1, composite(fg, a, 1.0)),
            PixelBuffer::filled(1, 1, composite(fg, a, 0.0)),
        )
    }

    #[test]
    fn recovers_alpha_and_color_across_grid() {
        let alphas = [0.0, 0.01, 0.1, 0.25, 0.5, 0.75, 0.9, 0.999, 1.0];
        let colors = [
            [0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
            [0.2, 0.6, 0.9],
            [1.0, 0.0, 0.5],
            [0.33, 0.66, 0.01],
        ];
        for &a in &alphas {
            for &fg in &colors {
                let (white, black) = pair(fg, a);
                let out = extract(&white, &black, &AlphaOptions::default()).unwrap();
                let px = out.image.get(0, 0).unwrap();
                assert!((px[3] - a).abs() <= TOL, "alpha {} vs {}", px[3], a);
                if a > ALPHA_EPSILON {
                    for c in 0..3 {
                        assert!(
                            (px[c] - fg[c]).abs() <= TOL,
                            "channel {} of {:?} at a={}: {}",
                            c,
                            fg,
                            a,
                            px[c]
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn fully_transparent_pixel() {
        let white = PixelBuffer::filled(2, 2, [1.0; 3]);
        let black = PixelBuffer::filled(2, 2, [0.0; 3]);
        let out = extract(&white, &black, &AlphaOptions::default()).unwrap();
        for px in out.image.pixels() {
            assert_eq!(*px, [0.0, 0.0, 0.0, 0.0]);
        }
        assert_eq!(out.stats.transparent, 4);
    }

    #[test]
    fn fully_opaque_pixel() {
        let fg = [0.8, 0.4, 0.1];
        let (white, black) = pair(fg, 1.0);
        let out = extract(&white, &black, &AlphaOptions::default()).unwrap();
        let px = out.image.get(0, 0).unwrap();
        assert!((px[3] - 1.0).abs() <= TOL);
        for c in 0..3 {
            assert!((px[c] - fg[c]).abs() <= TOL);
        }
        assert_eq!(out.stats.opaque, 1);
    }

    #[test]
    fn dimension_mismatch_produces_nothing() {
        let white = PixelBuffer::filled(10, 10, [1.0; 3]);
        let black = PixelBuffer::filled(10, 11, [0.0; 3]);
        let err = extract(&white, &black, &AlphaOptions::default()).unwrap_err();
        assert_eq!(
            err,
            PipelineError::DimensionMismatch {
                white_width: 10,
                white_height: 10,
                black_width: 10,
                black_height: 11,
            }
        );
    }

    #[test]
    fn output_is_clamped_when_renders_disagree() {
        // black brighter than white: not physical, alpha estimate exceeds 1
        let white = PixelBuffer::filled(1, 1, [0.2, 0.2, 0.2]);
        let black = PixelBuffer::filled(1, 1, [0.9, 0.9, 0.9]);
        let out = extract(&white, &black, &AlphaOptions::default()).unwrap();
        let px = out.image.get(0, 0).unwrap();
        assert_eq!(px[3], 1.0);
        assert!(px.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((px[0] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn channel_estimates_are_averaged() {
        let white = PixelBuffer::filled(1, 1, [1.0, 0.7, 0.4]);
        let black = PixelBuffer::filled(1, 1, [0.0, 0.0, 0.0]);
        let out = extract(&white, &black, &AlphaOptions::default()).unwrap();
        let expected = (0.0 + 0.3 + 0.6) / 3.0;
        assert!((out.image.get(0, 0).unwrap()[3] - expected).abs() < 1e-6);
    }

    #[test]
    fn sampled_backdrop_corrects_off_white_renders() {
        // backdrops rendered as (0.9, 0.9, 0.9) and (0.1, 0.1, 0.1); subject in the centre
        let (w, h) = (40, 40);
        let fg = [0.6, 0.3, 0.2];
        let a = 0.5;
        let mut white = PixelBuffer::filled(w, h, [0.9; 3]);
        let mut black = PixelBuffer::filled(w, h, [0.1; 3]);
        for y in 15..25 {
            for x in 15..25 {
                white.set(x, y, fg.map(|c| c * a + 0.9 * (1.0 - a)));
                black.set(x, y, fg.map(|c| c * a + 0.1 * (1.0 - a)));
            }
        }
        let options = AlphaOptions::default().with_backdrop(BackdropModel::sampled());
        let out = extract(&white, &black, &options).unwrap();

        let bg = out.image.get(0, 0).unwrap();
        assert!(bg[3].abs() < 1e-4);
        let px = out.image.get(20, 20).unwrap();
        assert!((px[3] - a).abs() <= TOL);
        for c in 0..3 {
            assert!((px[c] - fg[c]).abs() <= TOL);
        }
        assert_eq!(out.stats.edge, 100);
        assert_eq!(out.stats.transparent, 1500);

        // the ideal model reads the grey backdrop as partly opaque
        let naive = extract(&white, &black, &AlphaOptions::default()).unwrap();
        assert!(naive.image.get(0, 0).unwrap()[3] > 0.1);
    }

    #[test]
    fn degenerate_sampled_backdrop_falls_back_to_ideal() {
        let white = PixelBuffer::filled(4, 4, [0.5; 3]);
        let black = PixelBuffer::filled(4, 4, [0.5; 3]);
        let options = AlphaOptions::default().with_backdrop(BackdropModel::sampled());
        let out = extract(&white, &black, &options).unwrap();
        let px = out.image.get(1, 1).unwrap();
        assert_eq!(px[3], 1.0);
        assert!((px[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn thresholds_snap_and_stretch() {
        let t = AlphaThresholds::default();
        assert_eq!(t.apply(0.01), 0.0);
        assert_eq!(t.apply(0.95), 1.0);
        let mid = t.apply(0.485);
        assert!((mid - (0.485 - 0.05) / 0.87).abs() < 1e-6);

        let white = PixelBuffer::filled(1, 1, [0.97; 3]);
        let black = PixelBuffer::filled(1, 1, [0.0; 3]);
        let options = AlphaOptions::default().with_thresholds(t);
        let out = extract(&white, &black, &options).unwrap();
        assert_eq!(out.image.get(0, 0).unwrap(), [0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn invalid_options_are_configuration_errors() {
        let white = PixelBuffer::filled(1, 1, [1.0; 3]);
        let black = PixelBuffer::filled(1, 1, [0.0; 3]);
        let options = AlphaOptions::default().with_thresholds(AlphaThresholds {
            low: 0.9,
            high: 0.1,
        });
        assert!(matches!(
            extract(&white, &black, &options),
            Err(PipelineError::ConfigurationError(_))
        ));
    }

    #[test]
    fn rgba8_rounds_to_nearest() {
        let white = PixelBuffer::filled(1, 1, [1.0; 3]);
        let black = PixelBuffer::filled(1, 1, [1.0; 3]);
        let out = extract(&white, &black, &AlphaOptions::default()).unwrap();
        assert_eq!(out.image.to_rgba8(), vec![255, 255, 255, 255]);
    }

    #[test]
    fn empty_pair_extracts_to_empty_image() {
        let white = PixelBuffer::new(0, 0, vec![]).unwrap();
        let black = PixelBuffer::new(0, 0, vec![]).unwrap();
        for options in [
            AlphaOptions::default(),
            AlphaOptions::default().with_backdrop(BackdropModel::sampled()),
        ] {
            let out = extract(&white, &black, &options).unwrap();
            assert!(out.image.pixels().is_empty());
            assert_eq!(out.stats.total(), 0);
            assert_eq!(out.backdrops, ([1.0; 3], [0.0; 3]));
        }

        let wide = PixelBuffer::new(3, 0, vec![]).unwrap();
        let sampled = AlphaOptions::default().with_backdrop(BackdropModel::sampled());
        assert!(extract(&wide, &wide, &sampled).unwrap().image.to_rgba8().is_empty());
    }

    #[test]
    fn pixel_buffer_rejects_wrong_length() {
        assert!(PixelBuffer::new(2, 2, vec![[0.0; 3]; 3]).is_err());
        assert!(PixelBuffer::new(2, 2, vec![[0.0; 3]; 4]).is_ok());
    }
}
