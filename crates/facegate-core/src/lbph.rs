//! Local Binary Pattern Histograms (LBPH) appearance model.
//!
//! Each training crop is reduced to a spatial histogram: the crop is turned
//! into circular LBP codes, split into a grid of cells, and every cell
//! contributes a `2^neighbors`-bin code histogram. Prediction is a
//! nearest-neighbour search over all stored histograms using the symmetric
//! chi-square distance, so the score is 0 for identical crops, grows without
//! an upper bound in principle, and lower always means more similar.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::normalize::FaceCrop;
use crate::types::MatchResult;

/// Interpolated neighbours within this of the centre count as equal to it.
const LBP_TOLERANCE: f32 = 1e-3;

/// Operator parameters. The defaults are the classic radius 1, 8 neighbours, 8x8 grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    fn bins(&self) -> usize {
        1usize << self.neighbors
    }
}

/// Grid of per-cell LBP code counts for one crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialHistogram {
    /// Pixels per cell; counts divided by this give the normalized histogram.
    pub cell_pixels: u32,
    pub counts: Vec<u32>,
}

impl SpatialHistogram {
    /// Chi-square distance between the normalized histograms:
    /// `2 * sum((a - b)^2 / (a + b))` over bins where `a + b` is non-zero.
    pub fn distance(&self, other: &SpatialHistogram) -> f64 {
        let na = self.cell_pixels.max(1) as f64;
        let nb = other.cell_pixels.max(1) as f64;
        let sum: f64 = self
            .counts
            .iter()
            .zip(&other.counts)
            .filter(|(&ca, &cb)| ca != 0 || cb != 0)
            .map(|(&ca, &cb)| {
                let a = ca as f64 / na;
                let b = cb as f64 / nb;
                (a - b) * (a - b) / (a + b)
            })
            .sum();
        2.0 * sum
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LabeledHistogram {
    label: u32,
    histogram: SpatialHistogram,
}

/// A fitted LBPH model: one labelled histogram per training crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbphModel {
    params: LbphParams,
    samples: Vec<LabeledHistogram>,
}

impl LbphModel {
    /// Fit a model over `(crop, label)` pairs. Order is preserved, so ties in
    /// [`predict`](Self::predict) go to the earliest sample.
    pub fn train<'a, I>(params: LbphParams, samples: I) -> Self
    where
        I: IntoIterator<Item = (&'a FaceCrop, u32)>,
    {
        let samples = samples
            .into_iter()
            .map(|(crop, label)| LabeledHistogram {
                label,
                histogram: spatial_histogram(crop.image(), &params),
            })
            .collect();
        Self { params, samples }
    }

    pub fn params(&self) -> LbphParams {
        self.params
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Labels the model can return, in training order with duplicates removed.
    pub fn labels(&self) -> Vec<u32> {
        let mut labels: Vec<u32> = self.samples.iter().map(|s| s.label).collect();
        labels.dedup();
        labels
    }

    /// Nearest stored histogram to `crop`. `None` for an empty model.
    pub fn predict(&self, crop: &FaceCrop) -> Option<MatchResult> {
        let query = spatial_histogram(crop.image(), &self.params);
        let mut best: Option<MatchResult> = None;
        for sample in &self.samples {
            let distance = query.distance(&sample.histogram);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(MatchResult {
                    label: sample.label,
                    distance,
                });
            }
        }
        best
    }
}

/// Circular LBP code image. The output loses `radius` pixels on every side.
pub fn lbp_codes(image: &GrayImage, params: &LbphParams) -> (Vec<u32>, u32, u32) {
    let (width, height) = image.dimensions();
    let r = params.radius;
    if width <= 2 * r || height <= 2 * r {
        return (Vec::new(), 0, 0);
    }
    let out_w = width - 2 * r;
    let out_h = height - 2 * r;
    let mut codes = vec![0u32; (out_w * out_h) as usize];
    let px = |x: i64, y: i64| image.get_pixel(x as u32, y as u32).0[0] as f32;

    for n in 0..params.neighbors {
        let angle = 2.0 * std::f32::consts::PI * n as f32 / params.neighbors as f32;
        let sx = r as f32 * angle.cos();
        let sy = -(r as f32) * angle.sin();

        let (fx, fy) = (sx.floor(), sy.floor());
        let (cx, cy) = (sx.ceil() as i64, sy.ceil() as i64);
        let (tx, ty) = (sx - fx, sy - fy);
        let (fx, fy) = (fx as i64, fy as i64);

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for y in r..height - r {
            for x in r..width - r {
                let (xi, yi) = (x as i64, y as i64);
                let sample = w1 * px(xi + fx, yi + fy)
                    + w2 * px(xi + cx, yi + fy)
                    + w3 * px(xi + fx, yi + cy)
                    + w4 * px(xi + cx, yi + cy);
                let center = px(xi, yi);
                if sample >= center - LBP_TOLERANCE {
                    codes[((y - r) * out_w + (x - r)) as usize] |= 1 << n;
                }
            }
        }
    }

    (codes, out_w, out_h)
}

/// Split the LBP code image into the parameter grid and count codes per cell.
pub fn spatial_histogram(image: &GrayImage, params: &LbphParams) -> SpatialHistogram {
    let (codes, width, height) = lbp_codes(image, params);
    let bins = params.bins();
    let cell_w = width / params.grid_x.max(1);
    let cell_h = height / params.grid_y.max(1);
    let mut counts = vec![0u32; (params.grid_x * params.grid_y) as usize * bins];

    for gy in 0..params.grid_y {
        for gx in 0..params.grid_x {
            let offset = ((gy * params.grid_x + gx) as usize) * bins;
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    let code = codes[(y * width + x) as usize] as usize;
                    counts[offset + code] += 1;
                }
            }
        }
    }

    SpatialHistogram {
        cell_pixels: cell_w * cell_h,
        counts,
    }
}
