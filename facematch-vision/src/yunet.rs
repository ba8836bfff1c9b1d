//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every cell of the stride 8, 16 and 32 feature maps predicts one
//! candidate face. The 2023mar export emits twelve tensors, grouped by kind and then by stride:
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`.
//!
//! For a cell at row `r`, column `c` of a map with stride `s`:
//! - score = sqrt(clamp(cls) * clamp(obj))
//! - cx = (c + dx) * s, cy = (r + dy) * s
//! - w = exp(dw) * s, h = exp(dh) * s
//! - landmark k = ((c + kx) * s, (r + ky) * s)
//!
//! Decoded coordinates are normalized to `[0, 1]` of the square network input.

use anyhow::Result;
use ndarray::{Array2, ArrayView2};

pub const STRIDES: [usize; 3] = [8, 16, 32];

const KINDS: [(&str, usize); 4] = [("cls", 1), ("obj", 1), ("bbox", 4), ("kps", 10)];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5 (normalized [0,1])
}

/// All predictions of a single feature map
#[derive(Debug, Clone)]
pub struct ScaleOutput {
    pub stride: usize,
    pub cls: Array2<f32>,
    pub obj: Array2<f32>,
    pub bbox: Array2<f32>,
    pub kps: Array2<f32>,
}

impl ScaleOutput {
    fn grid(&self, input_size: usize) -> usize {
        input_size / self.stride
    }

    fn score(&self, idx: usize) -> f32 {
        let cls = self.cls[[idx, 0]].clamp(0.0, 1.0);
        let obj = self.obj[[idx, 0]].clamp(0.0, 1.0);
        (cls * obj).sqrt()
    }
}

fn tensor_view<'a>(
    outputs: &'a [(&[i64], &[f32])],
    index: usize,
    rows: usize,
    cols: usize,
    label: &str,
) -> Result<ArrayView2<'a, f32>> {
    let (shape, data) = *outputs
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing {} output at index {}", label, index))?;

    let matches = shape.len() == 3
        && shape[0] == 1
        && shape[1] as usize == rows
        && shape[2] as usize == cols;
    if !matches {
        anyhow::bail!(
            "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
            label,
            index,
            shape,
            rows,
            cols
        );
    }

    Ok(ArrayView2::from_shape((rows, cols), data)?)
}

/// Group the twelve raw YuNet outputs by stride, checking every shape against the grid implied
/// by `input_size`.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<ScaleOutput>> {
    if outputs.len() < KINDS.len() * STRIDES.len() {
        anyhow::bail!(
            "expected {} yunet outputs, got {}",
            KINDS.len() * STRIDES.len(),
            outputs.len()
        );
    }

    STRIDES
        .iter()
        .enumerate()
        .map(|(scale_idx, &stride)| {
            let grid = input_size / stride;
            let rows = grid * grid;
            let map = |kind_idx: usize| -> Result<Array2<f32>> {
                let (kind, cols) = KINDS[kind_idx];
                let index = kind_idx * STRIDES.len() + scale_idx;
                let label = format!("{}_{}", kind, stride);
                Ok(tensor_view(outputs, index, rows, cols, &label)?.to_owned())
            };
            Ok(ScaleOutput {
                stride,
                cls: map(0)?,
                obj: map(1)?,
                bbox: map(2)?,
                kps: map(3)?,
            })
        })
        .collect()
}

/// Decode every grid cell scoring at least `score_threshold` into a normalized detection
pub fn decode_detections(
    scales: &[ScaleOutput],
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let norm = input_size as f32;
    let mut detections = Vec::new();

    for scale in scales {
        let grid = scale.grid(input_size);
        let cells = scale.cls.nrows();
        if cells != grid * grid {
            anyhow::bail!(
                "expected {} cells for stride {} ({}x{} grid), got {}",
                grid * grid,
                scale.stride,
                grid,
                grid,
                cells
            );
        }
        let stride = scale.stride as f32;

        for row in 0..grid {
            for col in 0..grid {
                let idx = row * grid + col;
                let score = scale.score(idx);
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + scale.bbox[[idx, 0]]) * stride;
                let cy = (row as f32 + scale.bbox[[idx, 1]]) * stride;
                let w = scale.bbox[[idx, 2]].exp() * stride;
                let h = scale.bbox[[idx, 3]].exp() * stride;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    let x = (col as f32 + scale.kps[[idx, k * 2]]) * stride;
                    let y = (row as f32 + scale.kps[[idx, k * 2 + 1]]) * stride;
                    landmarks[k * 2] = x / norm;
                    landmarks[k * 2 + 1] = y / norm;
                }

                detections.push(RawDetection {
                    bbox: [
                        (cx - w / 2.0) / norm,
                        (cy - h / 2.0) / norm,
                        w / norm,
                        h / norm,
                    ],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}
