use crate::model::{ChannelOrder, ModelSpec, PixelNorm};
use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet is exported with a fixed [1, 3, 640, 640] input
pub const DETECTOR_INPUT_SIZE: u32 = 640;

/// Detection result from YuNet, in source image pixels
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Face embedding produced by a recognition model
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }
}

/// Placement of the source image inside the square detector canvas
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height) as f32;
        let new_width = (width as f32 * scale) as u32;
        let new_height = (height as f32 * scale) as u32;
        Self {
            scale,
            offset_x: ((target - new_width) / 2) as f32,
            offset_y: ((target - new_height) / 2) as f32,
        }
    }

    /// Map a canvas pixel back to source image pixels
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }

    fn apply(&self, img: &DynamicImage, target: u32) -> RgbImage {
        let (width, height) = img.dimensions();
        let resized = img.resize_exact(
            ((width as f32 * self.scale) as u32).max(1),
            ((height as f32 * self.scale) as u32).max(1),
            image::imageops::FilterType::Triangle,
        );
        let mut canvas = DynamicImage::new_rgb8(target, target);
        image::imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        canvas.to_rgb8()
    }
}

/// Split interleaved RGB pixels into three planes (CHW) in the requested channel order
pub fn to_planar(img: &RgbImage, order: ChannelOrder) -> Vec<f32> {
    let pixel_count = (img.width() * img.height()) as usize;
    let mut planes = vec![0.0f32; 3 * pixel_count];
    let (first, rest) = planes.split_at_mut(pixel_count);
    let (second, third) = rest.split_at_mut(pixel_count);

    for (i, px) in img.as_raw().chunks_exact(3).enumerate() {
        let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
        match order {
            ChannelOrder::Rgb => {
                first[i] = r;
                second[i] = g;
                third[i] = b;
            }
            ChannelOrder::Bgr => {
                first[i] = b;
                second[i] = g;
                third[i] = r;
            }
        }
    }

    planes
}

/// Apply pixel normalization in place on planar data
pub fn normalize_planes(planes: &mut [f32], norm: PixelNorm) {
    match norm {
        PixelNorm::Raw => {}
        PixelNorm::MeanSubtract(means) => {
            let plane_len = planes.len() / 3;
            if plane_len == 0 {
                return;
            }
            for (plane, mean) in planes.chunks_mut(plane_len).zip(means) {
                plane.iter_mut().for_each(|v| *v -= mean);
            }
        }
        PixelNorm::Affine { offset, scale } => {
            planes.iter_mut().for_each(|v| *v = (*v - offset) / scale);
        }
        PixelNorm::Prewhiten => {
            if planes.is_empty() {
                return;
            }
            let n = planes.len() as f32;
            let mean = planes.iter().sum::<f32>() / n;
            let var = planes.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
            // flat images would otherwise divide by zero
            let std = var.sqrt().max(1.0 / n.sqrt());
            planes.iter_mut().for_each(|v| *v = (*v - mean) / std);
        }
    }
}

/// Detect faces in an image using YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let target = DETECTOR_INPUT_SIZE;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("image has no pixels");
    }
    let letterbox = Letterbox::fit(width, height, target);
    let canvas = letterbox.apply(img, target);

    let input = Array4::from_shape_vec(
        (1, 3, target as usize, target as usize),
        to_planar(&canvas, ChannelOrder::Bgr),
    )?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let scales = yunet::parse_outputs(&output_refs, target as usize)?;
    let raw = yunet::decode_detections(&scales, score_threshold, target as usize)?;
    log::debug!("yunet produced {} raw detections", raw.len());

    let canvas_px = target as f32;
    let mut detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = letterbox.to_source(d.bbox[0] * canvas_px, d.bbox[1] * canvas_px);
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                let (lx, ly) = letterbox.to_source(
                    d.landmarks[k * 2] * canvas_px,
                    d.landmarks[k * 2 + 1] * canvas_px,
                );
                landmarks[k * 2] = lx;
                landmarks[k * 2 + 1] = ly;
            }
            Detection {
                bbox: [
                    x,
                    y,
                    d.bbox[2] * canvas_px / letterbox.scale,
                    d.bbox[3] * canvas_px / letterbox.scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    } else {
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    }

    Ok(detections)
}

/// Apply non-maximum suppression; the result is ordered by score, highest first
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        let overlaps = keep
            .iter()
            .any(|kept| compute_iou(&kept.bbox, &candidate.bbox) > iou_threshold);
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Rotation + uniform scale + translation mapping source pixels onto the aligned crop
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    // ArcFace reference eye positions for a 112x112 crop
    const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
    const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

    fn from_eyes(left: (f32, f32), right: (f32, f32), size: u32) -> Option<Self> {
        let unit = size as f32 / 112.0;
        let (rl, rr) = (Self::REF_LEFT_EYE, Self::REF_RIGHT_EYE);

        let dx = right.0 - left.0;
        let dy = right.1 - left.1;
        let eye_dist = (dx * dx + dy * dy).sqrt();
        if eye_dist <= f32::EPSILON {
            return None;
        }
        let ref_dist = ((rr.0 - rl.0).powi(2) + (rr.1 - rl.1).powi(2)).sqrt();
        let scale = unit * ref_dist / eye_dist;
        let angle = dy.atan2(dx);

        let a = scale * angle.cos();
        let b = scale * angle.sin();
        let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
        let ref_center = ((rl.0 + rr.0) / 2.0 * unit, (rl.1 + rr.1) / 2.0 * unit);

        // forward map: [a b; -b a] * p + t
        Some(Self {
            a,
            b,
            tx: ref_center.0 - (a * center.0 + b * center.1),
            ty: ref_center.1 - (-b * center.0 + a * center.1),
        })
    }

    /// Source coordinates of an output pixel
    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (px, py) = (x - self.tx, y - self.ty);
        (
            (self.a * px - self.b * py) / det,
            (self.b * px + self.a * py) / det,
        )
    }
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<image::Rgb<u8>> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let corners = [
        (img.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(x1, y0), fx * (1.0 - fy)),
        (img.get_pixel(x0, y1), (1.0 - fx) * fy),
        (img.get_pixel(x1, y1), fx * fy),
    ];
    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let v: f32 = corners.iter().map(|(p, w)| p[c] as f32 * w).sum();
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    Some(image::Rgb(out))
}

/// Align and crop a face to `size`x`size` using its eye landmarks.
///
/// Falls back to a plain crop of the bounding box when the eyes coincide.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);

    let Some(transform) = Similarity::from_eyes(left_eye, right_eye, size) else {
        log::debug!("degenerate eye landmarks, cropping bounding box instead");
        return crop_bbox(img, &detection.bbox, size);
    };

    let source = img.to_rgb8();
    let mut output = RgbImage::new(size, size);
    for (x, y, px) in output.enumerate_pixels_mut() {
        let (sx, sy) = transform.invert(x as f32, y as f32);
        if let Some(sample) = sample_bilinear(&source, sx, sy) {
            *px = sample;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

fn crop_bbox(img: &DynamicImage, bbox: &[f32; 4], size: u32) -> Result<DynamicImage> {
    let (w, h) = img.dimensions();
    let x = bbox[0].max(0.0) as u32;
    let y = bbox[1].max(0.0) as u32;
    if x >= w || y >= h {
        anyhow::bail!("face box {:?} lies outside the image", bbox);
    }
    let cw = (bbox[2].max(1.0) as u32).min(w - x);
    let ch = (bbox[3].max(1.0) as u32).min(h - y);
    Ok(img
        .crop_imm(x, y, cw, ch)
        .resize_exact(size, size, image::imageops::FilterType::Triangle))
}

/// Encode a face crop into an embedding with the given recognition model
pub fn encode_face(
    session: &mut Session,
    face_img: &DynamicImage,
    spec: &ModelSpec,
) -> Result<Embedding> {
    let size = spec.input_size;
    let face_rgb = face_img
        .resize_exact(size, size, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let mut planes = to_planar(&face_rgb, spec.channels);
    normalize_planes(&mut planes, spec.norm);

    let input = Array4::from_shape_vec((1, 3, size as usize, size as usize), planes)?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    if data.is_empty() {
        anyhow::bail!("recognition model returned an empty embedding");
    }
    if data.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("recognition model returned non-finite values");
    }

    Ok(Embedding::from(data.to_vec()))
}

/// Cosine similarity between two embeddings, in [-1, 1].
///
/// Only the common prefix is compared when lengths differ; zero vectors score 0.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.vector.iter().zip(b.vector.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);

        // No overlap
        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_planar_channel_order() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([1, 2, 3]));
        img.put_pixel(1, 0, image::Rgb([4, 5, 6]));

        assert_eq!(
            to_planar(&img, ChannelOrder::Rgb),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
        assert_eq!(
            to_planar(&img, ChannelOrder::Bgr),
            vec![3.0, 6.0, 2.0, 5.0, 1.0, 4.0]
        );
    }

    #[test]
    fn test_normalize_planes() {
        let mut planes = vec![10.0, 20.0, 30.0];
        normalize_planes(&mut planes, PixelNorm::MeanSubtract([1.0, 2.0, 3.0]));
        assert_eq!(planes, vec![9.0, 18.0, 27.0]);

        let mut planes = vec![127.5, 255.5];
        normalize_planes(
            &mut planes,
            PixelNorm::Affine {
                offset: 127.5,
                scale: 128.0,
            },
        );
        assert_eq!(planes, vec![0.0, 1.0]);

        let mut planes = vec![1.0, 3.0, 1.0, 3.0];
        normalize_planes(&mut planes, PixelNorm::Prewhiten);
        assert_eq!(planes, vec![-1.0, 1.0, -1.0, 1.0]);

        // constant input must not produce NaN
        let mut flat = vec![5.0; 12];
        normalize_planes(&mut flat, PixelNorm::Prewhiten);
        assert!(flat.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_letterbox_round_trip() {
        let lb = Letterbox::fit(1280, 640, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.offset_x, 0.0);
        assert_eq!(lb.offset_y, 160.0);
        let (x, y) = lb.to_source(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-4);
        assert!((y - 320.0).abs() < 1e-4);
    }

    #[test]
    fn test_alignment_maps_eyes_to_reference() {
        let t = Similarity::from_eyes((100.0, 120.0), (160.0, 130.0), 112).unwrap();
        // the inverse of a reference eye position lands on the detected eye
        let (lx, ly) = t.invert(Similarity::REF_LEFT_EYE.0, Similarity::REF_LEFT_EYE.1);
        let (rx, ry) = t.invert(Similarity::REF_RIGHT_EYE.0, Similarity::REF_RIGHT_EYE.1);
        let mid = ((lx + rx) / 2.0, (ly + ry) / 2.0);
        assert!((mid.0 - 130.0).abs() < 0.5, "{:?}", mid);
        assert!((mid.1 - 125.0).abs() < 0.5, "{:?}", mid);
        assert!(Similarity::from_eyes((5.0, 5.0), (5.0, 5.0), 112).is_none());
    }

    #[test]
    fn test_align_face_output_size() {
        let img = DynamicImage::new_rgb8(200, 200);
        let mut detection = det([50.0, 50.0, 100.0, 100.0], 0.9);
        detection.landmarks[..4].copy_from_slice(&[80.0, 90.0, 120.0, 90.0]);
        let aligned = align_face(&img, &detection, 160).unwrap();
        assert_eq!(aligned.dimensions(), (160, 160));

        // coincident eyes fall back to a box crop
        detection.landmarks[..4].copy_from_slice(&[80.0, 90.0, 80.0, 90.0]);
        let cropped = align_face(&img, &detection, 112).unwrap();
        assert_eq!(cropped.dimensions(), (112, 112));
    }

    #[test]
    fn test_cosine_similarity() {
        let a = Embedding::from(vec![1.0, 0.0]);
        let b = Embedding::from(vec![0.0, 1.0]);
        let c = Embedding::from(vec![-2.0, 0.0]);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_similarity(&a, &c) + 1.0).abs() < 1e-6);

        let zero = Embedding::from(vec![0.0, 0.0]);
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
    }
}
