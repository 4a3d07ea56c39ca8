//! Color-space fallback analyzer
//!
//! Works on a strided subset of pixels. Skin-tone pixels drive the face
//! estimate; dark-uniform pixels away from the frame edges are phone-screen
//! candidates; luma differences between consecutive frames give a coarse
//! motion score.

use super::{AnalyzerKind, FrameAnalyzer, FrameObservation};
use crate::config::HeuristicConfig;
use crate::media::Frame;

/// Grid used for the face estimate
const GRID_COLUMNS: usize = 5;
const GRID_ROWS: usize = 3;

/// Most faces the estimate reports
const MAX_FACES: usize = 3;

/// Portrait and landscape height/width ranges accepted for a phone
const PORTRAIT_ASPECT: (f32, f32) = (1.2, 3.0);
const LANDSCAPE_ASPECT: (f32, f32) = (0.4, 0.9);

/// Pixel coordinates of sampled pixels, split by class
#[derive(Debug, Clone, Default)]
pub struct PixelScan {
    pub skin: Vec<(u32, u32)>,
    pub dark: Vec<(u32, u32)>,
    pub samples: usize,
    pub width: u32,
    pub height: u32,
}

/// Layered skin-tone rules over RGB ratios, light to dark
pub fn is_skin(rgb: [u8; 3]) -> bool {
    let [r, g, b] = rgb;
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);

    // Light tones: strong red dominance with enough chroma spread
    let light = r > 95
        && g > 40
        && b > 20
        && max - min > 15
        && r.abs_diff(g) > 15
        && r > g
        && r > b;
    if light {
        return true;
    }

    let red_green = rf / gf.max(1.0);
    let red_blue = rf / bf.max(1.0);

    // Medium tones: lower contrast, ordered channels
    let medium = r > 80
        && g > 50
        && b > 30
        && r >= g
        && g >= b
        && (1.05..=1.8).contains(&red_green)
        && (1.15..=3.0).contains(&red_blue);
    if medium {
        return true;
    }

    // Dark tones: low brightness, red still leads
    r > 40
        && g > 25
        && b > 15
        && max <= 150
        && r > g
        && (1.1..=1.9).contains(&red_green)
        && (1.2..=3.5).contains(&red_blue)
}

/// Near-black, dark-gray, or dark-blue uniform pixel, as a lit phone back or off screen
pub fn is_dark_uniform(rgb: [u8; 3]) -> bool {
    let [r, g, b] = rgb;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let spread = max - min;

    let near_black = max < 45 && spread < 15;
    let dark_gray = max < 90 && spread <= 12;
    let dark_blue = b <= 120
        && r <= 70
        && g <= 80
        && u16::from(b) >= u16::from(r) + 15
        && u16::from(b) >= u16::from(g) + 10;

    near_black || dark_gray || dark_blue
}

/// Classify a strided subset of the frame's pixels
pub fn scan_frame(frame: &Frame, config: &HeuristicConfig) -> PixelScan {
    let stride = config.sample_stride.max(1) as usize;
    let (width, height) = (frame.width(), frame.height());
    let margin_x = (width as f32 * config.edge_margin_x) as u32;
    let margin_y = (height as f32 * config.edge_margin_y) as u32;

    let mut scan = PixelScan {
        width,
        height,
        ..Default::default()
    };

    for y in (0..height).step_by(stride) {
        for x in (0..width).step_by(stride) {
            scan.samples += 1;
            let rgb = frame.rgb(x, y);
            if is_skin(rgb) {
                scan.skin.push((x, y));
                continue;
            }
            let interior = x >= margin_x
                && x < width.saturating_sub(margin_x)
                && y >= margin_y
                && y < height.saturating_sub(margin_y);
            if interior && is_dark_uniform(rgb) {
                scan.dark.push((x, y));
            }
        }
    }

    scan
}

fn min_skin_pixels(scan: &PixelScan, config: &HeuristicConfig) -> usize {
    ((scan.samples as f32 * config.min_skin_fraction).ceil() as usize).max(1)
}

/// Estimate how many faces the skin pixels belong to
pub fn estimate_face_count(scan: &PixelScan, config: &HeuristicConfig) -> usize {
    if scan.skin.len() < min_skin_pixels(scan, config) {
        return 0;
    }

    let mut cells = [[0usize; GRID_COLUMNS]; GRID_ROWS];
    for &(x, y) in &scan.skin {
        let column = (x as usize * GRID_COLUMNS / scan.width as usize).min(GRID_COLUMNS - 1);
        let row = (y as usize * GRID_ROWS / scan.height as usize).min(GRID_ROWS - 1);
        cells[row][column] += 1;
    }

    let samples_per_cell = scan.samples as f32 / (GRID_COLUMNS * GRID_ROWS) as f32;
    let cell_minimum = samples_per_cell * config.min_cell_skin_fraction;

    let mut is_region = [[false; GRID_COLUMNS]; GRID_ROWS];
    for row in 0..GRID_ROWS {
        for column in 0..GRID_COLUMNS {
            is_region[row][column] = cells[row][column] as f32 > cell_minimum;
        }
    }

    // Merge regions touching within one cell (including diagonals)
    let mut visited = [[false; GRID_COLUMNS]; GRID_ROWS];
    let mut centers: Vec<f32> = Vec::new();
    for row in 0..GRID_ROWS {
        for column in 0..GRID_COLUMNS {
            if !is_region[row][column] || visited[row][column] {
                continue;
            }
            let mut stack = vec![(row, column)];
            visited[row][column] = true;
            let mut column_sum = 0usize;
            let mut members = 0usize;
            while let Some((r, c)) = stack.pop() {
                column_sum += c;
                members += 1;
                for nr in r.saturating_sub(1)..=(r + 1).min(GRID_ROWS - 1) {
                    for nc in c.saturating_sub(1)..=(c + 1).min(GRID_COLUMNS - 1) {
                        if is_region[nr][nc] && !visited[nr][nc] {
                            visited[nr][nc] = true;
                            stack.push((nr, nc));
                        }
                    }
                }
            }
            centers.push(column_sum as f32 / members as f32);
        }
    }

    centers.sort_by(|a, b| a.total_cmp(b));
    let mut faces = 0;
    let mut last_counted: Option<f32> = None;
    for center in centers {
        if last_counted.map_or(true, |last| center - last >= 2.0) {
            faces += 1;
            last_counted = Some(center);
        }
    }
    faces.min(MAX_FACES)
}

/// Inclusive bounding box of sampled pixels, widened by one stride
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    fn around(points: &[(u32, u32)], stride: u32) -> Option<Self> {
        let (&(first_x, first_y), rest) = points.split_first()?;
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first_x, first_x, first_y, first_y);
        for &(x, y) in rest {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
        Some(Self {
            min_x,
            min_y,
            width: max_x - min_x + stride,
            height: max_y - min_y + stride,
        })
    }

    /// Height over width
    pub fn aspect_ratio(&self) -> f32 {
        self.height as f32 / self.width.max(1) as f32
    }
}

/// Phone heuristic: a dark, phone-shaped, well-filled region held near skin
pub fn detect_phone(scan: &PixelScan, config: &HeuristicConfig) -> bool {
    let min_dark = ((scan.samples as f32 * config.min_dark_fraction).ceil() as usize).max(1);
    if scan.dark.len() < min_dark || scan.skin.len() < min_skin_pixels(scan, config) {
        return false;
    }

    let stride = config.sample_stride.max(1);
    let Some(bbox) = BoundingBox::around(&scan.dark, stride) else {
        return false;
    };

    let aspect = bbox.aspect_ratio();
    let phone_shaped = (PORTRAIT_ASPECT.0..=PORTRAIT_ASPECT.1).contains(&aspect)
        || (LANDSCAPE_ASPECT.0..=LANDSCAPE_ASPECT.1).contains(&aspect);
    if !phone_shaped {
        return false;
    }

    let smaller = bbox.width.min(bbox.height);
    let larger = bbox.width.max(bbox.height);
    if smaller < config.phone_min_size_px || larger > config.phone_max_size_px {
        return false;
    }

    let cells_in_box = ((bbox.width / stride).max(1) * (bbox.height / stride).max(1)) as f32;
    let fill = scan.dark.len() as f32 / cells_in_box;
    if fill <= config.phone_min_fill {
        return false;
    }

    let held = held_ratio(scan, config);
    tracing::trace!(aspect, fill, held, "Phone candidate");
    held > config.phone_proximity_ratio
}

/// Share of sampled dark pixels lying within the hand radius of a skin pixel
fn held_ratio(scan: &PixelScan, config: &HeuristicConfig) -> f32 {
    let wanted = config.phone_proximity_samples.max(1);
    let step = (scan.dark.len() / wanted).max(1);
    let radius_sq = u64::from(config.phone_skin_radius_px).pow(2);

    let mut checked = 0usize;
    let mut near = 0usize;
    for &(dx, dy) in scan.dark.iter().step_by(step).take(wanted) {
        checked += 1;
        let close = scan.skin.iter().any(|&(sx, sy)| {
            let ddx = u64::from(dx.abs_diff(sx));
            let ddy = u64::from(dy.abs_diff(sy));
            ddx * ddx + ddy * ddy <= radius_sq
        });
        if close {
            near += 1;
        }
    }

    if checked == 0 {
        0.0
    } else {
        near as f32 / checked as f32
    }
}

/// Integer luma approximation (BT.601 weights)
#[inline]
fn luma(rgb: [u8; 3]) -> u8 {
    let [r, g, b] = rgb;
    ((299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000) as u8
}

/// Frame-differencing over a fixed number of evenly spaced pixels
#[derive(Debug, Clone, Default)]
pub struct MotionTracker {
    previous: Option<(u32, u32, Vec<u8>)>,
}

impl MotionTracker {
    /// Score in [0, 1] against the previous frame; the first frame scores 0
    pub fn score(&mut self, frame: &Frame, sample_count: usize) -> f32 {
        let (width, height) = (frame.width(), frame.height());
        let total = width as usize * height as usize;
        let step = (total / sample_count.max(1)).max(1);

        let current: Vec<u8> = (0..total)
            .step_by(step)
            .map(|i| luma(frame.rgb((i % width as usize) as u32, (i / width as usize) as u32)))
            .collect();

        let score = match &self.previous {
            Some((w, h, previous)) if *w == width && *h == height => {
                let diff: u64 = current
                    .iter()
                    .zip(previous)
                    .map(|(a, b)| u64::from(a.abs_diff(*b)))
                    .sum();
                diff as f32 / (current.len().max(1) as f32 * 255.0)
            }
            _ => 0.0,
        };

        self.previous = Some((width, height, current));
        score.clamp(0.0, 1.0)
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// The always-available fallback analyzer
#[derive(Debug, Clone)]
pub struct ColorHeuristicAnalyzer {
    config: HeuristicConfig,
    motion: MotionTracker,
}

impl ColorHeuristicAnalyzer {
    pub fn new(config: HeuristicConfig) -> Self {
        Self {
            config,
            motion: MotionTracker::default(),
        }
    }
}

impl FrameAnalyzer for ColorHeuristicAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::ColorHeuristic
    }

    fn analyze(&mut self, frame: &Frame) -> FrameObservation {
        let scan = scan_frame(frame, &self.config);
        let face_count = estimate_face_count(&scan, &self.config);
        let phone = detect_phone(&scan, &self.config);
        let motion_score = self.motion.score(frame, self.config.motion_sample_count);

        FrameObservation {
            face_count,
            looking_away: false,
            suspicious_movement: motion_score > self.config.motion_threshold,
            phone,
            motion_score: Some(motion_score),
        }
    }
}
