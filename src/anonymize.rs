//! Face blurring.
//!
//! Relative detections are mapped onto pixel rectangles and each rectangle is
//! replaced by its box-filtered (mean) version. The kernel scales with the
//! rectangle so small faces are blurred as thoroughly as large ones.

use crate::detect::RelativeBox;
use crate::frame::Frame;

/// Integer pixel rectangle, half-open: `[x1, x2) × [y1, y2)`.
///
/// Invariant: `0 <= x1 < x2 <= width` and `0 <= y1 < y2 <= height` for the
/// frame it was derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelRect {
    /// Map a relative box onto a `width` × `height` frame.
    ///
    /// Coordinates are floored, the origin clamped to the frame, the extent
    /// forced to at least one pixel and the far corner clamped to the frame
    /// edge. Returns `None` when nothing of the box lands inside the frame.
    pub fn from_relative(rel: &RelativeBox, width: u32, height: u32) -> Option<Self> {
        let (w_img, h_img) = (i64::from(width), i64::from(height));

        // `as` saturates and maps NaN to 0.
        let x1 = (rel.x_min * width as f32).floor() as i64;
        let y1 = (rel.y_min * height as f32).floor() as i64;
        let w = (rel.width * width as f32).floor() as i64;
        let h = (rel.height * height as f32).floor() as i64;

        let x1 = x1.max(0);
        let y1 = y1.max(0);
        let w = w.max(1);
        let h = h.max(1);
        let x2 = x1.saturating_add(w).min(w_img);
        let y2 = y1.saturating_add(h).min(h_img);

        if x1 >= x2 || y1 >= y2 {
            return None;
        }
        Some(Self {
            x1: x1 as u32,
            y1: y1 as u32,
            x2: x2 as u32,
            y2: y2 as u32,
        })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    /// Blur kernel for this rectangle: about a third of each side, odd, >= 1.
    pub fn kernel(&self) -> (u32, u32) {
        (odd_kernel(self.width()), odd_kernel(self.height()))
    }
}

fn odd_kernel(side: u32) -> u32 {
    ((side / 3) | 1).max(1)
}

/// Blur every detected face in place and hand the frame back.
///
/// Boxes that fall entirely outside the frame are skipped. Overlapping boxes
/// blur their intersection twice.
pub fn anonymize<'a>(frame: &'a mut Frame, boxes: &[RelativeBox]) -> &'a mut Frame {
    let (width, height) = (frame.width(), frame.height());
    for rel in boxes {
        if let Some(rect) = PixelRect::from_relative(rel, width, height) {
            let (kw, kh) = rect.kernel();
            box_blur(frame, rect, kw, kh);
        }
    }
    frame
}

/// Mean filter over `rect` only, with a `kw` × `kh` kernel.
///
/// Borders reflect inside the rectangle (reflect-101), so pixels outside the
/// rectangle are neither read nor written. Both passes keep a running window
/// sum, so the cost per pixel does not depend on the kernel size.
pub fn box_blur(frame: &mut Frame, rect: PixelRect, kw: u32, kh: u32) {
    let rw = rect.width() as usize;
    let rh = rect.height() as usize;
    let rx = (kw / 2) as isize;
    let ry = (kh / 2) as isize;
    if rx == 0 && ry == 0 {
        return;
    }

    let stride = frame.width() as usize * 3;
    let origin = rect.y1 as usize * stride + rect.x1 as usize * 3;
    let data = frame.as_bytes_mut();

    // Horizontal pass: window sums along each row into a u32 scratch plane.
    let mut horiz = vec![0u32; rw * rh * 3];
    for y in 0..rh {
        let row = origin + y * stride;
        let sample = |x: isize, c: usize| u32::from(data[row + reflect101(x, rw) * 3 + c]);
        let mut acc = [0u32; 3];
        for dx in -rx..=rx {
            for (c, a) in acc.iter_mut().enumerate() {
                *a += sample(dx, c);
            }
        }
        for x in 0..rw {
            let o = (y * rw + x) * 3;
            horiz[o..o + 3].copy_from_slice(&acc);
            let (enter, leave) = (x as isize + rx + 1, x as isize - rx);
            for (c, a) in acc.iter_mut().enumerate() {
                *a = *a + sample(enter, c) - sample(leave, c);
            }
        }
    }

    // Vertical pass: one running sum per column, written back averaged.
    let area = ((2 * rx + 1) * (2 * ry + 1)) as u32;
    let row_sums = |y: isize| {
        let start = reflect101(y, rh) * rw * 3;
        &horiz[start..start + rw * 3]
    };
    let mut acc = vec![0u32; rw * 3];
    for dy in -ry..=ry {
        for (a, v) in acc.iter_mut().zip(row_sums(dy)) {
            *a += v;
        }
    }
    for y in 0..rh {
        let row = origin + y * stride;
        for (i, a) in acc.iter().enumerate() {
            data[row + i] = ((a + area / 2) / area) as u8;
        }
        let (enter, leave) = (row_sums(y as isize + ry + 1), row_sums(y as isize - ry));
        for ((a, e), l) in acc.iter_mut().zip(enter).zip(leave) {
            *a = *a + e - l;
        }
    }
}

/// Reflect an index into `[0, n)` without repeating the edge sample.
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as usize
}
