//! Pure-Rust [`ImageOps`] over `image` buffers

use image::GrayImage;

use super::ImageOps;
use crate::convert::PackedImage;
use crate::error::OpsError;

/// In-process implementation of the image-processing capability
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeOps;

impl ImageOps for NativeOps {
    /// BT.601 luminance with integer math; gray input maps to itself
    fn to_gray(&self, image: &PackedImage) -> Result<GrayImage, OpsError> {
        let luma = image
            .data()
            .chunks_exact(4)
            .map(|px| {
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                ((299 * r + 587 * g + 114 * b + 500) / 1000) as u8
            })
            .collect();

        GrayImage::from_raw(image.width(), image.height(), luma).ok_or(OpsError::Dimensions {
            width: image.width(),
            height: image.height(),
        })
    }

    fn blur(&self, gray: &GrayImage, kernel_size: u32, sigma: f32) -> Result<GrayImage, OpsError> {
        if kernel_size == 0 || kernel_size % 2 == 0 {
            return Err(OpsError::Other(format!(
                "blur kernel size must be odd, got {kernel_size}"
            )));
        }
        if sigma.is_nan() || sigma <= 0.0 {
            return Err(OpsError::Other(format!("blur sigma must be positive, got {sigma}")));
        }

        let (w, h) = (gray.width() as usize, gray.height() as usize);
        if w == 0 || h == 0 {
            return Ok(gray.clone());
        }
        let kernel = gaussian_kernel(kernel_size as usize, sigma);
        let src = gray.as_raw();
        let radius = (kernel.len() / 2) as isize;

        // Separable: horizontal into f32, then vertical back to u8
        let mut horizontal = vec![0f32; w * h];
        for y in 0..h {
            let row = &src[y * w..(y + 1) * w];
            for x in 0..w {
                horizontal[y * w + x] = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        let sx = reflect101(x as isize + k as isize - radius, w);
                        weight * row[sx] as f32
                    })
                    .sum();
            }
        }

        let mut out = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let acc: f32 = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        let sy = reflect101(y as isize + k as isize - radius, h);
                        weight * horizontal[sy * w + x]
                    })
                    .sum();
                out[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }

        GrayImage::from_raw(gray.width(), gray.height(), out).ok_or(OpsError::Dimensions {
            width: gray.width(),
            height: gray.height(),
        })
    }

    /// Canny-style edges: Sobel, non-maximum suppression, hysteresis
    fn edges(&self, gray: &GrayImage, low: f32, high: f32) -> Result<GrayImage, OpsError> {
        if low > high {
            return Err(OpsError::Other(format!(
                "low threshold {low} exceeds high threshold {high}"
            )));
        }

        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let gradients = sobel(gray.as_raw(), w, h);
        let thinned = non_maximum_suppression(&gradients, w, h);
        let edges = hysteresis(&thinned, w, h, low, high);

        GrayImage::from_raw(gray.width(), gray.height(), edges).ok_or(OpsError::Dimensions {
            width: gray.width(),
            height: gray.height(),
        })
    }
}

fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let radius = (size / 2) as f32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - radius;
            (-(d * d) / denom).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Mirror an out-of-range index without repeating the edge sample
#[inline]
fn reflect101(mut i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

struct Gradients {
    gx: Vec<i32>,
    gy: Vec<i32>,
    magnitude: Vec<i32>,
}

fn sobel(src: &[u8], w: usize, h: usize) -> Gradients {
    let at = |x: isize, y: isize| src[reflect101(y, h) * w + reflect101(x, w)] as i32;

    let mut gx = vec![0i32; w * h];
    let mut gy = vec![0i32; w * h];
    let mut magnitude = vec![0i32; w * h];

    for y in 0..h as isize {
        for x in 0..w as isize {
            let dx = (at(x + 1, y - 1) + 2 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2 * at(x - 1, y) + at(x - 1, y + 1));
            let dy = (at(x - 1, y + 1) + 2 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2 * at(x, y - 1) + at(x + 1, y - 1));

            let idx = y as usize * w + x as usize;
            gx[idx] = dx;
            gy[idx] = dy;
            // L1 norm
            magnitude[idx] = dx.abs() + dy.abs();
        }
    }

    Gradients { gx, gy, magnitude }
}

fn non_maximum_suppression(g: &Gradients, w: usize, h: usize) -> Vec<i32> {
    let mag = |x: isize, y: isize| {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0
        } else {
            g.magnitude[y as usize * w + x as usize]
        }
    };

    let mut out = vec![0i32; w * h];
    for y in 0..h as isize {
        for x in 0..w as isize {
            let idx = y as usize * w + x as usize;
            let m = g.magnitude[idx];
            if m == 0 {
                continue;
            }

            let (dx, dy) = (g.gx[idx], g.gy[idx]);
            let (ax, ay) = (dx.abs() as i64, dy.abs() as i64);

            // tan(22.5°) ≈ 0.4142, tan(67.5°) ≈ 2.4142
            let (a, b) = if ay * 10_000 <= ax * 4_142 {
                (mag(x - 1, y), mag(x + 1, y))
            } else if ay * 10_000 >= ax * 24_142 {
                (mag(x, y - 1), mag(x, y + 1))
            } else if (dx > 0) == (dy > 0) {
                (mag(x - 1, y - 1), mag(x + 1, y + 1))
            } else {
                (mag(x + 1, y - 1), mag(x - 1, y + 1))
            };

            if m > a && m >= b {
                out[idx] = m;
            }
        }
    }
    out
}

fn hysteresis(thinned: &[i32], w: usize, h: usize, low: f32, high: f32) -> Vec<u8> {
    let mut edges = vec![0u8; w * h];
    let mut stack: Vec<usize> = thinned
        .iter()
        .enumerate()
        .filter(|&(_, &m)| m as f32 > high)
        .map(|(idx, _)| idx)
        .collect();

    for &idx in &stack {
        edges[idx] = u8::MAX;
    }

    while let Some(idx) = stack.pop() {
        let (x, y) = ((idx % w) as isize, (idx / w) as isize);
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if edges[n] == 0 && thinned[n] as f32 > low {
                    edges[n] = u8::MAX;
                    stack.push(n);
                }
            }
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_of_gray_is_stable() {
        let img = PackedImage::filled(2, 2, [77, 77, 77, 255]);
        let gray = NativeOps.to_gray(&img).unwrap();
        assert!(gray.as_raw().iter().all(|&g| g == 77));
    }

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(5, 1.5);
        assert_eq!(kernel.len(), 5);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((kernel[0] - kernel[4]).abs() < 1e-6);
        assert!(kernel[2] > kernel[1]);
    }

    #[test]
    fn test_blur_keeps_flat_image() {
        let gray = GrayImage::from_pixel(9, 9, image::Luma([200]));
        let blurred = NativeOps.blur(&gray, 5, 1.5).unwrap();
        assert!(blurred.as_raw().iter().all(|&g| g == 200));
    }

    #[test]
    fn test_blur_rejects_even_kernel() {
        let gray = GrayImage::new(4, 4);
        assert!(NativeOps.blur(&gray, 4, 1.5).is_err());
    }

    #[test]
    fn test_blur_softens_step() {
        let mut gray = GrayImage::new(10, 1);
        for x in 5..10 {
            gray.put_pixel(x, 0, image::Luma([255]));
        }
        let blurred = NativeOps.blur(&gray, 5, 1.5).unwrap();
        let v = blurred.get_pixel(5, 0).0[0];
        assert!(v > 0 && v < 255);
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(3, 1), 0);
        assert_eq!(reflect101(-3, 2), 1);
    }

    #[test]
    fn test_vertical_step_gives_thin_edge() {
        let mut gray = GrayImage::new(20, 20);
        for y in 0..20 {
            for x in 10..20 {
                gray.put_pixel(x, y, image::Luma([255]));
            }
        }
        let edges = NativeOps.edges(&gray, 50.0, 150.0).unwrap();

        // Away from the borders each row carries a one-pixel-wide edge
        for y in 2..18 {
            let count = (0..20).filter(|&x| edges.get_pixel(x, y).0[0] == 255).count();
            assert_eq!(count, 1, "row {y}");
        }
        assert!(edges.as_raw().iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn test_weak_gradient_below_low_threshold_is_ignored() {
        let mut gray = GrayImage::from_pixel(12, 12, image::Luma([100]));
        for y in 0..12 {
            for x in 6..12 {
                gray.put_pixel(x, y, image::Luma([105]));
            }
        }
        let edges = NativeOps.edges(&gray, 50.0, 150.0).unwrap();
        assert!(edges.as_raw().iter().all(|&v| v == 0));
    }
}
