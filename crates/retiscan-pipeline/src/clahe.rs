//! Contrast Limited Adaptive Histogram Equalization.
//!
//! The plane is split into a grid of tiles. Each tile gets its own
//! equalization lookup table built from a clipped histogram, and every
//! output pixel is a bilinear blend of the tables of the four nearest tile
//! centers, which avoids visible seams at tile borders.

use image::GrayImage;

/// Number of histogram bins for 8-bit samples.
const BINS: usize = 256;

/// Apply CLAHE to a single 8-bit plane.
///
/// `grid` is `(columns, rows)`; zero entries are treated as 1 and entries
/// larger than the plane are reduced to one tile per pixel. Otherwise exactly
/// `grid` tiles are used, with the leftover pixels of an uneven split spread
/// one each over the leading tiles. A zero-sized plane is returned unchanged.
#[must_use = "returns the equalized plane"]
pub fn clahe(plane: &GrayImage, clip_limit: f32, grid: (u32, u32)) -> GrayImage {
    let (width, height) = plane.dimensions();
    if width == 0 || height == 0 {
        return plane.clone();
    }

    let columns = TileAxis::new(width, grid.0);
    let rows = TileAxis::new(height, grid.1);

    let mut luts = Vec::with_capacity(columns.count() * rows.count());
    for ty in 0..rows.count() {
        let (y0, th) = rows.span(ty);
        for tx in 0..columns.count() {
            let (x0, tw) = columns.span(tx);
            let tile = image::imageops::crop_imm(plane, x0, y0, tw, th).to_image();
            let histogram = imageproc::stats::histogram(&tile).channels[0];
            luts.push(tile_lut(histogram, u64::from(tw) * u64::from(th), clip_limit));
        }
    }

    let blend_x = columns.blend_weights();
    let blend_y = rows.blend_weights();
    let stride = columns.count();

    GrayImage::from_fn(width, height, |x, y| {
        let (tx1, tx2, xa) = blend_x[x as usize];
        let (ty1, ty2, ya) = blend_y[y as usize];
        let v = usize::from(plane.get_pixel(x, y).0[0]);

        let lut = |tx: usize, ty: usize| f32::from(luts[ty * stride + tx][v]);
        let top = lut(tx1, ty1).mul_add(1.0 - xa, lut(tx2, ty1) * xa);
        let bottom = lut(tx1, ty2).mul_add(1.0 - xa, lut(tx2, ty2) * xa);
        let value = top.mul_add(1.0 - ya, bottom * ya);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let out = value.round().clamp(0.0, 255.0) as u8;
        image::Luma([out])
    })
}

/// Split of one image axis into tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileAxis {
    /// Tile count, at least 1 and at most the axis length.
    tiles: u32,
    /// Length of the shorter tiles.
    base: u32,
    /// Number of leading tiles one pixel longer than `base`.
    longer: u32,
}

impl TileAxis {
    fn new(len: u32, requested: u32) -> Self {
        let tiles = requested.clamp(1, len.max(1));
        Self {
            tiles,
            base: len / tiles,
            longer: len % tiles,
        }
    }

    const fn count(self) -> usize {
        self.tiles as usize
    }

    /// Start and length of tile `index`.
    fn span(self, index: usize) -> (u32, u32) {
        #[allow(clippy::cast_possible_truncation)]
        let index = index as u32;
        let start = index * self.base + index.min(self.longer);
        let len = self.base + u32::from(index < self.longer);
        (start, len)
    }

    /// Center of tile `index`, in pixel coordinates.
    #[allow(clippy::cast_precision_loss)]
    fn center(self, index: usize) -> f32 {
        let (start, len) = self.span(index);
        start as f32 + len as f32 / 2.0
    }

    /// For every pixel along the axis, the two tiles whose centers bracket
    /// the pixel center and the blend weight of the second.
    ///
    /// Pixels before the first tile center or after the last clamp both
    /// indices to the edge tile.
    fn blend_weights(self) -> Vec<(usize, usize, f32)> {
        let len = self.base * self.tiles + self.longer;
        let last = self.count() - 1;
        let mut lo = 0;
        (0..len)
            .map(|x| {
                #[allow(clippy::cast_precision_loss)]
                let p = x as f32 + 0.5;
                while lo < last && self.center(lo + 1) <= p {
                    lo += 1;
                }
                let c0 = self.center(lo);
                if lo == last || p <= c0 {
                    (lo, lo, 0.0)
                } else {
                    let c1 = self.center(lo + 1);
                    (lo, lo + 1, (p - c0) / (c1 - c0))
                }
            })
            .collect()
    }
}

/// Build the equalization table for one tile.
///
/// Bins above `max(1, clip_limit * area / 256)` are clipped; the clipped
/// excess is spread evenly over all bins with any remainder added one
/// count at a time at a fixed stride.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn tile_lut(mut histogram: [u32; BINS], area: u64, clip_limit: f32) -> [u8; BINS] {
    let clip = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);

    let mut excess: u64 = 0;
    for count in &mut histogram {
        if *count > clip {
            excess += u64::from(*count - clip);
            *count = clip;
        }
    }

    let batch = (excess / BINS as u64) as u32;
    let residual = (excess % BINS as u64) as usize;
    for count in &mut histogram {
        *count += batch;
    }
    if residual > 0 {
        let step = (BINS / residual).max(1);
        for idx in (0..BINS).step_by(step).take(residual) {
            histogram[idx] += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; BINS];
    let mut cumulative: u64 = 0;
    for (entry, count) in lut.iter_mut().zip(histogram) {
        cumulative += u64::from(count);
        *entry = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn low_contrast_gradient(w: u32, h: u32) -> GrayImage {
        // Values confined to [100, 131].
        GrayImage::from_fn(w, h, |x, y| image::Luma([100 + ((x + y) % 32) as u8]))
    }

    fn spread(img: &GrayImage) -> u8 {
        let min = img.pixels().map(|p| p.0[0]).min().unwrap_or(0);
        let max = img.pixels().map(|p| p.0[0]).max().unwrap_or(0);
        max - min
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = low_contrast_gradient(64, 48);
        let out = clahe(&img, 2.0, (8, 8));
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn empty_plane_returned_unchanged() {
        let img = GrayImage::new(0, 0);
        assert_eq!(clahe(&img, 2.0, (8, 8)).dimensions(), (0, 0));
    }

    #[test]
    fn constant_plane_stays_constant() {
        let img = GrayImage::from_pixel(64, 64, image::Luma([90]));
        let out = clahe(&img, 2.0, (8, 8));
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn stretches_low_contrast() {
        let img = low_contrast_gradient(64, 64);
        let out = clahe(&img, 2.0, (8, 8));
        assert!(
            spread(&out) > spread(&img),
            "expected wider range, got {} vs {}",
            spread(&out),
            spread(&img),
        );
    }

    #[test]
    fn higher_clip_limit_allows_more_contrast() {
        let img = low_contrast_gradient(64, 64);
        let gentle = clahe(&img, 1.0, (4, 4));
        let strong = clahe(&img, 4.0, (4, 4));
        assert!(spread(&strong) >= spread(&gentle));
    }

    #[test]
    fn is_deterministic() {
        let img = low_contrast_gradient(50, 70);
        assert_eq!(clahe(&img, 2.0, (8, 8)), clahe(&img, 2.0, (8, 8)));
    }

    #[test]
    fn plane_smaller_than_grid() {
        let img = GrayImage::from_fn(3, 2, |x, _| image::Luma([if x == 0 { 10 } else { 200 }]));
        let out = clahe(&img, 2.0, (8, 8));
        assert_eq!(out.dimensions(), (3, 2));
    }

    #[test]
    fn lut_is_monotonic_and_reaches_white() {
        let mut histogram = [0u32; BINS];
        histogram[10] = 50;
        histogram[200] = 14;
        let lut = tile_lut(histogram, 64, 2.0);
        assert!(lut.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(lut[BINS - 1], 255);
    }

    #[test]
    fn uneven_split_keeps_requested_grid() {
        let axis = TileAxis::new(20, 8);
        assert_eq!(axis.count(), 8);
        let spans: Vec<(u32, u32)> = (0..axis.count()).map(|i| axis.span(i)).collect();
        assert_eq!(spans[0], (0, 3));
        assert_eq!(spans[3], (9, 3));
        assert_eq!(spans[4], (12, 2));
        assert_eq!(spans[7], (18, 2));
        assert_eq!(spans.iter().map(|&(_, len)| len).sum::<u32>(), 20);
    }

    #[test]
    fn grid_larger_than_axis_shrinks_to_pixels() {
        let axis = TileAxis::new(3, 8);
        assert_eq!(axis.count(), 3);
        assert!((0..3).all(|i| axis.span(i).1 == 1));
    }

    #[test]
    fn blend_weights_clamp_at_edges() {
        let weights = TileAxis::new(16, 4).blend_weights();
        assert_eq!(weights.len(), 16);
        // Tile centers sit at 2, 6, 10, 14.
        assert_eq!(weights[0], (0, 0, 0.0));
        assert_eq!(weights[15], (3, 3, 0.0));
        let (lo, hi, w) = weights[4];
        assert_eq!((lo, hi), (0, 1));
        assert!((w - 0.625).abs() < 1e-6);
        assert!(weights.iter().all(|&(_, _, w)| (0.0..1.0).contains(&w)));
    }

    #[test]
    fn uneven_plane_is_equalized() {
        let img = low_contrast_gradient(20, 20);
        let out = clahe(&img, 2.0, (8, 8));
        assert_eq!(out.dimensions(), (20, 20));
        assert!(spread(&out) > spread(&img));
    }
}
