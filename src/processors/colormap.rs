//! Heat-map coloring and alpha blending for saliency overlays.

use image::{Luma, Rgb};

/// Maps a weight in `[0, 1]` onto the JET colormap (blue, cyan, yellow, red).
///
/// Out-of-range and NaN inputs are clamped to the nearest end of the scale.
pub fn jet(value: f32) -> Rgb<u8> {
    let v = if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    };
    let channel = |center: f32| {
        let level = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
        (level * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Blends the heat color of `weight` over `base`: `heat * opacity + base * (1 - opacity)`.
pub fn blend(base: Rgb<u8>, weight: Luma<f32>, opacity: f32) -> Rgb<u8> {
    let heat = jet(weight[0]);
    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let mixed = f32::from(heat[c]) * opacity + f32::from(base[c]) * (1.0 - opacity);
        *slot = mixed.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), Rgb([0, 0, 128]));
        assert_eq!(jet(0.5), Rgb([128, 255, 128]));
        assert_eq!(jet(1.0), Rgb([128, 0, 0]));
    }

    #[test]
    fn test_jet_clamps() {
        assert_eq!(jet(-3.0), jet(0.0));
        assert_eq!(jet(7.0), jet(1.0));
        assert_eq!(jet(f32::NAN), jet(0.0));
    }

    #[test]
    fn test_blend_opacity() {
        let base = Rgb([100, 100, 100]);
        assert_eq!(blend(base, Luma([1.0]), 0.0), base);
        assert_eq!(blend(base, Luma([1.0]), 1.0), jet(1.0));
        // (128 + 100) / 2, (0 + 100) / 2
        assert_eq!(blend(base, Luma([1.0]), 0.5), Rgb([114, 50, 50]));
    }
}
