//! Where an eye texture lands inside a swapchain image.

use crate::gpu::{Extent2D, Rect};

/// How the eye texture is sized inside the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompositeMode {
    /// Pixel-for-pixel when the source fits, scaled down only when it doesn't
    #[default]
    Native,
    /// Largest uniform scale that fits the target
    Fit,
}

/// Computes the centered destination rectangle for `source` in `target`.
///
/// The result always lies inside `target`. A source larger than the target
/// is scaled down uniformly, so offsets are never negative.
pub fn centered_placement(source: Extent2D, target: Extent2D, mode: CompositeMode) -> Rect {
    let size = match mode {
        CompositeMode::Native if source.width <= target.width && source.height <= target.height => source,
        _ => fit_within(source, target),
    };
    Rect {
        x: (target.width - size.width) / 2,
        y: (target.height - size.height) / 2,
        width: size.width,
        height: size.height,
    }
}

/// Largest extent with `source`'s aspect ratio that fits in `target`.
fn fit_within(source: Extent2D, target: Extent2D) -> Extent2D {
    if source.width == 0 || source.height == 0 {
        return Extent2D::new(0, 0);
    }
    let (sw, sh) = (source.width as u64, source.height as u64);
    let (tw, th) = (target.width as u64, target.height as u64);

    // Width-limited when the source is relatively wider than the target.
    if sw * th >= sh * tw {
        Extent2D::new(target.width, (sh * tw / sw) as u32)
    } else {
        Extent2D::new((sw * th / sh) as u32, target.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: Extent2D = Extent2D {
        width: 2468,
        height: 2740,
    };

    #[test]
    fn test_reference_offsets() {
        let rect = centered_placement(Extent2D::new(1600, 1200), TARGET, CompositeMode::Native);
        assert_eq!(
            rect,
            Rect {
                x: 434,
                y: 770,
                width: 1600,
                height: 1200
            }
        );
    }

    #[test]
    fn test_oversize_source_is_scaled_not_negative() {
        let rect = centered_placement(Extent2D::new(3000, 1200), TARGET, CompositeMode::Native);
        assert_eq!(
            rect,
            Rect {
                x: 0,
                y: 876,
                width: 2468,
                height: 987
            }
        );
        assert!(TARGET.contains(&rect));

        let tall = centered_placement(Extent2D::new(1000, 5480), TARGET, CompositeMode::Native);
        assert_eq!(tall.height, 2740);
        assert_eq!(tall.width, 500);
        assert_eq!(tall.x, 984);
    }

    #[test]
    fn test_fit_scales_up() {
        let rect = centered_placement(Extent2D::new(1600, 1200), TARGET, CompositeMode::Fit);
        assert_eq!(rect.width, 2468);
        assert_eq!(rect.height, 1851);
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 444);
    }

    #[test]
    fn test_placement_always_inside_target() {
        let sizes = [1u32, 2, 7, 640, 1600, 2468, 2740, 4000];
        for &w in &sizes {
            for &h in &sizes {
                for mode in [CompositeMode::Native, CompositeMode::Fit] {
                    let rect = centered_placement(Extent2D::new(w, h), TARGET, mode);
                    assert!(TARGET.contains(&rect), "{}x{} {:?} -> {:?}", w, h, mode, rect);
                }
            }
        }
    }

    #[test]
    fn test_empty_source() {
        let rect = centered_placement(Extent2D::new(0, 10), TARGET, CompositeMode::Native);
        assert_eq!(rect.width, 0);
        assert!(TARGET.contains(&rect));
    }
}
