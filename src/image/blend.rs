use super::{Color, Image};

/// An alpha blending operation that makes one image appear in front of another of equal size.
///
/// Returned by [`Image::blend_from`]. The blend happens when this guard is dropped.
pub struct Blend<'a> {
    dest: &'a mut Image,
    src: &'a Image,
}

impl<'a> Blend<'a> {
    pub(super) fn new(dest: &'a mut Image, src: &'a Image) -> Self {
        assert_eq!(
            dest.resolution(),
            src.resolution(),
            "cannot blend images of different size",
        );
        Self { dest, src }
    }
}

impl Drop for Blend<'_> {
    fn drop(&mut self) {
        for (dest, src) in self.dest.buf.pixels_mut().zip(self.src.buf.pixels()) {
            dest.0 = blend_alpha(Color(dest.0), Color(src.0)).0;
        }
    }
}

fn blend_alpha(dest: Color, src: Color) -> Color {
    // The overlay is mostly fully transparent or fully opaque.
    match src.a() {
        0 => return dest,
        255 => return src,
        _ => {}
    }

    let src_a = f32::from(src.a()) / 255.0;
    let dest_a = f32::from(dest.a()) / 255.0;
    let out_a = src_a + dest_a * (1.0 - src_a);

    let channel = |d: u8, s: u8| -> u8 {
        let (d, s) = (f32::from(d), f32::from(s));
        ((s * src_a + d * dest_a * (1.0 - src_a)) / out_a).round() as u8
    };

    Color([
        channel(dest.r(), src.r()),
        channel(dest.g(), src.g()),
        channel(dest.b(), src.b()),
        (out_a * 255.0).round() as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_source_keeps_destination() {
        assert_eq!(blend_alpha(Color::BLUE, Color::NULL), Color::BLUE);
    }

    #[test]
    fn opaque_source_replaces_destination() {
        assert_eq!(blend_alpha(Color::BLUE, Color::RED), Color::RED);
    }

    #[test]
    fn half_transparent_mixes() {
        let mixed = blend_alpha(Color::BLACK, Color::WHITE.with_alpha(128));
        assert_eq!(mixed.a(), 255);
        assert!((127..=129).contains(&mixed.r()), "{mixed:?}");
    }
}
