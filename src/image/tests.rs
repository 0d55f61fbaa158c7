use super::*;
use Color as C;

fn mkimage<const W: usize, const H: usize>(data: [[Color; W]; H]) -> Image {
    let data = data
        .into_iter()
        .flat_map(|row| row.into_iter())
        .flat_map(|col| col.0)
        .collect::<Vec<_>>();
    Image::from_rgba8(Resolution::new(W as u32, H as u32), &data)
}

fn count(image: &Image, color: Color) -> usize {
    let mut n = 0;
    for y in 0..image.height() {
        for x in 0..image.width() {
            if image.get(x, y) == color {
                n += 1;
            }
        }
    }
    n
}

#[test]
fn from_rgba8_layout() {
    #[rustfmt::skip]
    let image = mkimage([
        [C::YELLOW, C::WHITE],
        [C::BLUE, C::RED],
    ]);

    assert_eq!(image.resolution(), Resolution::new(2, 2));
    assert_eq!(image.get(0, 0), C::YELLOW);
    assert_eq!(image.get(1, 0), C::WHITE);
    assert_eq!(image.get(0, 1), C::BLUE);
    assert_eq!(image.get(1, 1), C::RED);
}

#[test]
fn clear() {
    let mut image = Image::filled(Resolution::new(3, 3), C::RED);
    image.clear(C::NULL);
    assert_eq!(count(&image, C::NULL), 9);
}

#[test]
fn filled_circle_is_centered() {
    let mut image = Image::new(21, 21);
    draw::circle(&mut image, 10, 10, 5).color(C::RED).filled();

    assert_eq!(image.get(10, 10), C::RED);
    assert_eq!(image.get(14, 10), C::RED);
    assert_eq!(image.get(10, 6), C::RED);
    assert_eq!(image.get(17, 10), C::NULL);
    assert_eq!(image.get(0, 0), C::NULL);
}

#[test]
fn line_clips_to_image() {
    let mut image = Image::new(8, 8);
    draw::line(&mut image, -10, 3, 20, 3).color(C::GREEN);
    assert_eq!(count(&image, C::GREEN), 8);
}

#[test]
fn text_draws_something() {
    let mut image = Image::new(100, 40);
    draw::text(&mut image, 10, 30, "Good form!").font(draw::FontSize::Large);
    assert!(count(&image, C::WHITE) > 0);
}

#[test]
fn letterbox_keeps_aspect() {
    let image = Image::filled(Resolution::new(40, 20), C::WHITE);
    let (square, scale) = image.letterbox(10);

    assert_eq!(square.resolution(), Resolution::new(10, 10));
    assert_eq!(scale, 0.25);
    assert!(square.get(5, 2).r() > 250, "{:?}", square.get(5, 2));
    assert_eq!(square.get(5, 8), C::BLACK);
}

#[test]
fn blend_overlay() {
    let mut frame = Image::filled(Resolution::new(2, 1), C::BLUE);
    let mut overlay = Image::new(2, 1);
    overlay.set(1, 0, C::RED);

    frame.blend_from(&overlay);
    assert_eq!(frame.get(0, 0), C::BLUE);
    assert_eq!(frame.get(1, 0), C::RED);
}
