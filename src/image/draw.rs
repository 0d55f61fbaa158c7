//! Drawing primitives for visualizing poses.
//!
//! Every function returns a guard that performs the drawing when dropped, so options can be
//! chained onto the call:
//!
//! ```no_run
//! # use formcheck::image::{draw, Color, Image};
//! # let mut image = Image::new(64, 64);
//! draw::line(&mut image, 0, 0, 63, 63).color(Color::GREEN).stroke_width(2);
//! ```

use std::convert::Infallible;

use embedded_graphics::{
    draw_target::DrawTarget,
    mono_font::{ascii, MonoFont, MonoTextStyle},
    prelude::*,
    primitives::{self, Line, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};

use crate::image::{Color, Image};

/// Font sizes available to [`text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSize {
    /// 6x10 pixel glyphs.
    Small,
    /// 10x20 pixel glyphs, roughly an 18px proportional font.
    Large,
}

impl FontSize {
    fn font(self) -> &'static MonoFont<'static> {
        match self {
            FontSize::Small => &ascii::FONT_6X10,
            FontSize::Large => &ascii::FONT_10X20,
        }
    }
}

/// Guard returned by [`line`][line()]; draws the line when dropped and allows customization.
pub struct DrawLine<'a> {
    image: &'a mut Image,
    start: Point,
    end: Point,
    color: Color,
    stroke_width: u32,
}

impl<'a> DrawLine<'a> {
    /// Sets the line's color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the line's stroke width.
    ///
    /// By default, a stroke width of 1 is used.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }
}

impl<'a> Drop for DrawLine<'a> {
    fn drop(&mut self) {
        match Line::new(self.start, self.end)
            .into_styled(PrimitiveStyle::with_stroke(self.color, self.stroke_width))
            .draw(&mut Target(&mut *self.image))
        {
            Ok(_) => {}
            Err(infallible) => match infallible {},
        }
    }
}

/// Guard returned by [`circle`]; draws the circle when dropped and allows customization.
pub struct DrawCircle<'a> {
    image: &'a mut Image,
    center: Point,
    diameter: u32,
    color: Color,
    filled: bool,
}

impl<'a> DrawCircle<'a> {
    /// Sets the circle's color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    /// Fills the circle instead of only drawing its outline.
    pub fn filled(&mut self) -> &mut Self {
        self.filled = true;
        self
    }
}

impl<'a> Drop for DrawCircle<'a> {
    fn drop(&mut self) {
        let style = if self.filled {
            PrimitiveStyle::with_fill(self.color)
        } else {
            PrimitiveStyle::with_stroke(self.color, 1)
        };
        match primitives::Circle::with_center(self.center, self.diameter)
            .into_styled(style)
            .draw(&mut Target(&mut *self.image))
        {
            Ok(_) => {}
            Err(infallible) => match infallible {},
        }
    }
}

/// Guard returned by [`text`]; draws the text when dropped and allows customization.
pub struct DrawText<'a> {
    image: &'a mut Image,
    position: Point,
    text: &'a str,
    color: Color,
    font: FontSize,
}

impl<'a> DrawText<'a> {
    /// Sets the text color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    /// Selects the font size.
    pub fn font(&mut self, font: FontSize) -> &mut Self {
        self.font = font;
        self
    }
}

impl<'a> Drop for DrawText<'a> {
    fn drop(&mut self) {
        let character_style = MonoTextStyle::new(self.font.font(), self.color);
        let text_style = TextStyleBuilder::new()
            .alignment(Alignment::Left)
            .baseline(Baseline::Alphabetic)
            .build();
        match Text::with_text_style(self.text, self.position, character_style, text_style)
            .draw(&mut Target(&mut *self.image))
        {
            Ok(_) => {}
            Err(infallible) => match infallible {},
        }
    }
}

/// Draws a line onto an image.
pub fn line(image: &mut Image, start_x: i32, start_y: i32, end_x: i32, end_y: i32) -> DrawLine<'_> {
    DrawLine {
        image,
        start: Point::new(start_x, start_y),
        end: Point::new(end_x, end_y),
        color: Color::BLUE,
        stroke_width: 1,
    }
}

/// Draws a circle outline centered at `(x, y)` onto an image.
pub fn circle(image: &mut Image, x: i32, y: i32, radius: u32) -> DrawCircle<'_> {
    DrawCircle {
        image,
        center: Point::new(x, y),
        diameter: radius * 2 + 1,
        color: Color::GREEN,
        filled: false,
    }
}

/// Draws a text string onto an image.
///
/// By default, the text starts at `x` and sits on a baseline at `y`, like text drawn onto an
/// HTML canvas.
pub fn text<'a>(image: &'a mut Image, x: i32, y: i32, text: &'a str) -> DrawText<'a> {
    DrawText {
        image,
        position: Point::new(x, y),
        text,
        color: Color::WHITE,
        font: FontSize::Small,
    }
}

struct Target<'a>(&'a mut Image);

impl Dimensions for Target<'_> {
    fn bounding_box(&self) -> Rectangle {
        Rectangle {
            top_left: Point { x: 0, y: 0 },
            size: Size {
                width: self.0.width(),
                height: self.0.height(),
            },
        }
    }
}

impl DrawTarget for Target<'_> {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = embedded_graphics::Pixel<Self::Color>>,
    {
        let res = self.0.resolution();
        for Pixel(point, color) in pixels {
            if res.contains(point.x, point.y) {
                self.0.set(point.x as u32, point.y as u32, color);
            }
        }

        Ok(())
    }
}
