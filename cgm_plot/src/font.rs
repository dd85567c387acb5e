//! Drawing backend wrapper that survives missing font support.
//!
//! plotters is built without a TrueType rasterizer, so its text path panics.
//! [`FontSafeBackend`] catches that and stamps text with a small built-in
//! bitmap font instead. Rotated text (the vertical axis label) is supported.

use std::cell::Cell;
use std::panic;
use std::sync::Once;

use plotters_backend::{
    text_anchor, BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend,
    DrawingErrorKind, FontTransform,
};

pub(crate) const GLYPH_HEIGHT: usize = 7;
const SPACE_WIDTH: i32 = 3;

type GlyphRows = [&'static str; GLYPH_HEIGHT];

#[rustfmt::skip]
const GLYPHS: &[(char, GlyphRows)] = &[
    ('A', [".###.", "#...#", "#...#", "#####", "#...#", "#...#", "#...#"]),
    ('B', ["####.", "#...#", "#...#", "####.", "#...#", "#...#", "####."]),
    ('C', [".###.", "#...#", "#....", "#....", "#....", "#...#", ".###."]),
    ('D', ["###..", "#..#.", "#...#", "#...#", "#...#", "#..#.", "###.."]),
    ('E', ["#####", "#....", "#....", "####.", "#....", "#....", "#####"]),
    ('F', ["#####", "#....", "#....", "####.", "#....", "#....", "#...."]),
    ('G', [".###.", "#...#", "#....", "#.###", "#...#", "#...#", ".####"]),
    ('H', ["#...#", "#...#", "#...#", "#####", "#...#", "#...#", "#...#"]),
    ('I', ["###", ".#.", ".#.", ".#.", ".#.", ".#.", "###"]),
    ('J', ["..###", "...#.", "...#.", "...#.", "...#.", "#..#.", ".##.."]),
    ('K', ["#...#", "#..#.", "#.#..", "##...", "#.#..", "#..#.", "#...#"]),
    ('L', ["#....", "#....", "#....", "#....", "#....", "#....", "#####"]),
    ('M', ["#...#", "##.##", "#.#.#", "#.#.#", "#...#", "#...#", "#...#"]),
    ('N', ["#...#", "##..#", "#.#.#", "#..##", "#...#", "#...#", "#...#"]),
    ('O', [".###.", "#...#", "#...#", "#...#", "#...#", "#...#", ".###."]),
    ('P', ["####.", "#...#", "#...#", "####.", "#....", "#....", "#...."]),
    ('Q', [".###.", "#...#", "#...#", "#...#", "#.#.#", "#..#.", ".##.#"]),
    ('R', ["####.", "#...#", "#...#", "####.", "#.#..", "#..#.", "#...#"]),
    ('S', [".####", "#....", "#....", ".###.", "....#", "....#", "####."]),
    ('T', ["#####", "..#..", "..#..", "..#..", "..#..", "..#..", "..#.."]),
    ('U', ["#...#", "#...#", "#...#", "#...#", "#...#", "#...#", ".###."]),
    ('V', ["#...#", "#...#", "#...#", "#...#", "#...#", ".#.#.", "..#.."]),
    ('W', ["#...#", "#...#", "#...#", "#.#.#", "#.#.#", "#.#.#", ".#.#."]),
    ('X', ["#...#", "#...#", ".#.#.", "..#..", ".#.#.", "#...#", "#...#"]),
    ('Y', ["#...#", "#...#", ".#.#.", "..#..", "..#..", "..#..", "..#.."]),
    ('Z', ["#####", "....#", "...#.", "..#..", ".#...", "#....", "#####"]),
    ('a', [".....", ".....", ".###.", "....#", ".####", "#...#", ".####"]),
    ('b', ["#....", "#....", "#.##.", "##..#", "#...#", "#...#", "####."]),
    ('c', [".....", ".....", ".###.", "#....", "#....", "#...#", ".###."]),
    ('d', ["....#", "....#", ".##.#", "#..##", "#...#", "#...#", ".####"]),
    ('e', [".....", ".....", ".###.", "#...#", "#####", "#....", ".###."]),
    ('f', ["..##", ".#..", ".#..", "###.", ".#..", ".#..", ".#.."]),
    ('g', [".....", ".####", "#...#", "#...#", ".####", "....#", ".###."]),
    ('h', ["#....", "#....", "#.##.", "##..#", "#...#", "#...#", "#...#"]),
    ('i', [".#.", "...", "##.", ".#.", ".#.", ".#.", "###"]),
    ('j', ["...#", "....", "..##", "...#", "...#", "#..#", ".##."]),
    ('k', ["#...", "#...", "#..#", "#.#.", "##..", "#.#.", "#..#"]),
    ('l', ["##.", ".#.", ".#.", ".#.", ".#.", ".#.", "###"]),
    ('m', [".....", ".....", "##.#.", "#.#.#", "#.#.#", "#...#", "#...#"]),
    ('n', [".....", ".....", "#.##.", "##..#", "#...#", "#...#", "#...#"]),
    ('o', [".....", ".....", ".###.", "#...#", "#...#", "#...#", ".###."]),
    ('p', [".....", "####.", "#...#", "#...#", "####.", "#....", "#...."]),
    ('q', [".....", ".####", "#...#", "#...#", ".####", "....#", "....#"]),
    ('r', [".....", ".....", "#.##.", "##..#", "#....", "#....", "#...."]),
    ('s', [".....", ".....", ".####", "#....", ".###.", "....#", "####."]),
    ('t', [".#...", ".#...", "###..", ".#...", ".#...", ".#..#", "..##."]),
    ('u', [".....", ".....", "#...#", "#...#", "#...#", "#..##", ".##.#"]),
    ('v', [".....", ".....", "#...#", "#...#", "#...#", ".#.#.", "..#.."]),
    ('w', [".....", ".....", "#...#", "#...#", "#.#.#", "#.#.#", ".#.#."]),
    ('x', [".....", ".....", "#...#", ".#.#.", "..#..", ".#.#.", "#...#"]),
    ('y', [".....", "#...#", "#...#", "#...#", ".####", "....#", ".###."]),
    ('z', [".....", ".....", "#####", "...#.", "..#..", ".#...", "#####"]),
    ('0', [".###.", "#...#", "#..##", "#.#.#", "##..#", "#...#", ".###."]),
    ('1', [".#.", "##.", ".#.", ".#.", ".#.", ".#.", "###"]),
    ('2', [".###.", "#...#", "....#", "...#.", "..#..", ".#...", "#####"]),
    ('3', ["####.", "....#", "....#", ".###.", "....#", "....#", "####."]),
    ('4', ["...#.", "..##.", ".#.#.", "#..#.", "#####", "...#.", "...#."]),
    ('5', ["#####", "#....", "####.", "....#", "....#", "#...#", ".###."]),
    ('6', [".###.", "#....", "#....", "####.", "#...#", "#...#", ".###."]),
    ('7', ["#####", "....#", "...#.", "..#..", ".#...", ".#...", ".#..."]),
    ('8', [".###.", "#...#", "#...#", ".###.", "#...#", "#...#", ".###."]),
    ('9', [".###.", "#...#", "#...#", ".####", "....#", "....#", ".###."]),
    ('-', ["...", "...", "...", "###", "...", "...", "..."]),
    ('+', ["...", "...", ".#.", "###", ".#.", "...", "..."]),
    ('_', [".....", ".....", ".....", ".....", ".....", ".....", "#####"]),
    ('/', ["..#", "..#", ".#.", ".#.", ".#.", "#..", "#.."]),
    ('(', ["..#", ".#.", "#..", "#..", "#..", ".#.", "..#"]),
    (')', ["#..", ".#.", "..#", "..#", "..#", ".#.", "#.."]),
    ('%', ["##..#", "##.#.", "...#.", "..#..", ".#...", ".#.##", "#..##"]),
    (':', [".", "#", ".", ".", ".", "#", "."]),
    ('.', [".", ".", ".", ".", ".", ".", "#"]),
    (',', ["..", "..", "..", "..", "..", ".#", "#."]),
    ('\'', ["#", "#", ".", ".", ".", ".", "."]),
    ('|', ["#", "#", "#", "#", "#", "#", "#"]),
];

fn glyph(ch: char) -> Option<&'static GlyphRows> {
    GLYPHS
        .iter()
        .find(|(c, _)| *c == ch)
        .map(|(_, rows)| rows)
}

fn advance(ch: char) -> i32 {
    match glyph(ch) {
        Some(rows) => rows[0].len() as i32 + 1,
        None => SPACE_WIDTH,
    }
}

/// Pixel scale for a requested font size.
pub(crate) fn fallback_scale(size: f64) -> i32 {
    (size / GLYPH_HEIGHT as f64).max(1.0).round() as i32
}

/// Unrotated width and height of `text` in the fallback font.
pub(crate) fn fallback_extent(text: &str, size: f64) -> (u32, u32) {
    let scale = fallback_scale(size);
    let units: i32 = text.chars().map(advance).sum();
    let width = (units - 1).max(0) * scale;
    (width as u32, (GLYPH_HEIGHT as i32 * scale) as u32)
}

thread_local! {
    static QUIET_PANICS: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Run `f` with panic messages from this thread suppressed.
///
/// Every text draw on a font-less backend panics before falling back, which
/// would otherwise print a message per tick label.
pub(crate) fn quietly<T>(f: impl FnOnce() -> T) -> T {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !QUIET_PANICS.with(Cell::get) {
                previous(info);
            }
        }));
    });
    let was_quiet = QUIET_PANICS.with(|q| q.replace(true));
    let out = f();
    QUIET_PANICS.with(|q| q.set(was_quiet));
    out
}

pub(crate) struct FontSafeBackend<DB> {
    inner: DB,
}

impl<DB> FontSafeBackend<DB> {
    pub(crate) fn new(inner: DB) -> Self {
        Self { inner }
    }
}

impl<DB: DrawingBackend> DrawingBackend for FontSafeBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_path(path, style)
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_circle(center, radius, style, fill)
    }

    fn blit_bitmap(
        &mut self,
        pos: BackendCoord,
        (iw, ih): (u32, u32),
        src: &[u8],
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.blit_bitmap(pos, (iw, ih), src)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.draw_text(text, style, pos)
        })) {
            Ok(result) => result,
            Err(_) => self.draw_text_fallback(text, style, pos),
        }
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.estimate_text_size(text, style)
        })) {
            Ok(result) => result,
            Err(_) => Ok(fallback_extent(text, style.size())),
        }
    }
}

impl<DB: DrawingBackend> FontSafeBackend<DB> {
    fn draw_text_fallback<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        let color = style.color();
        if color.alpha == 0.0 || text.trim().is_empty() {
            return Ok(());
        }

        let scale = fallback_scale(style.size());
        let (width, height) = fallback_extent(text, style.size());
        let (width, height) = (width as i32, height as i32);
        let origin_x = match style.anchor().h_pos {
            text_anchor::HPos::Left => 0,
            text_anchor::HPos::Right => -width,
            text_anchor::HPos::Center => -width / 2,
        };
        let origin_y = match style.anchor().v_pos {
            text_anchor::VPos::Top => 0,
            text_anchor::VPos::Center => -height / 2,
            text_anchor::VPos::Bottom => -height,
        };
        let transform = style.transform();

        let mut cursor = origin_x;
        for ch in text.chars() {
            if let Some(rows) = glyph(ch) {
                for (row, pattern) in rows.iter().enumerate() {
                    for (col, cell) in pattern.bytes().enumerate() {
                        if cell != b'#' {
                            continue;
                        }
                        let x = cursor + col as i32 * scale;
                        let y = origin_y + row as i32 * scale;
                        self.fill_cell(pos, &transform, (x, y), scale, color)?;
                    }
                }
            }
            cursor += advance(ch) * scale;
        }
        Ok(())
    }

    /// Fill one `scale`-sized glyph cell at an unrotated offset from `pos`.
    ///
    /// Filled rects exclude their bottom-right corner on the bitmap and SVG
    /// backends, so the far corner sits one cell past the origin.
    fn fill_cell(
        &mut self,
        pos: BackendCoord,
        transform: &FontTransform,
        (x, y): (i32, i32),
        scale: i32,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        let (ax, ay) = transform.transform(x, y);
        let (bx, by) = transform.transform(x + scale, y + scale);
        let upper_left = (pos.0 + ax.min(bx), pos.1 + ay.min(by));
        let bottom_right = (pos.0 + ax.max(bx), pos.1 + ay.max(by));
        self.inner.draw_rect(upper_left, bottom_right, &color, true)
    }
}
