//! Decoded screen contents and the cursor overlay.
//!
//! Pixels are stored as `0x00RRGGBB` words in row-major order.  Cursor
//! shapes carry an alpha channel (`0xAARRGGBB`) and are blended over a copy
//! of the frame when a composited image is requested, so the framebuffer
//! itself never contains cursor pixels.

/// Packs 8-bit channels into a `0x00RRGGBB` pixel.
pub const fn rgb(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Packs 8-bit channels into a `0xAARRGGBB` pixel.
pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    ((a as u32) << 24) | rgb(r, g, b)
}

/// A 2-D grid of 24-bit RGB pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    pixels: Vec<u32>,
}

impl Framebuffer {
    /// Allocates a black frame of the given size.
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Row-major `0x00RRGGBB` pixels.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Returns the pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u16, y: u16) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Reallocates to a new size and clears to black, discarding the old
    /// contents.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width as usize * height as usize];
    }

    /// Copies a `w × h` block of pixels into the frame at `(x, y)`.
    ///
    /// The parts of the block that fall outside the frame are dropped.
    /// `src` must hold at least `w * h` pixels; missing pixels are ignored.
    pub fn blit(&mut self, x: u16, y: u16, w: u16, h: u16, src: &[u32]) {
        let (fw, fh) = (self.width as usize, self.height as usize);
        let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
        if x >= fw || y >= fh || w == 0 {
            return;
        }
        let visible_w = w.min(fw - x);
        for (row, line) in src.chunks(w).take(h).enumerate() {
            let dy = y + row;
            if dy >= fh {
                break;
            }
            let n = visible_w.min(line.len());
            let start = dy * fw + x;
            self.pixels[start..start + n].copy_from_slice(&line[..n]);
        }
    }

    /// Copies the `w × h` block at `(src_x, src_y)` to `(x, y)` within the
    /// frame.  Overlapping regions are handled correctly.
    pub fn copy_rect(&mut self, src_x: u16, src_y: u16, x: u16, y: u16, w: u16, h: u16) {
        let (fw, fh) = (self.width as usize, self.height as usize);
        let (sx, sy, dx, dy) = (src_x as usize, src_y as usize, x as usize, y as usize);
        if sx >= fw || sy >= fh || dx >= fw || dy >= fh {
            return;
        }
        let w = (w as usize).min(fw - sx).min(fw - dx);
        let h = (h as usize).min(fh - sy).min(fh - dy);

        // Walk rows away from the destination so overlapping copies read
        // source rows before they are overwritten.
        let rows: Box<dyn Iterator<Item = usize>> = if dy > sy {
            Box::new((0..h).rev())
        } else {
            Box::new(0..h)
        };
        for row in rows {
            let src = (sy + row) * fw + sx;
            let dst = (dy + row) * fw + dx;
            self.pixels.copy_within(src..src + w, dst);
        }
    }

    /// Returns a copy of the frame with `cursor` drawn at the pointer
    /// position minus the cursor hotspot.
    ///
    /// The overlay origin is clamped into the frame so the cursor never
    /// disappears entirely at the edges.  Cursor pixels are blended
    /// source-over using their alpha channel.
    pub fn composite(&self, cursor: &CursorShape, pointer_x: u16, pointer_y: u16) -> Framebuffer {
        let mut out = self.clone();
        if self.width == 0 || self.height == 0 || cursor.width == 0 || cursor.height == 0 {
            return out;
        }

        let max_x = self.width as i32 - 1;
        let max_y = self.height as i32 - 1;
        let origin_x = (pointer_x as i32 - cursor.hotspot_x as i32).clamp(0, max_x);
        let origin_y = (pointer_y as i32 - cursor.hotspot_y as i32).clamp(0, max_y);

        let fw = self.width as usize;
        for cy in 0..cursor.height as i32 {
            let ty = origin_y + cy;
            if ty > max_y {
                break;
            }
            for cx in 0..cursor.width as i32 {
                let tx = origin_x + cx;
                if tx > max_x {
                    break;
                }
                let src = cursor.pixels[(cy * cursor.width as i32 + cx) as usize];
                let idx = ty as usize * fw + tx as usize;
                out.pixels[idx] = blend_over(src, out.pixels[idx]);
            }
        }
        out
    }
}

/// Source-over blend of an ARGB pixel onto an opaque RGB pixel.
fn blend_over(src: u32, dst: u32) -> u32 {
    let alpha = src >> 24;
    match alpha {
        0 => dst,
        255 => src & 0x00FF_FFFF,
        a => {
            let channel = |shift: u32| {
                let s = (src >> shift) & 0xFF;
                let d = (dst >> shift) & 0xFF;
                ((s * a + d * (255 - a) + 127) / 255) << shift
            };
            channel(16) | channel(8) | channel(0)
        }
    }
}

/// A small cursor image with its hotspot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorShape {
    pub width: u16,
    pub height: u16,
    pub hotspot_x: u16,
    pub hotspot_y: u16,
    /// Row-major `0xAARRGGBB` pixels.
    pub pixels: Vec<u32>,
}

/// Rows of the built-in arrow: `X` outline, `.` fill, space transparent.
const ARROW_ROWS: [&str; 17] = [
    "X           ",
    "XX          ",
    "X.X         ",
    "X..X        ",
    "X...X       ",
    "X....X      ",
    "X.....X     ",
    "X......X    ",
    "X.......X   ",
    "X........X  ",
    "X.........X ",
    "X......XXXXX",
    "X...X..X    ",
    "X..XX..X    ",
    "X.X  X..X   ",
    "XX   X..X   ",
    "      XX    ",
];

impl CursorShape {
    /// Whether the shape has no pixels at all.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The arrow drawn until the server supplies its own cursor.
    pub fn default_arrow() -> Self {
        let width = ARROW_ROWS[0].len();
        let mut pixels = Vec::with_capacity(width * ARROW_ROWS.len());
        for row in ARROW_ROWS {
            pixels.extend(row.bytes().map(|b| match b {
                b'X' => argb(0xFF, 0, 0, 0),
                b'.' => argb(0xFF, 0xFF, 0xFF, 0xFF),
                _ => 0,
            }));
        }
        Self {
            width: width as u16,
            height: ARROW_ROWS.len() as u16,
            hotspot_x: 0,
            hotspot_y: 0,
            pixels,
        }
    }
}
