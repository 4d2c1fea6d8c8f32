pub const ICON_WIDTH: usize = 256;
pub const ICON_HEIGHT: usize = 256;

/// An image in the StatusNotifierItem [icon format]: ARGB32, row-major, in network byte order.
///
/// [icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

impl Pixmap {
    /// The pixel at (`column`, `row`) as `[a, r, g, b]`.
    pub fn pixel(&self, column: usize, row: usize) -> Option<[u8; 4]> {
        let start = (row * self.width as usize + column) * 4;
        let bytes = self.data.get(start..start + 4)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// The tuple this pixmap is sent as, `(iiay)`.
    pub fn into_wire(self) -> (i32, i32, Vec<u8>) {
        (self.width, self.height, self.data)
    }
}

/// Render the gradient icon: opaque, green follows the row and blue follows the column, both shifted by
/// the given offsets and wrapping every 256 pixels.
pub fn generate(x_offset: i32, y_offset: i32) -> Pixmap {
    let mut data = Vec::with_capacity(ICON_WIDTH * ICON_HEIGHT * 4);
    for row in 0..ICON_HEIGHT {
        let green = (row as i32).wrapping_add(y_offset) as u8;
        for column in 0..ICON_WIDTH {
            let blue = (column as i32).wrapping_add(x_offset) as u8;
            data.extend_from_slice(&[0xff, 0x00, green, blue]);
        }
    }
    Pixmap { width: ICON_WIDTH as i32, height: ICON_HEIGHT as i32, data }
}

/// The offsets the next icon is rendered with. Every rendered icon moves the gradient along.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PixmapOffsets {
    pub x: i32,
    pub y: i32,
}

impl PixmapOffsets {
    pub fn next_pixmap(&mut self) -> Pixmap {
        let pixmap = generate(self.x, self.y);
        self.x = self.x.wrapping_add(1);
        self.y = self.y.wrapping_add(2);
        pixmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dimensions() {
        let pixmap = generate(0, 0);
        assert_eq!((pixmap.width, pixmap.height), (256, 256));
        assert_eq!(pixmap.data.len(), 256 * 256 * 4);
    }

    #[test]
    fn test_pixel_values() {
        let pixmap = generate(3, 5);
        assert_eq!(pixmap.pixel(0, 0), Some([0xff, 0, 5, 3]));
        assert_eq!(pixmap.pixel(10, 20), Some([0xff, 0, 25, 13]));
        // both channels wrap around
        assert_eq!(pixmap.pixel(255, 255), Some([0xff, 0, 4, 2]));
        assert_eq!(pixmap.pixel(256, 0), Some([0xff, 0, 6, 3]));
        assert_eq!(pixmap.pixel(0, 256), None);
    }

    #[test]
    fn test_consecutive_reads_advance_offsets() {
        let mut offsets = PixmapOffsets::default();
        let first = offsets.next_pixmap();
        assert_eq!(offsets, PixmapOffsets { x: 1, y: 2 });
        let second = offsets.next_pixmap();
        assert_eq!(offsets, PixmapOffsets { x: 2, y: 4 });

        assert_eq!(first.pixel(0, 0), Some([0xff, 0, 0, 0]));
        assert_eq!(second.pixel(0, 0), Some([0xff, 0, 2, 1]));
        assert_ne!(first, second);
    }

    #[test]
    fn test_offsets_wrap() {
        let mut offsets = PixmapOffsets { x: i32::MAX, y: i32::MAX - 1 };
        let pixmap = offsets.next_pixmap();
        assert_eq!(pixmap.pixel(0, 0), Some([0xff, 0, 0xfe, 0xff]));
        assert_eq!(offsets, PixmapOffsets { x: i32::MIN, y: i32::MIN });
    }
}
