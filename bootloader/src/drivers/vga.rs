//! Simple VGA Text Output for Bootloader
//!
//! Writes into the colour text buffer at segment 0xB800 (linear 0xB8000),
//! scrolling once the last row fills up.

use crate::drivers::logger::TextSink;

/// Linear address of the colour text buffer
pub const VGA_BUFFER: usize = 0xB8000;
pub const COLUMNS: usize = 80;
pub const ROWS: usize = 25;

/// VGA color palette (16 colors)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    LightMagenta = 13,
    Yellow = 14,
    White = 15,
}

/// VGA text mode writer
pub struct VgaText<'b> {
    cells: &'b mut [u16],
    columns: usize,
    rows: usize,
    col: usize,
    row: usize,
    attribute: u8,
}

impl<'b> VgaText<'b> {
    /// Writer over `cells`, a `columns` x `rows` character grid
    pub fn new(cells: &'b mut [u16], columns: usize, rows: usize) -> Self {
        let rows = rows.min(cells.len() / columns.max(1));
        Self {
            cells,
            columns,
            rows,
            col: 0,
            row: 0,
            attribute: Self::attribute_of(Color::LightGray, Color::Black),
        }
    }

    /// The real text buffer
    ///
    /// # Safety
    /// 0xB8000 must be mapped and no other writer may exist.
    pub unsafe fn hardware() -> VgaText<'static> {
        let cells = unsafe { core::slice::from_raw_parts_mut(VGA_BUFFER as *mut u16, COLUMNS * ROWS) };
        VgaText::new(cells, COLUMNS, ROWS)
    }

    const fn attribute_of(fg: Color, bg: Color) -> u8 {
        (bg as u8) << 4 | fg as u8
    }

    pub fn set_colors(&mut self, fg: Color, bg: Color) {
        self.attribute = Self::attribute_of(fg, bg);
    }

    fn blank(&self) -> u16 {
        (self.attribute as u16) << 8 | b' ' as u16
    }

    fn put(&mut self, index: usize, cell: u16) {
        // SAFETY: `index` is in bounds of the slice
        unsafe { core::ptr::write_volatile(&mut self.cells[index], cell) }
    }

    /// Clear the screen
    pub fn clear(&mut self) {
        let blank = self.blank();
        for index in 0..self.columns * self.rows {
            self.put(index, blank);
        }
        self.col = 0;
        self.row = 0;
    }

    fn clear_row(&mut self, row: usize) {
        let blank = self.blank();
        for index in row * self.columns..(row + 1) * self.columns {
            self.put(index, blank);
        }
    }

    fn scroll_up(&mut self) {
        let columns = self.columns;
        self.cells.copy_within(columns..columns * self.rows, 0);
    }

    fn new_line(&mut self) {
        self.col = 0;
        if self.row + 1 < self.rows {
            self.row += 1;
        } else {
            self.scroll_up();
        }
        self.clear_row(self.row);
    }

    /// Write a single character
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            b'\r' => self.col = 0,
            _ => {
                if self.col >= self.columns {
                    self.new_line();
                }
                let cell = (self.attribute as u16) << 8 | byte as u16;
                self.put(self.row * self.columns + self.col, cell);
                self.col += 1;
            }
        }
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.col, self.row)
    }
}

impl TextSink for VgaText<'static> {
    fn write_str(&mut self, text: &str) {
        for byte in text.bytes() {
            self.write_byte(byte);
        }
    }
}
