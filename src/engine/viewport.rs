/// スクロールウィンドウの状態
///
/// ウィンドウ先頭は行番号と行頭からのずれで持つ。ずれは任意の
/// オフセットから始まるウィンドウを行単位スクロールと両立させる
/// ためのもので、行単位スクロールのたびに 0 へ戻る。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    bytes_per_line: u32,
    lines_per_page: u32,
    start_line: u64,
    start_delta: u32,
}

impl Viewport {
    pub fn new(bytes_per_line: u32) -> Self {
        Self {
            bytes_per_line: bytes_per_line.max(1),
            lines_per_page: 1,
            start_line: 0,
            start_delta: 0,
        }
    }

    /// 1行あたりのバイト数
    pub fn bytes_per_line(&self) -> u32 {
        self.bytes_per_line
    }

    /// 1ページの行数
    pub fn lines_per_page(&self) -> u32 {
        self.lines_per_page
    }

    pub fn set_bytes_per_line(&mut self, bytes_per_line: u32) {
        self.bytes_per_line = bytes_per_line.max(1);
    }

    pub fn set_lines_per_page(&mut self, lines_per_page: u32) {
        self.lines_per_page = lines_per_page.max(1);
    }

    /// ウィンドウ先頭のオフセット
    pub fn start_offset(&self) -> u64 {
        self.start_line * self.bytes_per_line as u64 + self.start_delta as u64
    }

    /// 1ページのバイト数
    pub fn page_bytes(&self) -> u64 {
        self.bytes_per_line as u64 * self.lines_per_page as u64
    }

    /// スクロール可能な最終行
    pub fn max_start_line(&self, total_size: u64) -> u64 {
        let total_lines = total_size / self.bytes_per_line as u64 + 1;
        total_lines.saturating_sub(self.lines_per_page as u64)
    }

    /// 行境界に揃えてスクロール
    pub fn scroll_to_line(&mut self, line: u64) {
        self.start_line = line;
        self.start_delta = 0;
    }

    /// 行単位の相対スクロール
    pub fn scroll_lines(&mut self, delta: i64, total_size: u64) {
        let max = self.max_start_line(total_size);
        self.start_line = if delta < 0 {
            self.start_line.saturating_sub(delta.unsigned_abs())
        } else {
            self.start_line.saturating_add(delta as u64).min(max)
        };
        self.start_delta = 0;
    }

    /// 任意のオフセットへウィンドウ先頭を移動（行の途中も可）
    pub fn set_start(&mut self, offset: u64, total_size: u64) {
        if total_size == 0 {
            self.start_line = 0;
            self.start_delta = 0;
            return;
        }
        let offset = offset.min(total_size - 1);
        let bytes_per_line = self.bytes_per_line as u64;
        self.start_line = offset / bytes_per_line;
        self.start_delta = (offset % bytes_per_line) as u32;
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_offset_math() {
        let mut viewport = Viewport::new(16);
        viewport.set_lines_per_page(4);
        assert_eq!(viewport.start_offset(), 0);
        assert_eq!(viewport.page_bytes(), 64);

        viewport.scroll_to_line(3);
        assert_eq!(viewport.start_offset(), 48);

        viewport.set_start(50, 1024);
        assert_eq!(viewport.start_offset(), 50);
    }

    #[test]
    fn scroll_clamps() {
        let mut viewport = Viewport::new(16);
        viewport.set_lines_per_page(4);

        viewport.scroll_lines(-1, 1024);
        assert_eq!(viewport.start_offset(), 0);

        // 1024バイト: 65行、最終開始行は 61
        viewport.scroll_lines(1000, 1024);
        assert_eq!(viewport.start_offset(), 61 * 16);
    }

    #[test]
    fn scroll_resets_delta() {
        let mut viewport = Viewport::new(16);
        viewport.set_lines_per_page(4);
        viewport.set_start(50, 1024);
        assert_eq!(viewport.start_offset(), 50);

        viewport.scroll_lines(1, 1024);
        assert_eq!(viewport.start_offset(), 4 * 16);
    }

    #[test]
    fn set_start_clamps_to_data() {
        let mut viewport = Viewport::new(16);
        viewport.set_lines_per_page(4);
        viewport.set_start(5000, 1024);
        assert_eq!(viewport.start_offset(), 1023);

        viewport.set_start(0, 0);
        assert_eq!(viewport.start_offset(), 0);
    }
}
