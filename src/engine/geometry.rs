use super::Nibble;

/// 行間の追加ピクセル
const LINE_SPACING: u32 = 5;
/// 行内の描画オフセット
const LINE_DELTA: u32 = 4;

/// 文字セルの寸法（フォントメトリクスの抽象）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    /// 1文字の幅（ピクセル）
    pub char_width: u32,
    /// 1文字の高さ（ピクセル）
    pub char_height: u32,
}

impl Default for Metrics {
    fn default() -> Self {
        // 等幅10ptフォント相当
        Self { char_width: 8, char_height: 16 }
    }
}

/// コンテンツ座標上の点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// カーソル矩形（点滅再描画用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

/// グリッドのピクセルレイアウト
///
/// アドレス列・HEX列・文字ペイン列の位置と、ページの行数を
/// ビューポートの高さとフォントメトリクスから導出する。
/// cell_origin と hit_test は、ページ内のセルに対して正確に
/// 互いの逆写像になる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// アドレス桁数（8 または 16）
    pub addr_digits: u32,
    /// アドレス列の開始X
    pub addr_pos: u32,
    /// アドレス列の幅
    pub addr_width: u32,
    /// HEX列の開始X
    pub hex_pos: u32,
    /// HEX列の幅
    pub hex_width: u32,
    /// 文字ペイン列の開始X
    pub ansi_pos: u32,
    /// 文字ペイン列の幅
    pub ansi_width: u32,
    /// コンテンツ全体の幅
    pub content_width: u32,
    /// 1行の高さ
    pub line_height: u32,
    /// 1ページの行数
    pub lines_per_page: u32,
    /// 全行数
    pub total_lines: u64,
    char_width: u32,
    bytes_per_line: u32,
}

impl Layout {
    /// レイアウトを導出する
    ///
    /// アドレス桁数はデータ末尾のアドレスが 32bit に収まらなく
    /// なった時点で 16 桁へ広がる。ストアやベースアドレスが変わる
    /// たびに呼び直すこと。
    pub fn compute(
        bytes_per_line: u32,
        view_height: u32,
        metrics: Metrics,
        total_size: u64,
        base_address: u64,
    ) -> Self {
        let char_width = metrics.char_width;
        let line_height = metrics.char_height + LINE_SPACING;
        let lines_per_page = (view_height / line_height).max(1);

        let addr_digits = if total_size.saturating_add(base_address) >= 0xFFFF_FFFF {
            16
        } else {
            8
        };

        let addr_pos = char_width;
        let addr_width = (addr_digits + 3) * char_width;
        let hex_pos = addr_pos + addr_width;
        let hex_width = (bytes_per_line + 1) * char_width * 3;
        let ansi_pos = hex_pos + hex_width;
        let ansi_width = (bytes_per_line + 1) * char_width;

        Self {
            addr_digits,
            addr_pos,
            addr_width,
            hex_pos,
            hex_width,
            ansi_pos,
            ansi_width,
            content_width: ansi_pos + ansi_width,
            line_height,
            lines_per_page,
            total_lines: total_size / bytes_per_line as u64 + 1,
            char_width,
            bytes_per_line,
        }
    }

    /// セル原点（ウィンドウ相対の行・桁から）
    pub fn cell_origin(&self, line: u32, column: u32, nibble: Nibble) -> Point {
        let char_width = self.char_width;
        let x = match nibble {
            Nibble::High => self.hex_pos + column * char_width * 3,
            Nibble::Low => self.hex_pos + column * char_width * 3 + char_width,
            Nibble::Ansi => self.ansi_pos + column * char_width,
        };
        Point {
            x: x as i32,
            y: (line * self.line_height + LINE_DELTA) as i32,
        }
    }

    /// ヒットテスト（cell_origin の逆写像）
    ///
    /// ページ外の行、実セルのない桁は None。アドレス列への
    /// ヒットはその行の先頭バイトのHEX上位として扱う。
    pub fn hit_test(&self, point: Point) -> Option<(u32, u32, Nibble)> {
        if point.x < 0 || point.y < LINE_DELTA as i32 {
            return None;
        }
        let line = (point.y as u32 - LINE_DELTA) / self.line_height;
        if line >= self.lines_per_page {
            return None;
        }

        let x = point.x as u32;
        let char_width = self.char_width;
        let hex_cells = char_width * 3 * self.bytes_per_line;
        let ansi_cells = char_width * self.bytes_per_line;

        if x >= self.addr_pos && x < self.addr_pos + self.addr_width {
            Some((line, 0, Nibble::High))
        } else if x >= self.hex_pos && x < self.hex_pos + hex_cells {
            let dx = x - self.hex_pos;
            let column = dx / (char_width * 3);
            let nibble = if dx % (char_width * 3) < char_width {
                Nibble::High
            } else {
                Nibble::Low
            };
            Some((line, column, nibble))
        } else if x >= self.ansi_pos && x < self.ansi_pos + ansi_cells {
            Some((line, (x - self.ansi_pos) / char_width, Nibble::Ansi))
        } else {
            None
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::compute(16, 0, Metrics::default(), 0, 0)
    }
}
