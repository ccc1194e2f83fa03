use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use log::{debug, warn};

use crate::encoding::{self, CharEncoding};
use crate::map::AddressMap;
use crate::store::BackingStore;

use super::geometry::{Layout, Metrics, Point, Rect};
use super::viewport::Viewport;
use super::{Cursor, EngineError, Event, NavIntent, Nibble, Options, SelectKind, Selection, State};

/// バックアップコピーのチャンクサイズ
const BACKUP_CHUNK: usize = 64 * 1024;

/// HEXグリッドエンジン
///
/// アドレスマップとスクロールウィンドウを持ち、UI層から渡される
/// ナビゲーション意図・ポインタ位置・入力文字に反応して状態を
/// 更新する。描画・キー解釈・ダイアログはすべて外側の仕事。
pub struct Engine {
    /// バッキングストア
    store: Option<Box<dyn BackingStore>>,
    /// アドレスマップ
    map: AddressMap,
    /// データ全長
    total_size: u64,
    /// スクロールウィンドウ
    viewport: Viewport,
    /// フォントメトリクス（外部から供給）
    metrics: Metrics,
    /// ビューポートの高さ（ピクセル）
    view_height: u32,
    /// 導出済みレイアウト
    layout: Layout,
    /// 表示中のバイトキャッシュ
    window: Vec<u8>,
    /// カーソル位置
    cursor: Option<Cursor>,
    /// 選択状態
    selection: Selection,
    /// マウス選択モード中か
    mouse_selection: bool,
    /// 読み取り専用フラグ
    readonly: bool,
    /// 編集済みフラグ
    edited: bool,
    /// 初回編集時のバックアップ先
    backup_path: Option<PathBuf>,
    /// 文字ペインのエンコーディング
    encoding: CharEncoding,
    /// カーソル点滅フラグ
    blink: bool,
    /// UI層へ通知するイベントキュー
    events: VecDeque<Event>,
}

impl Engine {
    pub fn new() -> Self {
        let mut engine = Self {
            store: None,
            map: AddressMap::default(),
            total_size: 0,
            viewport: Viewport::default(),
            metrics: Metrics::default(),
            view_height: 0,
            layout: Layout::default(),
            window: Vec::new(),
            cursor: None,
            selection: Selection::default(),
            mouse_selection: false,
            readonly: true,
            edited: false,
            backup_path: None,
            encoding: CharEncoding::default(),
            blink: false,
            events: VecDeque::new(),
        };
        engine.adjust();
        engine
    }

    /// ストアを接続し、マップ・編集状態・カーソルを作り直す
    pub fn set_data(&mut self, store: Box<dyn BackingStore>, options: Options) {
        self.total_size = store.size();
        self.store = Some(store);
        self.map = options.map.unwrap_or_else(|| {
            AddressMap::flat(self.total_size, options.base_address.unwrap_or(0))
        });
        self.backup_path = options.backup_path;
        self.edited = false;
        self.readonly = true;
        self.mouse_selection = false;
        self.viewport.scroll_to_line(0);
        self.cursor = (self.total_size > 0).then_some(Cursor {
            offset: 0,
            nibble: Nibble::High,
        });
        self.selection = Selection::default();
        self.adjust();

        if let Some(address) = options.start_address {
            self.goto_address(address);
        }
        if options.selection_size > 0 {
            if let Some(address) = options.start_selection_address {
                self.set_selection(address, options.selection_size);
            }
        }
        self.push_event(Event::CursorChanged);
    }

    /// レイアウトとウィンドウを再導出する
    pub fn reload(&mut self) {
        self.adjust();
    }

    // === 形状・寸法 ===

    /// 1行あたりのバイト数
    pub fn bytes_per_line(&self) -> u32 {
        self.viewport.bytes_per_line()
    }

    pub fn set_bytes_per_line(&mut self, bytes_per_line: u32) {
        if bytes_per_line == 0 {
            return;
        }
        let start = self.viewport.start_offset();
        self.viewport.set_bytes_per_line(bytes_per_line);
        self.viewport.set_start(start, self.total_size);
        self.adjust();
    }

    /// フォントメトリクスを設定（フォント変更時）
    pub fn set_metrics(&mut self, metrics: Metrics) {
        self.metrics = metrics;
        self.adjust();
    }

    /// ビューポートの高さを設定（リサイズ時）
    pub fn set_view_height(&mut self, view_height: u32) {
        self.view_height = view_height;
        self.adjust();
    }

    /// 導出済みレイアウト
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// データ全長
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 最小の仮想アドレス
    pub fn base_address(&self) -> u64 {
        self.map.base_address()
    }

    /// アドレスマップ
    pub fn map(&self) -> &AddressMap {
        &self.map
    }

    // === 妥当性判定 ===

    pub fn is_offset_valid(&self, offset: u64) -> bool {
        offset < self.total_size
    }

    pub fn is_address_valid(&self, address: u64) -> bool {
        self.map.is_address_valid(address)
    }

    pub fn is_rel_address_valid(&self, rel_address: u64) -> bool {
        self.map.is_rel_address_valid(rel_address)
    }

    // === ナビゲーション ===

    /// ナビゲーション意図を適用する
    ///
    /// extend が真なら移動前の位置をアンカーとして選択を延ばす
    /// （Shift+移動）。移動後のオフセットは常にデータ範囲へ
    /// クランプされ、ウィンドウ外に出た場合は1行（ページ移動は
    /// 1ページ）だけスクロールする。
    pub fn navigate(&mut self, intent: NavIntent, extend: bool) {
        if self.total_size == 0 {
            return;
        }
        let Some(cur) = self.cursor else { return };

        if extend && self.selection.anchor().is_none() {
            self.selection.init(Some(cur.offset));
        }

        let bytes_per_line = self.viewport.bytes_per_line() as i64;
        let page = bytes_per_line * self.layout.lines_per_page as i64;
        let size = self.total_size as i64;
        let mut offset = cur.offset as i64;
        let mut nibble = cur.nibble;

        match intent {
            NavIntent::NextChar => match nibble {
                Nibble::Ansi => offset += 1,
                Nibble::High => nibble = Nibble::Low,
                Nibble::Low => {
                    offset += 1;
                    nibble = Nibble::High;
                }
            },
            NavIntent::PrevChar => match nibble {
                Nibble::Ansi => offset -= 1,
                Nibble::High => {
                    offset -= 1;
                    nibble = Nibble::Low;
                }
                Nibble::Low => nibble = Nibble::High,
            },
            NavIntent::NextLine => offset += bytes_per_line,
            NavIntent::PrevLine => offset -= bytes_per_line,
            NavIntent::NextPage => offset += page,
            NavIntent::PrevPage => offset -= page,
            NavIntent::LineStart => {
                offset = (offset / bytes_per_line) * bytes_per_line;
                if nibble != Nibble::Ansi {
                    nibble = Nibble::High;
                }
            }
            NavIntent::LineEnd => {
                offset = (offset / bytes_per_line + 1) * bytes_per_line - 1;
                if nibble != Nibble::Ansi {
                    nibble = Nibble::High;
                }
            }
            NavIntent::DocStart => {
                offset = 0;
                if nibble != Nibble::Ansi {
                    nibble = Nibble::High;
                }
            }
            NavIntent::DocEnd => {
                offset = size - 1;
                if nibble != Nibble::Ansi {
                    nibble = Nibble::High;
                }
            }
        }

        match intent {
            NavIntent::NextChar
            | NavIntent::PrevChar
            | NavIntent::NextLine
            | NavIntent::PrevLine
            | NavIntent::LineStart
            | NavIntent::LineEnd => {
                if offset < 0 {
                    offset = 0;
                    if nibble != Nibble::Ansi {
                        nibble = Nibble::High;
                    }
                } else if offset > size - 1 {
                    offset = size - 1;
                    if nibble != Nibble::Ansi {
                        nibble = Nibble::Low;
                    }
                }

                let start = self.viewport.start_offset() as i64;
                let page_bytes = self.viewport.page_bytes() as i64;
                if offset - start >= page_bytes {
                    self.viewport.scroll_lines(1, self.total_size);
                } else if offset < start {
                    self.viewport.scroll_lines(-1, self.total_size);
                }
            }
            NavIntent::NextPage | NavIntent::PrevPage => {
                if offset < 0 {
                    offset += page;
                } else if offset > size - 1 {
                    offset -= page;
                } else {
                    let lines = self.layout.lines_per_page as i64;
                    let delta = if intent == NavIntent::NextPage { lines } else { -lines };
                    self.viewport.scroll_lines(delta, self.total_size);
                }
                offset = offset.clamp(0, size - 1);
            }
            NavIntent::DocStart => {
                self.viewport.scroll_to_line(0);
            }
            NavIntent::DocEnd => {
                let lines = self.layout.lines_per_page as i64;
                let end_page =
                    (size - size % bytes_per_line - bytes_per_line * (lines - 1)).max(0);
                if end_page < size {
                    self.viewport
                        .scroll_to_line(end_page as u64 / bytes_per_line as u64);
                }
            }
        }

        self.cursor = Some(Cursor {
            offset: offset as u64,
            nibble,
        });
        if extend {
            self.selection.extend_to(offset as u64);
        }
        self.adjust();
    }

    /// 仮想アドレスへ移動（領域外は何もしない）
    pub fn goto_address(&mut self, address: u64) {
        let Some(offset) = self.map.address_to_offset(address) else {
            return;
        };
        self.goto_offset(offset);
    }

    /// 相対アドレスへ移動（領域外は何もしない）
    pub fn goto_rel_address(&mut self, rel_address: u64) {
        let Some(offset) = self.map.rel_address_to_offset(rel_address) else {
            return;
        };
        self.goto_offset(offset);
    }

    /// オフセットへ移動（範囲外は何もしない）
    pub fn goto_offset(&mut self, offset: u64) {
        if !self.is_offset_valid(offset) {
            return;
        }
        let line = offset / self.viewport.bytes_per_line() as u64;
        self.viewport
            .scroll_to_line(line.min(self.viewport.max_start_line(self.total_size)));
        self.cursor = Some(Cursor {
            offset,
            nibble: Nibble::High,
        });
        self.adjust();
    }

    /// ウィンドウ先頭を任意のオフセットへ（行の途中からでも）
    pub fn scroll_to_offset(&mut self, offset: u64) {
        self.viewport.set_start(offset, self.total_size);
        self.adjust();
    }

    // === 選択 ===

    /// アドレス範囲を選択する（範囲が領域に収まらなければ拒否）
    pub fn set_selection(&mut self, address: u64, size: u64) {
        if size == 0 {
            return;
        }
        let Some(offset) = self.map.address_to_offset(address) else {
            return;
        };
        self.selection.init(Some(offset));
        self.select_to(offset + size - 1);
        self.push_event(Event::CursorChanged);
    }

    /// 全選択
    pub fn select_all(&mut self) {
        if self.total_size == 0 {
            return;
        }
        self.selection.init(Some(0));
        self.selection.extend_to(self.total_size - 1);
        self.push_event(Event::CursorChanged);
    }

    /// 現在の選択状態
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// 描画用の選択種別
    pub fn select_kind(&self, offset: u64) -> SelectKind {
        self.selection.kind(offset)
    }

    fn select_to(&mut self, offset: u64) {
        if self.is_offset_valid(offset) {
            self.selection.extend_to(offset);
        }
    }

    // === マウス ===

    /// マウス押下: ヒットしたセルへカーソルを移し選択を始める
    pub fn press(&mut self, point: Point) {
        self.mouse_selection = false;
        let Some(cursor) = self.cursor_at(point) else {
            return;
        };
        self.cursor = Some(cursor);
        self.selection.init(Some(cursor.offset));
        self.mouse_selection = true;
        self.blink = true;
        self.adjust();
    }

    /// マウスドラッグ: マウス選択モード中のみ選択を延ばす
    pub fn drag(&mut self, point: Point) {
        if !self.mouse_selection {
            return;
        }
        if let Some(cursor) = self.cursor_at(point) {
            self.select_to(cursor.offset);
            self.push_event(Event::CursorChanged);
        }
    }

    /// マウス解放: マウス選択モードを終える
    pub fn release(&mut self) {
        self.mouse_selection = false;
    }

    /// 画面上の点からカーソル位置を求める
    pub fn cursor_at(&self, point: Point) -> Option<Cursor> {
        let (line, column, nibble) = self.layout.hit_test(point)?;
        let offset = self.viewport.start_offset()
            + line as u64 * self.viewport.bytes_per_line() as u64
            + column as u64;
        self.is_offset_valid(offset).then_some(Cursor { offset, nibble })
    }

    // === 編集 ===

    /// キー入力による編集
    ///
    /// HEXニブル上では16進1桁、文字ペイン上ではエンコード可能な
    /// 文字だけを受け付ける。成功するとカーソルは前進ステップと
    /// 同じ規則で進む。読み取り専用・書き込み不能時は何もしない。
    pub fn type_char(&mut self, ch: char) {
        if self.readonly {
            return;
        }
        let writable = self.store.as_ref().is_some_and(|s| s.is_writable());
        if !writable {
            return;
        }
        let Some(cursor) = self.cursor else { return };

        match self.try_edit(cursor, ch) {
            Ok(true) => {
                self.edited = true;
                self.push_event(Event::EditStateChanged(true));
                self.advance_after_edit(cursor);
                self.adjust();
            }
            Ok(false) => {}
            Err(error) => {
                warn!("edit failed at {:#X}: {}", cursor.offset, error);
                self.push_event(Event::Error(error.to_string()));
            }
        }
    }

    /// 読み取り専用の切替
    ///
    /// 解除はストアが書き込み可能なときだけ通る。戻り値は切替の成否。
    pub fn set_readonly(&mut self, state: bool) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        if state || store.is_writable() {
            self.readonly = state;
            true
        } else {
            false
        }
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_edited(&self) -> bool {
        self.edited
    }

    pub fn set_edited(&mut self, state: bool) {
        self.edited = state;
    }

    fn try_edit(&mut self, cursor: Cursor, ch: char) -> Result<bool, EngineError> {
        let old = self.read_byte(cursor.offset)?;
        let new = match cursor.nibble {
            Nibble::Ansi => match encoding::encode_char(ch, self.encoding) {
                Some(byte) => byte,
                None => return Ok(false),
            },
            Nibble::High => {
                let Some(digit) = ch.to_digit(16) else {
                    return Ok(false);
                };
                (old & 0x0F) | ((digit as u8) << 4)
            }
            Nibble::Low => {
                let Some(digit) = ch.to_digit(16) else {
                    return Ok(false);
                };
                (old & 0xF0) | digit as u8
            }
        };

        if !self.edited {
            self.create_backup()?;
        }
        self.write_byte(cursor.offset, new)?;
        Ok(true)
    }

    /// 初回編集前のバックアップ作成
    ///
    /// バックアップ先が設定され、まだ存在しない場合のみストア全体を
    /// チャンク読みでコピーする。失敗したら編集ごと中止される。
    fn create_backup(&mut self) -> Result<(), EngineError> {
        let Some(path) = self.backup_path.clone() else {
            return Ok(());
        };
        if path.exists() {
            return Ok(());
        }
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };

        let copy = (|| -> io::Result<()> {
            let mut out = fs::File::create(&path)?;
            let mut buf = vec![0u8; BACKUP_CHUNK];
            let size = store.size();
            let mut offset = 0u64;
            while offset < size {
                let count = store.read_at(offset, &mut buf)?;
                if count == 0 {
                    break;
                }
                out.write_all(&buf[..count])?;
                offset += count as u64;
            }
            Ok(())
        })();

        match copy {
            Ok(()) => {
                debug!("backup created: {}", path.display());
                Ok(())
            }
            Err(source) => {
                // 部分コピーを残すと次回のバックアップが抑止される
                let _ = fs::remove_file(&path);
                Err(EngineError::Backup { path, source })
            }
        }
    }

    /// 編集成功後にカーソルを1ステップ進める
    fn advance_after_edit(&mut self, cursor: Cursor) {
        let mut next = cursor;
        match cursor.nibble {
            Nibble::Ansi => next.offset += 1,
            Nibble::High => next.nibble = Nibble::Low,
            Nibble::Low => {
                next.offset += 1;
                next.nibble = Nibble::High;
            }
        }
        if next.offset > self.total_size - 1 {
            next.offset = self.total_size - 1;
            if next.nibble != Nibble::Ansi {
                next.nibble = Nibble::Low;
            }
        }
        self.cursor = Some(next);
    }

    // === ストアアクセス ===

    /// ウィンドウを介さない1バイト読み込み
    fn read_byte(&mut self, offset: u64) -> Result<u8, EngineError> {
        let Some(store) = self.store.as_mut() else {
            return Err(no_store());
        };
        let mut buf = [0u8; 1];
        if store.read_at(offset, &mut buf)? != 1 {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short read",
            )));
        }
        Ok(buf[0])
    }

    /// ウィンドウを介さない1バイト書き込み（編集は即時反映）
    fn write_byte(&mut self, offset: u64, byte: u8) -> Result<(), EngineError> {
        let Some(store) = self.store.as_mut() else {
            return Err(no_store());
        };
        store.write_at(offset, byte)?;
        Ok(())
    }

    /// 範囲読み込み（末尾で切り詰め）
    pub fn read_array(&mut self, offset: u64, size: u64) -> Vec<u8> {
        let Some(store) = self.store.as_mut() else {
            return Vec::new();
        };
        if offset >= store.size() {
            return Vec::new();
        }
        let len = size.min(store.size() - offset) as usize;
        let mut buf = vec![0u8; len];
        match store.read_at(offset, &mut buf) {
            Ok(count) => {
                buf.truncate(count);
                buf
            }
            Err(error) => {
                warn!("read_array failed at {:#X}: {}", offset, error);
                self.push_event(Event::Error(format!(
                    "Cannot read at {offset:#X}: {error}"
                )));
                Vec::new()
            }
        }
    }

    // === 状態・ウィンドウ ===

    /// 状態スナップショットを取得
    pub fn state(&self) -> State {
        let cursor_offset = self.cursor.map(|c| c.offset);
        let cursor_address = cursor_offset.and_then(|o| self.map.offset_to_address(o));
        match self.selection.span() {
            Some((start, end)) => State {
                cursor_offset,
                cursor_address,
                selection_offset: Some(start),
                selection_address: self.map.offset_to_address(start),
                selection_size: end - start + 1,
            },
            None => State {
                cursor_offset,
                cursor_address,
                selection_offset: None,
                selection_address: None,
                selection_size: 0,
            },
        }
    }

    /// カーソル位置
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// 表示中のバイトキャッシュ
    pub fn window(&self) -> &[u8] {
        &self.window
    }

    /// ウィンドウ先頭のオフセット
    pub fn window_start(&self) -> u64 {
        self.viewport.start_offset()
    }

    /// 文字ペインのエンコーディング
    pub fn encoding(&self) -> CharEncoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: CharEncoding) {
        self.encoding = encoding;
    }

    /// バイトを文字ペイン用の文字に変換
    pub fn glyph(&self, byte: u8) -> char {
        encoding::glyph(byte, self.encoding)
    }

    /// カーソル矩形（ウィンドウ外なら None）
    pub fn cursor_rect(&self) -> Option<Rect> {
        let cursor = self.cursor?;
        let start = self.viewport.start_offset();
        if cursor.offset < start {
            return None;
        }
        let rel = cursor.offset - start;
        let bytes_per_line = self.viewport.bytes_per_line() as u64;
        let line = rel / bytes_per_line;
        if line >= self.layout.lines_per_page as u64 {
            return None;
        }
        let origin = self
            .layout
            .cell_origin(line as u32, (rel % bytes_per_line) as u32, cursor.nibble);
        Some(Rect {
            x: origin.x,
            y: origin.y,
            w: self.metrics.char_width,
            h: self.layout.line_height,
        })
    }

    /// カーソル点滅の切替（表示フラグのみ、状態には触れない）
    pub fn tick_blink(&mut self) -> Option<Rect> {
        self.blink = !self.blink;
        self.cursor_rect()
    }

    /// 点滅フラグ
    pub fn blink(&self) -> bool {
        self.blink
    }

    /// コンテキストメニュー表示を要求
    pub fn request_context_menu(&mut self, point: Point) {
        self.push_event(Event::ContextMenu(point));
    }

    /// 次の通知を取り出す
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn push_event(&mut self, event: Event) {
        // 連続する CursorChanged はまとめる
        if event == Event::CursorChanged && self.events.back() == Some(&Event::CursorChanged) {
            return;
        }
        self.events.push_back(event);
    }

    // === 再導出 ===

    /// レイアウト・ウィンドウ・カーソルを再導出する
    fn adjust(&mut self) {
        self.layout = Layout::compute(
            self.viewport.bytes_per_line(),
            self.view_height,
            self.metrics,
            self.total_size,
            self.map.base_address(),
        );
        self.viewport.set_lines_per_page(self.layout.lines_per_page);
        self.refill();
        self.reconcile_cursor();
        self.push_event(Event::CursorChanged);
    }

    /// ウィンドウをストアから読み直す
    fn refill(&mut self) {
        self.window.clear();
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let len = self.viewport.page_bytes() as usize;
        let start = self.viewport.start_offset();
        self.window.resize(len, 0);
        match store.read_at(start, &mut self.window) {
            Ok(count) => {
                self.window.truncate(count);
                debug!("window refill {:#X}+{} -> {} bytes", start, len, count);
            }
            Err(error) => {
                self.window.clear();
                warn!("window refill failed at {:#X}: {}", start, error);
                self.push_event(Event::Error(format!(
                    "Cannot read at {start:#X}: {error}"
                )));
            }
        }
    }

    /// カーソルをウィンドウ内へ引き戻す（桁は保つ）
    fn reconcile_cursor(&mut self) {
        if self.total_size == 0 {
            self.cursor = None;
            return;
        }
        let Some(mut cursor) = self.cursor else { return };
        let start = self.viewport.start_offset();
        let bytes_per_line = self.viewport.bytes_per_line() as u64;
        let page_bytes = self.viewport.page_bytes();

        if cursor.offset < start {
            cursor.offset = start + cursor.offset % bytes_per_line;
        } else if cursor.offset - start >= page_bytes {
            cursor.offset = start + page_bytes - bytes_per_line + cursor.offset % bytes_per_line;
        }
        if cursor.offset > self.total_size - 1 {
            cursor.offset = self.total_size - 1;
        }
        self.cursor = Some(cursor);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn no_store() -> EngineError {
    EngineError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "no data attached",
    ))
}
