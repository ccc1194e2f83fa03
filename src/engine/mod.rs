mod geometry;
mod state;
mod viewport;

pub use geometry::{Layout, Metrics, Point, Rect};
pub use state::Engine;
pub use viewport::Viewport;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::map::AddressMap;

/// エンジン内部エラー
#[derive(Debug, Error)]
pub enum EngineError {
    /// ストアI/O失敗
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// バックアップ作成失敗
    #[error("cannot create backup {}: {}", .path.display(), .source)]
    Backup { path: PathBuf, source: io::Error },
}

/// カーソルが指すニブル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Nibble {
    /// 16進の上位4bit
    #[default]
    High,
    /// 16進の下位4bit
    Low,
    /// 文字ペイン（1バイト全体）
    Ansi,
}

/// ニブル精度のカーソル位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// ストア内オフセット
    pub offset: u64,
    /// 指しているニブル
    pub nibble: Nibble,
}

/// 選択状態
///
/// anchor は選択が始まった点、span は方向に依らず正規化済みの
/// 閉区間 (start <= end)。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    anchor: Option<u64>,
    span: Option<(u64, u64)>,
}

impl Selection {
    /// 選択開始時のオフセット
    pub fn anchor(&self) -> Option<u64> {
        self.anchor
    }

    /// 正規化済み範囲
    pub fn span(&self) -> Option<(u64, u64)> {
        self.span
    }

    /// 描画用の選択種別を判定
    pub fn kind(&self, offset: u64) -> SelectKind {
        match self.span {
            Some((start, end)) if offset == start && start == end => SelectKind::OneByte,
            Some((start, _)) if offset == start => SelectKind::Begin,
            Some((_, end)) if offset == end => SelectKind::End,
            Some((start, end)) if offset > start && offset < end => SelectKind::Mid,
            _ => SelectKind::NotSelected,
        }
    }

    /// 選択を開始する（範囲は未確定に戻る）
    pub(crate) fn init(&mut self, anchor: Option<u64>) {
        self.anchor = anchor;
        self.span = None;
    }

    /// アンカーからの範囲を方向に依らず正規化して設定
    pub(crate) fn extend_to(&mut self, offset: u64) {
        if let Some(anchor) = self.anchor {
            self.span = Some(if offset > anchor {
                (anchor, offset)
            } else {
                (offset, anchor)
            });
        }
    }
}

/// 描画用の選択種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectKind {
    /// 選択範囲外
    #[default]
    NotSelected,
    /// 1バイトだけの選択
    OneByte,
    /// 範囲の先頭
    Begin,
    /// 範囲の中間
    Mid,
    /// 範囲の末尾
    End,
}

/// ナビゲーション意図
///
/// キーコードの解釈はUI層の仕事。エンジンはこの列挙だけを受け取る。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavIntent {
    NextChar,
    PrevChar,
    NextLine,
    PrevLine,
    NextPage,
    PrevPage,
    LineStart,
    LineEnd,
    DocStart,
    DocEnd,
}

/// エンジンからUI層への通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// カーソルまたは選択が変化した
    CursorChanged,
    /// 編集済みフラグが変化した
    EditStateChanged(bool),
    /// 回復可能なエラー
    Error(String),
    /// コンテキストメニュー表示の要求
    ContextMenu(Point),
}

/// set_data のオプション
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// フラットマップ合成時のベースアドレス
    pub base_address: Option<u64>,
    /// 初期表示アドレス
    pub start_address: Option<u64>,
    /// 初期選択の開始アドレス
    pub start_selection_address: Option<u64>,
    /// 初期選択のサイズ
    pub selection_size: u64,
    /// 初回編集時のバックアップ先
    pub backup_path: Option<PathBuf>,
    /// アドレスマップ（省略時はフラット）
    pub map: Option<AddressMap>,
}

/// 状態スナップショット
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct State {
    /// カーソルのオフセット
    pub cursor_offset: Option<u64>,
    /// カーソルの仮想アドレス
    pub cursor_address: Option<u64>,
    /// 選択範囲の先頭オフセット
    pub selection_offset: Option<u64>,
    /// 選択範囲の先頭アドレス
    pub selection_address: Option<u64>,
    /// 選択範囲のサイズ（選択なしは 0）
    pub selection_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_kind() {
        let mut selection = Selection::default();
        assert_eq!(selection.kind(0), SelectKind::NotSelected);

        selection.init(Some(4));
        selection.extend_to(8);
        assert_eq!(selection.kind(3), SelectKind::NotSelected);
        assert_eq!(selection.kind(4), SelectKind::Begin);
        assert_eq!(selection.kind(6), SelectKind::Mid);
        assert_eq!(selection.kind(8), SelectKind::End);
        assert_eq!(selection.kind(9), SelectKind::NotSelected);

        selection.extend_to(4);
        assert_eq!(selection.kind(4), SelectKind::OneByte);
    }

    #[test]
    fn selection_tie_break() {
        // アンカーより前後どちらへ延ばしても閉区間は正規化される
        let mut selection = Selection::default();
        selection.init(Some(5));
        selection.extend_to(2);
        assert_eq!(selection.span(), Some((2, 5)));
        selection.extend_to(9);
        assert_eq!(selection.span(), Some((5, 9)));
    }
}
