//! File-backed end-to-end tests for the hex grid engine.

use std::fs;
use std::io::Write as _;

use hxg::engine::{Engine, Event, NavIntent, Options};
use hxg::map::{AddressMap, Region, RegionKind};
use hxg::store::{FileStore, MemStore, MmapStore};

fn fixture(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

fn drain_errors(engine: &mut Engine) -> Vec<String> {
    let mut errors = Vec::new();
    while let Some(event) = engine.poll_event() {
        if let Event::Error(message) = event {
            errors.push(message);
        }
    }
    errors
}

#[test]
fn goto_then_select_all_scenario() {
    let mut engine = Engine::new();
    engine.set_view_height(8 * 21);
    engine.set_data(Box::new(MemStore::new(vec![0u8; 1024])), Options::default());

    engine.goto_offset(512);
    engine.select_all();

    let state = engine.state();
    assert_eq!(state.selection_offset, Some(0));
    assert_eq!(state.selection_size, 1024);
    assert_eq!(engine.selection().span(), Some((0, 1023)));
}

#[test]
fn backup_is_created_exactly_once() {
    let original: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    let file = fixture(&original);
    let backup_path = file.path().with_extension("bak");
    let _ = fs::remove_file(&backup_path);

    let store = FileStore::open_rw(file.path()).unwrap();
    let mut engine = Engine::new();
    engine.set_view_height(8 * 21);
    engine.set_data(
        Box::new(store),
        Options {
            backup_path: Some(backup_path.clone()),
            ..Options::default()
        },
    );
    assert!(engine.set_readonly(false));
    assert!(!backup_path.exists());

    // 最初の書き込みの直前にだけバックアップが走る
    engine.goto_offset(0);
    engine.type_char('A');
    assert!(engine.is_edited());
    assert!(backup_path.exists());
    assert_eq!(fs::read(&backup_path).unwrap(), original);

    let first_meta = fs::metadata(&backup_path).unwrap().modified().unwrap();

    for _ in 0..5 {
        engine.type_char('B');
    }
    assert_eq!(fs::read(&backup_path).unwrap(), original);
    assert_eq!(
        fs::metadata(&backup_path).unwrap().modified().unwrap(),
        first_meta
    );
    assert!(drain_errors(&mut engine).is_empty());

    fs::remove_file(&backup_path).unwrap();
}

#[test]
fn backup_failure_aborts_the_edit() {
    let original = vec![0x11u8; 64];
    let file = fixture(&original);
    // 存在しないディレクトリの下を指定してコピーを失敗させる
    let backup_dir = tempfile::tempdir().unwrap();
    let backup_path = backup_dir.path().join("missing").join("backup.bak");

    let store = FileStore::open_rw(file.path()).unwrap();
    let mut engine = Engine::new();
    engine.set_view_height(8 * 21);
    engine.set_data(
        Box::new(store),
        Options {
            backup_path: Some(backup_path),
            ..Options::default()
        },
    );
    assert!(engine.set_readonly(false));

    engine.type_char('F');
    assert!(!engine.is_edited());
    assert!(!drain_errors(&mut engine).is_empty());
    assert_eq!(fs::read(file.path()).unwrap(), original);
}

#[test]
fn file_patch_via_nibble_typing() {
    let file = fixture(&[0x00, 0x00, 0x00, 0x00]);
    let store = FileStore::open_rw(file.path()).unwrap();

    let mut engine = Engine::new();
    engine.set_view_height(8 * 21);
    engine.set_data(Box::new(store), Options::default());
    assert!(engine.set_readonly(false));

    engine.goto_offset(1);
    for digit in "DEAD".chars() {
        engine.type_char(digit);
    }

    assert!(drain_errors(&mut engine).is_empty());
    assert_eq!(fs::read(file.path()).unwrap(), vec![0x00, 0xDE, 0xAD, 0x00]);
}

#[test]
fn mmap_store_edits_hit_the_file() {
    let file = fixture(b"hello world!");
    let store = MmapStore::open_rw(file.path()).unwrap();

    let mut engine = Engine::new();
    engine.set_view_height(8 * 21);
    engine.set_data(Box::new(store), Options::default());
    assert!(engine.set_readonly(false));

    // 'h' -> 'H' (0x68 -> 0x48)
    engine.goto_offset(0);
    engine.type_char('4');
    engine.type_char('8');

    // MmapMut は drop 時にフラッシュされる
    drop(engine);
    assert_eq!(fs::read(file.path()).unwrap(), b"Hello world!");
}

#[test]
fn readonly_file_rejects_editable_toggle() {
    let file = fixture(b"locked");
    let store = FileStore::open(file.path()).unwrap();

    let mut engine = Engine::new();
    engine.set_view_height(8 * 21);
    engine.set_data(Box::new(store), Options::default());

    assert!(!engine.set_readonly(false));
    assert!(engine.is_readonly());
    engine.type_char('F');
    assert!(!engine.is_edited());
    assert_eq!(fs::read(file.path()).unwrap(), b"locked");
}

#[test]
fn mapped_navigation_against_file() {
    let data: Vec<u8> = (0..64).map(|i| i as u8).collect();
    let file = fixture(&data);
    let map = AddressMap::new(vec![
        Region {
            offset: 0,
            size: 16,
            rel_address: 0,
            address: 0x40_0000,
            kind: RegionKind::Header,
        },
        Region {
            offset: 16,
            size: 48,
            rel_address: 0x1000,
            address: 0x40_1000,
            kind: RegionKind::Section,
        },
    ])
    .unwrap();

    let mut engine = Engine::new();
    engine.set_view_height(8 * 21);
    engine.set_data(
        Box::new(FileStore::open(file.path()).unwrap()),
        Options {
            map: Some(map),
            ..Options::default()
        },
    );

    // ギャップのアドレスには移動しない
    engine.goto_address(0x40_0800);
    assert_eq!(engine.cursor().unwrap().offset, 0);

    engine.goto_address(0x40_1004);
    assert_eq!(engine.cursor().unwrap().offset, 20);
    assert_eq!(engine.state().cursor_address, Some(0x40_1004));

    engine.goto_rel_address(0x1002);
    assert_eq!(engine.cursor().unwrap().offset, 18);

    // 選択してからの読み出しが一致する
    engine.set_selection(0x40_1000, 4);
    let state = engine.state();
    assert_eq!(state.selection_offset, Some(16));
    assert_eq!(engine.read_array(16, 4), vec![16, 17, 18, 19]);
}

#[test]
fn window_follows_cursor_across_pages() {
    let data: Vec<u8> = (0..=255).collect();
    let file = fixture(&data);

    let mut engine = Engine::new();
    engine.set_view_height(4 * 21);
    engine.set_data(
        Box::new(FileStore::open(file.path()).unwrap()),
        Options::default(),
    );

    // 4行ウィンドウ (64バイト) を超えて下へ
    for _ in 0..4 {
        engine.navigate(NavIntent::NextLine, false);
    }
    assert_eq!(engine.window_start(), 16);
    assert_eq!(engine.window()[0], 16);

    engine.navigate(NavIntent::NextPage, false);
    assert_eq!(engine.window_start(), 16 + 64);
    assert_eq!(engine.cursor().unwrap().offset, 64 + 64);
}
