mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use camino::Utf8PathBuf;

use common::{descriptor, temp_dir};
use kira_pdc_downloader::domain::DownloadRecord;
use kira_pdc_downloader::recorder::{self, CATALOG_HEADER, DOWNLOAD_LOG_HEADER, DownloadLog};

#[test]
fn catalog_csv_has_flat_signed_url_column() {
    let (_temp, dir) = temp_dir();
    let path = dir.join("nested").join("all_files_sorted.csv");
    let files = vec![
        descriptor("PDC01", "f1", "a, \"quoted\".txt", b"abc", "https://x/a?sig=1&b=2".to_string()),
        descriptor("PDC01", "f2", "b.txt", b"abcdef", "https://x/b".to_string()),
    ];

    recorder::write_catalog(&path, &files).unwrap();

    let content = fs::read_to_string(path.as_std_path()).unwrap();
    assert_eq!(content.lines().next(), Some(CATALOG_HEADER.join(",").as_str()));
    assert_eq!(recorder::read_catalog(&path).unwrap(), files);
}

#[test]
fn empty_catalog_still_has_a_header() {
    let (_temp, dir) = temp_dir();
    let path = dir.join("catalog.csv");

    recorder::write_catalog(&path, &[]).unwrap();

    let content = fs::read_to_string(path.as_std_path()).unwrap();
    assert_eq!(content.trim_end(), CATALOG_HEADER.join(","));
    assert!(recorder::read_catalog(&path).unwrap().is_empty());
}

#[test]
fn catalog_rewrite_replaces_previous_content() {
    let (_temp, dir) = temp_dir();
    let path = dir.join("catalog.csv");
    let first = vec![descriptor("PDC01", "old", "old.txt", b"x", "u".to_string())];
    let second = vec![descriptor("PDC02", "new", "new.txt", b"y", "v".to_string())];

    recorder::write_catalog(&path, &first).unwrap();
    recorder::write_catalog(&path, &second).unwrap();

    assert_eq!(recorder::read_catalog(&path).unwrap(), second);
}

#[test]
fn concurrent_appends_produce_whole_rows() {
    let (_temp, dir) = temp_dir();
    let log = Arc::new(DownloadLog::create(&dir.join("log.csv")).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for index in 0..25 {
                    let file_id = format!("w{worker}-{index}");
                    let file = descriptor("PDC01", &file_id, "same,name.txt", b"z", file_id.clone());
                    let record = DownloadRecord::new(&file, file.md5sum.clone(), Utf8PathBuf::new());
                    log.append(&record).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(log.rows_written(), 200);
    let rows = recorder::read_download_log(log.path()).unwrap();
    assert_eq!(rows.len(), 200);
    assert!(rows.iter().all(|row| row.file_name == "same,name.txt"));
    assert!(rows.iter().all(|row| row.download_url == row.file_id));

    let content = fs::read_to_string(log.path().as_std_path()).unwrap();
    assert_eq!(content.lines().next(), Some(DOWNLOAD_LOG_HEADER.join(",").as_str()));
}

#[test]
fn create_truncates_an_existing_log() {
    let (_temp, dir) = temp_dir();
    let path = dir.join("log.csv");
    fs::write(path.as_std_path(), "stale,content\n").unwrap();

    let log = DownloadLog::create(&path).unwrap();

    assert_eq!(log.rows_written(), 0);
    assert!(recorder::read_download_log(&path).unwrap().is_empty());
}
