//! File-backed byte source tests.

use crate::common::test_utils::{create_temp_file, open_mapped, open_mapped_with_budget};
use binmeta::error::ErrorKind;
use binmeta::io::error::IoError;
use binmeta::io::{ByteSource, FileSource, IOLimits, MappedFile, SourceReader};
use std::io::Read;

#[test]
fn test_file_source_positional_reads() {
    let temp = create_temp_file(b"0123456789");
    let source = FileSource::open(temp.path()).unwrap();

    assert_eq!(source.size(), 10);
    assert_eq!(source.read_vec_at(3, 4).unwrap(), b"3456");
    assert_eq!(source.read_vec_at(0, 10).unwrap(), b"0123456789");

    let err = source.read_vec_at(8, 4).unwrap_err();
    assert!(matches!(err, IoError::UnexpectedEof { offset: 8, wanted: 4, .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_mapped_file_matches_contents() {
    let content: Vec<u8> = (0..=255).collect();
    let temp = create_temp_file(&content);
    let mapped = open_mapped(temp.path());

    assert_eq!(mapped.size(), 256);
    assert_eq!(mapped.as_slice(), content.as_slice());
    assert_eq!(mapped.read_vec_at(250, 6).unwrap(), &content[250..]);
    assert_eq!(mapped.bytes_read(), 6);
}

#[test]
fn test_empty_mapped_file() {
    let temp = create_temp_file(b"");
    let mapped = open_mapped(temp.path());
    assert_eq!(mapped.size(), 0);
    assert!(mapped.read_vec_at(0, 1).is_err());
}

#[test]
fn test_mapped_file_size_cap() {
    let temp = create_temp_file(&[0u8; 128]);
    let limits = IOLimits {
        max_file_size: 64,
        ..IOLimits::default()
    };
    match MappedFile::open(temp.path(), limits) {
        Err(err @ IoError::FileTooLarge { limit: 64, found: 128 }) => {
            assert_eq!(err.kind(), ErrorKind::LimitExceeded);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("oversized file was mapped"),
    }
}

#[test]
fn test_mapped_file_read_budget() {
    let temp = create_temp_file(&[1u8; 64]);
    let mapped = open_mapped_with_budget(temp.path(), 10);

    assert!(mapped.read_vec_at(0, 8).is_ok());
    let err = mapped.read_vec_at(8, 8).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
}

#[test]
fn test_source_reader_over_file() {
    let temp = create_temp_file(b"header|payload|trailer");
    let source = FileSource::open(temp.path()).unwrap();

    let mut reader = SourceReader::with_len(&source, 7, 7);
    let mut out = String::new();
    reader.read_to_string(&mut out).unwrap();
    assert_eq!(out, "payload");
    assert_eq!(reader.position(), 14);
}
