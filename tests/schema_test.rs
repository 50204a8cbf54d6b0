// SPDX-License-Identifier: MIT

mod common;

use common::{FormBuilder, RecordingStorage, fixture, fixture_size, init_logging, submit};
use formdrop::storage::MemoryStorage;
use formdrop::upload::FieldSpec;
use formdrop::{LimitCode, UploadHandler, UploadSchema, UploadedFiles};
use std::sync::Arc;

fn memory_handler(schema: UploadSchema) -> UploadHandler {
    UploadHandler::new(MemoryStorage::new(), schema)
}

#[test]
fn test_single_file() {
    init_logging();
    let handler = memory_handler(UploadSchema::single("small0"));
    let form = FormBuilder::new()
        .field("name", "Multer")
        .fixture("small0", "small0");
    let result = submit(&handler, form).unwrap();

    let file = result.files.single().unwrap();
    assert_eq!(file.field_name, "small0");
    assert_eq!(file.original_name, "small0.dat");
    assert_eq!(file.encoding, "7bit");
    assert_eq!(file.mime_type, "application/octet-stream");
    assert_eq!(file.size, fixture_size("small0") as u64);
    assert_eq!(file.buffer(), Some(fixture("small0").as_slice()));
    assert_eq!(
        result.fields.get("name").and_then(|v| v.as_text()),
        Some("Multer")
    );
}

#[test]
fn test_single_without_file() {
    let handler = memory_handler(UploadSchema::single("small0"));
    let result = submit(&handler, FormBuilder::new().field("name", "Multer")).unwrap();
    assert_eq!(result.files, UploadedFiles::Single(None));
}

#[test]
fn test_single_rejects_wrong_name() {
    let handler = memory_handler(UploadSchema::single("wrongname"));
    let form = FormBuilder::new().fixture("small0", "small0");
    let err = submit(&handler, form).unwrap_err();
    assert_eq!(err.code(), Some("LIMIT_UNEXPECTED_FILE"));
    assert_eq!(err.to_string(), "Unexpected field");
    assert_eq!(err.field(), Some("small0"));
}

#[test]
fn test_single_rejects_second_file() {
    let handler = memory_handler(UploadSchema::single("tiny0"));
    let form = FormBuilder::new()
        .fixture("tiny0", "tiny0")
        .fixture("tiny0", "tiny1");
    let err = submit(&handler, form).unwrap_err();
    assert_eq!(err.limit_code(), Some(LimitCode::UnexpectedFile));
    assert_eq!(err.field(), Some("tiny0"));
}

#[test]
fn test_array_of_files() {
    let handler = memory_handler(UploadSchema::array("files", Some(3)));
    let form = FormBuilder::new()
        .fixture("files", "empty")
        .fixture("files", "tiny0")
        .fixture("files", "tiny1");
    let result = submit(&handler, form).unwrap();

    let files = result.files.as_slice().unwrap();
    let names: Vec<_> = files.iter().map(|f| f.original_name.as_str()).collect();
    assert_eq!(names, vec!["empty.dat", "tiny0.dat", "tiny1.dat"]);
    assert_eq!(files[0].size, 0);
    assert_eq!(files[1].size, 122);
    assert_eq!(files[2].size, 7);
}

#[test]
fn test_array_overflow() {
    let storage = Arc::new(RecordingStorage::new());
    let handler = UploadHandler::new(storage.clone(), UploadSchema::array("butme", Some(2)));
    let form = FormBuilder::new()
        .fixture("butme", "tiny0")
        .fixture("butme", "tiny1")
        .fixture("butme", "small0");
    let err = submit(&handler, form).unwrap_err();

    assert_eq!(err.code(), Some("LIMIT_UNEXPECTED_FILE"));
    assert_eq!(err.field(), Some("butme"));
    assert_eq!(storage.removed(), vec!["butme", "butme"]);
}

#[test]
fn test_named_fields() {
    let schema = UploadSchema::fields([
        FieldSpec::new("CA$|-|", Some(1)),
        FieldSpec::new("set-1", Some(3)),
        FieldSpec::new("set-2", Some(3)),
    ]);
    let handler = memory_handler(schema);
    let form = FormBuilder::new()
        .fixture("CA$|-|", "empty")
        .fixture("set-1", "tiny0")
        .fixture("set-1", "empty")
        .fixture("set-1", "tiny1")
        .fixture("set-2", "tiny1");
    let result = submit(&handler, form).unwrap();

    let UploadedFiles::Fields(map) = &result.files else {
        panic!("expected named fields, got {:?}", result.files);
    };
    assert_eq!(map.keys().collect::<Vec<_>>(), vec!["CA$|-|", "set-1", "set-2"]);
    assert_eq!(result.files.field("CA$|-|").map(<[_]>::len), Some(1));
    assert_eq!(result.files.field("set-2").map(<[_]>::len), Some(1));

    let set1: Vec<_> = result
        .files
        .field("set-1")
        .unwrap()
        .iter()
        .map(|f| f.original_name.as_str())
        .collect();
    assert_eq!(set1, vec!["tiny0.dat", "empty.dat", "tiny1.dat"]);
}

#[test]
fn test_named_fields_reject_undeclared_and_overflow() {
    let schema = UploadSchema::fields([FieldSpec::new("cv", Some(1))]);

    let handler = memory_handler(schema.clone());
    let err = submit(&handler, FormBuilder::new().fixture("photo", "tiny0")).unwrap_err();
    assert_eq!(err.limit_code(), Some(LimitCode::UnexpectedFile));
    assert_eq!(err.field(), Some("photo"));

    let handler = memory_handler(schema);
    let form = FormBuilder::new()
        .fixture("cv", "tiny0")
        .fixture("cv", "tiny1");
    let err = submit(&handler, form).unwrap_err();
    assert_eq!(err.limit_code(), Some(LimitCode::UnexpectedFile));
    assert_eq!(err.field(), Some("cv"));
}

#[test]
fn test_any_keeps_global_order() {
    let handler = memory_handler(UploadSchema::Any);
    let form = FormBuilder::new()
        .fixture("set-1", "tiny0")
        .fixture("set-2", "tiny1")
        .fixture("set-1", "small0")
        .fixture("other", "empty");
    let result = submit(&handler, form).unwrap();

    let order: Vec<_> = result
        .files
        .as_slice()
        .unwrap()
        .iter()
        .map(|f| (f.field_name.as_str(), f.size))
        .collect();
    assert_eq!(
        order,
        vec![("set-1", 122), ("set-2", 7), ("set-1", 1778), ("other", 0)]
    );
}

#[test]
fn test_text_only_mode() {
    let handler = memory_handler(UploadSchema::None);
    let result = submit(&handler, FormBuilder::new().field("a", "b")).unwrap();
    assert_eq!(result.files, UploadedFiles::None);

    let err = submit(&handler, FormBuilder::new().fixture("upload", "tiny0")).unwrap_err();
    assert_eq!(err.limit_code(), Some(LimitCode::UnexpectedFile));
    assert_eq!(err.field(), Some("upload"));
}

#[test]
fn test_empty_filename_is_skipped() {
    let storage = Arc::new(RecordingStorage::new());
    let handler = UploadHandler::new(storage.clone(), UploadSchema::single("avatar"));
    let form = FormBuilder::new()
        .file("avatar", "", "application/octet-stream", b"")
        .field("name", "no file chosen");
    let result = submit(&handler, form).unwrap();

    assert_eq!(result.files, UploadedFiles::Single(None));
    assert!(storage.stored().is_empty());
    assert_eq!(
        result.fields.get("name").and_then(|v| v.as_text()),
        Some("no file chosen")
    );
}

#[test]
fn test_empty_filename_does_not_consume_slot() {
    let handler = memory_handler(UploadSchema::single("avatar"));
    let form = FormBuilder::new()
        .file("avatar", "", "application/octet-stream", b"")
        .fixture("avatar", "tiny1");
    let result = submit(&handler, form).unwrap();
    assert_eq!(result.files.single().map(|f| f.size), Some(7));
}
