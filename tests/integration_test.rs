use strongbox::file_manager::{self, ModeOption, OpenOptions};
use strongbox::{data_codec, schema, Container};
use tempfile::NamedTempFile;

#[test]
fn test_pack_and_list() {
    let temp_file = NamedTempFile::new().unwrap();
    let archive_path = temp_file.path().to_path_buf();

    let test_data = b"Hello, strongbox format!";
    let entry_name = "test.txt".to_string();

    {
        let handle = file_manager::open(&archive_path, OpenOptions { mode: ModeOption::Write, passphrase: None }).unwrap();
        handle.write(&entry_name, test_data, false).unwrap();
        file_manager::close(handle).unwrap();
    }

    {
        let bytes = std::fs::read(&archive_path).unwrap();
        let container = Container::open_owned(bytes).unwrap();
        assert_eq!(container.num_entries(), 1);
        let entry = container.entry(&entry_name).unwrap();
        assert_eq!(container.payload(entry), test_data);
        assert_eq!(entry.decompressed_size as usize, test_data.len());
    }
}

#[test]
fn test_pack_compressed_and_encrypted_roundtrip() {
    let temp_file = NamedTempFile::new().unwrap();
    let archive_path = temp_file.path().to_path_buf();
    let payload = b"repeated repeated repeated repeated data".repeat(20);

    let handle = file_manager::open(&archive_path, OpenOptions { mode: ModeOption::Write, passphrase: None }).unwrap();
    handle.write_encrypted("secret.bin", &payload, true, "hunter2").unwrap();
    file_manager::close(handle).unwrap();

    let handle = file_manager::open(&archive_path, OpenOptions { mode: ModeOption::Read, passphrase: None }).unwrap();
    let recovered = handle.read_encrypted("secret.bin", "hunter2").unwrap();
    assert_eq!(recovered, payload);
    assert!(handle.read_encrypted("secret.bin", "wrong").is_err());
}

#[test]
fn test_alias_entries_share_storage() {
    let temp_file = NamedTempFile::new().unwrap();
    let archive_path = temp_file.path().to_path_buf();

    let handle = file_manager::open(&archive_path, OpenOptions { mode: ModeOption::Write, passphrase: None }).unwrap();
    handle.write("original", b"shared payload", false).unwrap();
    handle.alias("copy", "original").unwrap();
    file_manager::close(handle).unwrap();

    let bytes = std::fs::read(&archive_path).unwrap();
    let container = Container::open_owned(bytes).unwrap();
    let original = container.entry("original").unwrap();
    let copy = container.entry("copy").unwrap();
    assert_eq!(original.offset, copy.offset);
    assert!(copy.is_alias());
}

#[test]
fn test_data_codec_entry_roundtrip_through_container() {
    let descriptor = schema::Descriptor::new("point")
        .add_field(schema::FieldDescriptor {
            name: "x".into(),
            kind: schema::FieldKind::Primitive(schema::PrimitiveTag::Int),
            count: None,
        })
        .add_field(schema::FieldDescriptor {
            name: "y".into(),
            kind: schema::FieldKind::Primitive(schema::PrimitiveTag::Int),
            count: None,
        });

    let value = data_codec::Value::Record(vec![
        ("x".into(), data_codec::Value::Int(3)),
        ("y".into(), data_codec::Value::Int(-7)),
    ]);

    let temp_file = NamedTempFile::new().unwrap();
    let archive_path = temp_file.path().to_path_buf();
    let dict = strongbox::Dictionary::new();
    let encoded = data_codec::encode(&descriptor, &value, &dict).unwrap();

    let handle = file_manager::open(&archive_path, OpenOptions { mode: ModeOption::Write, passphrase: None }).unwrap();
    handle.write("point.record", &encoded, false).unwrap();
    file_manager::close(handle).unwrap();

    let bytes = std::fs::read(&archive_path).unwrap();
    let container = Container::open_owned(bytes).unwrap();
    let entry = container.entry("point.record").unwrap();
    let decoded = data_codec::decode(&descriptor, container.payload(entry), container.dictionary()).unwrap();
    assert_eq!(decoded, value);
}
