//! End-to-end package tests: write → read round-trips, tamper detection,
//! state machine misuse, UM1 envelopes and keyring screening.

use std::io::Cursor;

use obscur_core::envelope::EnvelopeConfig;
use obscur_core::scratch::FileScratch;
use obscur_core::{
    PackageError, PackageReader, PackageWriter, PayloadItem, PayloadLayout, ReaderState,
};
use obscur_crypto::agreement::Um1PrivateKey;
use obscur_crypto::kdf::KeyStrength;
use obscur_crypto::PreKey;

/// Envelope with the cheap KDF profile so tests avoid the full
/// passphrase-grade scrypt cost.
fn cheap_envelope() -> EnvelopeConfig {
    let mut envelope = EnvelopeConfig::default_passphrase().unwrap();
    envelope.strength = KeyStrength::HighEntropy;
    envelope
}

fn writer_for(passphrase: &str) -> PackageWriter {
    PackageWriter::with_pre_key(PreKey::from_passphrase(passphrase), cheap_envelope()).unwrap()
}

fn repeating_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[test]
fn passphrase_roundtrip_with_frameshift() {
    let passphrase = "correct horse battery staple";
    let content = repeating_bytes(1024);

    let mut writer = writer_for(passphrase);
    writer.set_layout(PayloadLayout::frameshift_fixed(64)).unwrap();
    writer.add_item(PayloadItem::binary("item.bin", content.clone()).unwrap());

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest(PreKey::from_passphrase(passphrase))
        .unwrap();
    let items = reader.unpack().unwrap();
    assert_eq!(reader.state(), ReaderState::Verified);

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].descriptor.path, "item.bin");
    assert_eq!(items[0].descriptor.external_length, 1024);
    assert_eq!(items[0].data, content);
}

#[test]
fn payload_bit_flip_fails_authentication() {
    let passphrase = "correct horse battery staple";

    let mut writer = writer_for(passphrase);
    writer.set_layout(PayloadLayout::frameshift_fixed(64)).unwrap();
    writer.add_item(PayloadItem::binary("item.bin", repeating_bytes(1024)).unwrap());

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    // Payload = 1024 item bytes + one fixed 64-byte trailing pad, followed
    // by the 4-byte trailer magic. Offset 500 past header+envelope lands
    // inside the item's ciphertext.
    let payload_len = 1024 + 64;
    let flip_at = package.len() - 4 - payload_len + 500;
    package[flip_at] ^= 0x01;

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest(PreKey::from_passphrase(passphrase))
        .unwrap();
    let err = reader.unpack().unwrap_err();
    assert!(matches!(err, PackageError::AuthenticationFailed));
    assert_eq!(reader.state(), ReaderState::Failed);
}

#[test]
fn manifest_bit_flip_fails_authentication() {
    let mut writer = writer_for("manifest tamper");
    writer.set_layout(PayloadLayout::frameshift_fixed(64)).unwrap();
    writer.add_item(PayloadItem::binary("item.bin", repeating_bytes(1024)).unwrap());

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    // The manifest body ends exactly where the payload begins; ten bytes
    // before that boundary is inside the envelope ciphertext.
    let payload_len = 1024 + 64;
    let flip_at = package.len() - 4 - payload_len - 10;
    package[flip_at] ^= 0x40;

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    let err = reader
        .decrypt_manifest(PreKey::from_passphrase("manifest tamper"))
        .unwrap_err();
    assert!(matches!(
        err,
        PackageError::AuthenticationFailed | PackageError::FormatMalformed(_)
    ));
    assert_eq!(reader.state(), ReaderState::Failed);
}

#[test]
fn empty_manifest_rejected() {
    let mut writer = writer_for("no items");
    let mut out = Vec::new();
    match writer.write(&mut out) {
        Err(PackageError::ConfigurationInvalid(msg)) => {
            assert!(msg.contains("no payload items"));
        }
        other => panic!("expected ConfigurationInvalid, got {other:?}"),
    }
    assert!(out.is_empty());
}

#[test]
fn double_write_rejected() {
    let mut writer = writer_for("double write");
    writer.add_item(PayloadItem::binary("a", vec![1, 2, 3]).unwrap());

    let mut out1 = Vec::new();
    writer.write(&mut out1).unwrap();

    let mut out2 = Vec::new();
    assert!(matches!(
        writer.write(&mut out2),
        Err(PackageError::AlreadyWritten)
    ));
    assert!(out2.is_empty());
}

#[test]
fn fabric_interleaving_roundtrip() {
    let contents = [
        repeating_bytes(1000),
        vec![0xA5u8; 2000],
        repeating_bytes(500),
    ];

    let mut writer = writer_for("fabric");
    writer
        .set_layout(PayloadLayout::Fabric {
            stripe_min: 64,
            stripe_max: 256,
        })
        .unwrap();
    for (i, content) in contents.iter().enumerate() {
        writer.add_item(PayloadItem::binary(format!("item-{i}"), content.clone()).unwrap());
    }

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest(PreKey::from_passphrase("fabric"))
        .unwrap();
    let items = reader.unpack().unwrap();

    assert_eq!(items.len(), 3);
    for (item, content) in items.iter().zip(&contents) {
        assert_eq!(&item.data, content);
    }
}

#[test]
fn fabric_packages_are_deterministic_given_written_bytes() {
    // Two reads of the same package must demultiplex identically; the
    // decision sequence is a pure function of the package contents.
    let mut writer = writer_for("fabric determinism");
    writer
        .set_layout(PayloadLayout::Fabric {
            stripe_min: 64,
            stripe_max: 256,
        })
        .unwrap();
    writer.add_item(PayloadItem::binary("a", repeating_bytes(1000)).unwrap());
    writer.add_item(PayloadItem::binary("b", repeating_bytes(2000)).unwrap());
    writer.add_item(PayloadItem::binary("c", repeating_bytes(500)).unwrap());

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    for _ in 0..2 {
        let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
        reader
            .decrypt_manifest(PreKey::from_passphrase("fabric determinism"))
            .unwrap();
        let items = reader.unpack().unwrap();
        assert_eq!(items[0].data, repeating_bytes(1000));
        assert_eq!(items[1].data, repeating_bytes(2000));
        assert_eq!(items[2].data, repeating_bytes(500));
    }
}

#[test]
fn frameshift_zero_pad_adds_no_payload_bytes() {
    // Identical packages except for the fixed pad width: every other
    // section has a randomness-independent length, so the size delta is
    // exactly the padding. Zero-pad Frameshift therefore lays payload out
    // byte-for-byte like Simple.
    let content = repeating_bytes(777);

    let mut zero_pad = Vec::new();
    let mut writer = writer_for("layout parity");
    writer.set_layout(PayloadLayout::frameshift_fixed(0)).unwrap();
    writer.add_item(PayloadItem::binary("x", content.clone()).unwrap());
    writer.write(&mut zero_pad).unwrap();

    let mut fixed_pad = Vec::new();
    let mut writer = writer_for("layout parity");
    writer.set_layout(PayloadLayout::frameshift_fixed(64)).unwrap();
    writer.add_item(PayloadItem::binary("x", content).unwrap());
    writer.write(&mut fixed_pad).unwrap();

    assert_eq!(zero_pad.len() + 64, fixed_pad.len());
}

#[test]
fn um1_envelope_roundtrip_and_exclusion() {
    let sender = Um1PrivateKey::from_bytes([0x11u8; 32]);
    let receiver = Um1PrivateKey::from_bytes([0x22u8; 32]);

    let secret_report = b"for the receiver's eyes only".to_vec();
    let mut writer = PackageWriter::with_um1(&receiver.public_key(), &sender).unwrap();
    writer.add_item(PayloadItem::binary("report", secret_report.clone()).unwrap());

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    // The receiver opens the package.
    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest_um1(&sender.public_key(), &receiver)
        .unwrap();
    let items = reader.unpack().unwrap();
    assert_eq!(items[0].data, secret_report);

    // A third party holding only public keys cannot. The wrong shared
    // secret yields wrong working keys, so the failure shows up as a
    // garbage length field, a short read, or a tag mismatch; never as
    // plaintext.
    let outsider = Um1PrivateKey::from_bytes([0x33u8; 32]);
    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    let err = reader
        .decrypt_manifest_um1(&sender.public_key(), &outsider)
        .unwrap_err();
    assert!(matches!(
        err,
        PackageError::AuthenticationFailed
            | PackageError::FormatMalformed(_)
            | PackageError::Io(_)
    ));
    assert_eq!(reader.state(), ReaderState::Failed);
}

#[test]
fn keyring_screening_identifies_the_key_before_derivation() {
    let mut writer = writer_for("the second key");
    writer.add_item(PayloadItem::utf8("note", "screened".into()).unwrap());

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    let keyring = [
        PreKey::from_passphrase("the first key"),
        PreKey::from_passphrase("the second key"),
        PreKey::from_passphrase("the third key"),
    ];

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    let confirmed = reader.screen_keyring(&keyring).unwrap();
    assert_eq!(confirmed, 1);

    reader
        .decrypt_manifest(PreKey::from_passphrase("the second key"))
        .unwrap();
    let items = reader.unpack().unwrap();
    assert_eq!(items[0].as_text().unwrap(), "screened");
}

#[test]
fn wrong_passphrase_fails_confirmation() {
    let mut writer = writer_for("right");
    writer.add_item(PayloadItem::binary("a", vec![1]).unwrap());
    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    assert!(matches!(
        reader.decrypt_manifest(PreKey::from_passphrase("wrong")),
        Err(PackageError::KeyConfirmationFailed)
    ));
    assert_eq!(reader.state(), ReaderState::Failed);
}

#[test]
fn derived_item_keys_roundtrip() {
    let mut writer = writer_for("derive items");
    let mut item = PayloadItem::binary("derived.bin", repeating_bytes(600)).unwrap();
    item.derive_keys_from_pre_key(KeyStrength::HighEntropy).unwrap();
    writer.add_item(item);

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest(PreKey::from_passphrase("derive items"))
        .unwrap();
    let items = reader.unpack().unwrap();
    assert_eq!(items[0].data, repeating_bytes(600));
    assert!(items[0].descriptor.cipher_key.is_none());
    assert!(items[0].descriptor.key_derivation.is_some());
}

#[test]
fn multiple_mixed_items_roundtrip() {
    let mut writer = writer_for("mixed");
    writer
        .set_layout(PayloadLayout::Frameshift {
            pad_min: 16,
            pad_max: 128,
        })
        .unwrap();
    writer.add_item(PayloadItem::utf8("readme.txt", "hello package".into()).unwrap());
    writer.add_item(PayloadItem::binary("blob", repeating_bytes(4096)).unwrap());
    writer.add_item(PayloadItem::key_action("rotate", vec![9u8; 48]).unwrap());

    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest(PreKey::from_passphrase("mixed"))
        .unwrap();
    let items = reader.unpack().unwrap();

    assert_eq!(items[0].as_text().unwrap(), "hello package");
    assert_eq!(items[1].data, repeating_bytes(4096));
    assert_eq!(items[2].data, vec![9u8; 48]);
}

#[test]
fn file_scratch_produces_identical_structure() {
    let content = repeating_bytes(8192);

    let mut writer = writer_for("scratch");
    writer.add_item(PayloadItem::binary("big", content.clone()).unwrap());
    let mut package = Vec::new();
    let mut scratch = FileScratch::new(tempfile::tempfile().unwrap());
    writer.write_with_scratch(&mut package, &mut scratch).unwrap();

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest(PreKey::from_passphrase("scratch"))
        .unwrap();
    assert_eq!(reader.unpack().unwrap()[0].data, content);
}

#[test]
fn truncated_payload_reports_truncation() {
    let mut writer = writer_for("truncate");
    writer.add_item(PayloadItem::binary("t", repeating_bytes(2048)).unwrap());
    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    // Chop the trailer and the last quarter of the payload.
    let cut = package.len() - 4 - 512;
    package.truncate(cut);

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest(PreKey::from_passphrase("truncate"))
        .unwrap();
    assert!(matches!(
        reader.unpack().unwrap_err(),
        PackageError::PayloadTruncated { .. }
    ));
}

#[test]
fn bad_magic_rejected() {
    let mut writer = writer_for("magic");
    writer.add_item(PayloadItem::binary("m", vec![1]).unwrap());
    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    package[0] = b'X';
    assert!(matches!(
        PackageReader::new(Cursor::new(&package)),
        Err(PackageError::FormatMalformed(_))
    ));
}

#[test]
fn trailer_magic_verified() {
    let mut writer = writer_for("trailer");
    writer.add_item(PayloadItem::binary("m", vec![1, 2, 3, 4]).unwrap());
    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    let last = package.len() - 1;
    package[last] = b'X';

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    reader
        .decrypt_manifest(PreKey::from_passphrase("trailer"))
        .unwrap();
    assert!(matches!(
        reader.unpack().unwrap_err(),
        PackageError::FormatMalformed(_)
    ));
}

#[test]
fn unpack_before_manifest_rejected() {
    let mut writer = writer_for("order");
    writer.add_item(PayloadItem::binary("m", vec![1]).unwrap());
    let mut package = Vec::new();
    writer.write(&mut package).unwrap();

    let mut reader = PackageReader::new(Cursor::new(&package)).unwrap();
    assert!(matches!(
        reader.unpack(),
        Err(PackageError::InvalidState(_))
    ));
}
