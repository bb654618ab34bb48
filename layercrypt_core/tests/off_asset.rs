use std::fs;

use layercrypt_core::{
    Asset, AssetError, CipherConfig, CipherError, NdArray, OffContainer, Tier, VisualLevel,
    derive_session_rng,
};
use tempfile::tempdir;

/// A colored strip of quads, `cols` vertices wide and two rows tall.
fn strip_off(cols: usize) -> String {
    let mut text = String::from("COFF\n# generated strip\n");
    text.push_str(&format!("{} {} 0\n", cols * 2, cols - 1));
    for row in 0..2 {
        for col in 0..cols {
            let x = col as f32 * 0.25;
            let z = (col as f32 * 0.4).sin() * 0.8;
            let shade = col as f32 / cols as f32;
            text.push_str(&format!("{x} {row} {z} {shade} 0.5 {} 1\n", 1.0 - shade));
        }
    }
    for col in 0..cols - 1 {
        text.push_str(&format!("4 {} {} {} {}\n", col, col + 1, cols + col + 1, cols + col));
    }
    text
}

#[test]
fn encrypted_file_reloads_and_decrypts() {
    let dir = tempdir().unwrap();
    let plain_path = dir.path().join("strip.off");
    let cipher_path = dir.path().join("strip.enc.off");
    fs::write(&plain_path, strip_off(40)).unwrap();

    let config = CipherConfig::default();
    let original = OffContainer::load(&plain_path).unwrap();
    let mut asset = Asset::load(&plain_path, config).unwrap();
    let mut rng = derive_session_rng(b"off", 0, b"encrypt");
    let response = asset.encrypt_with_rng(None, &mut rng).unwrap();
    asset.save(&cipher_path).unwrap();

    let text = fs::read_to_string(&cipher_path).unwrap();
    assert!(text.contains("# layercrypt-aad "));
    assert!(text.contains("# generated strip"));

    let mut reloaded = Asset::load(&cipher_path, config).unwrap();
    assert!(reloaded.is_encrypted());
    assert_ne!(reloaded.container().vertices(), original.vertices());
    assert_eq!(reloaded.container().faces(), original.faces());

    let level = reloaded.decrypt_to_level(response.key).unwrap();
    assert_eq!(level, VisualLevel::Clear);
    assert!(!reloaded.is_encrypted());
    assert_eq!(reloaded.container().vertices(), original.vertices());
    assert_eq!(reloaded.container().colors(), original.colors());
}

#[test]
fn partial_key_leaves_residual_distortion() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("strip.off");
    fs::write(&path, strip_off(40)).unwrap();

    let original = OffContainer::load(&path).unwrap();
    let mut asset = Asset::load(&path, CipherConfig::default()).unwrap();
    let mut rng = derive_session_rng(b"off", 1, b"encrypt");
    let response = asset.encrypt_with_rng(None, &mut rng).unwrap();
    asset.save(&path).unwrap();

    let mut reloaded = Asset::load(&path, CipherConfig::default()).unwrap();
    let level = reloaded
        .decrypt_to_level(response.key.disclose(Tier::Q).unwrap())
        .unwrap();
    assert_eq!(level, VisualLevel::Low);
    assert_ne!(reloaded.container().vertices(), original.vertices());
}

#[test]
fn wrong_key_keeps_file_encrypted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("strip.off");
    fs::write(&path, strip_off(40)).unwrap();

    let mut asset = Asset::load(&path, CipherConfig::default()).unwrap();
    let mut rng = derive_session_rng(b"off", 2, b"encrypt");
    let response = asset.encrypt_with_rng(None, &mut rng).unwrap();
    let mut other_rng = derive_session_rng(b"off", 3, b"other");
    let stranger = {
        let mut other = Asset::load(&path, CipherConfig::default()).unwrap();
        other.encrypt_with_rng(None, &mut other_rng).unwrap().key
    };
    assert_ne!(stranger, response.key);

    let err = asset.decrypt(stranger).unwrap_err();
    assert!(matches!(err, AssetError::Crypto(CipherError::InvalidKey)));
    assert!(asset.is_encrypted());
    assert!(asset.decrypt(response.key).unwrap());
}

#[test]
fn infinite_vertex_survives_text_roundtrip() {
    let mut data: Vec<f32> = (0..600).map(|i| (i as f32 * 0.13).cos() * 2.5).collect();
    data[0] = f32::INFINITY;
    data[4] = f32::NEG_INFINITY;
    let vertices = NdArray::new(vec![200, 3], data).unwrap();
    let container = OffContainer::new(vertices.clone(), None, vec!["3 0 1 2".into()]).unwrap();
    let mut asset = Asset::new(container, CipherConfig::default());
    let mut rng = derive_session_rng(b"off", 4, b"infinite");
    let response = asset.encrypt_with_rng(None, &mut rng).unwrap();

    let text = asset.into_container().to_text();
    let reparsed = OffContainer::parse(&text).unwrap();
    let mut reloaded = Asset::new(reparsed, CipherConfig::default());
    assert!(reloaded.decrypt(response.key).unwrap());
    let bits: Vec<u32> = reloaded
        .container()
        .vertices()
        .as_slice()
        .iter()
        .map(|v| v.to_bits())
        .collect();
    let expected: Vec<u32> = vertices.as_slice().iter().map(|v| v.to_bits()).collect();
    assert_eq!(bits, expected);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = Asset::load(&dir.path().join("absent.off"), CipherConfig::default()).unwrap_err();
    assert!(matches!(err, AssetError::Io(_)));
}
