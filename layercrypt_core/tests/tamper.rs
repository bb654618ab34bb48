use layercrypt_core::{
    AdaptiveSystem, CipherConfig, CipherError, CryptoSystem, EncryptionResponse, Key, MeshArray,
    NdArray, Plaintext, META_WORDS, Tier, derive_session_rng,
};

fn encrypted(label: &[u8]) -> (AdaptiveSystem, EncryptionResponse) {
    let data = (0..900).map(|i| (i as f32 * 0.21).sin() * 7.0 + 0.3).collect();
    let verts = NdArray::new(vec![300, 3], data).unwrap();
    let plain = Plaintext::new(vec![MeshArray::Float32(verts)], vec![]);
    let system = AdaptiveSystem::new(CipherConfig::default());
    let mut rng = derive_session_rng(label, 0, b"tamper");
    let enc = system.encrypt(&plain, None, &mut rng).unwrap();
    (system, enc)
}

/// Flips bit `offset` (counted from the most significant bit) of the first
/// vertex coordinate.
fn flip_first_element(bundle: &mut Plaintext, offset: u32) {
    let MeshArray::Float32(arr) = &mut bundle.meshes[0] else {
        panic!("expected float32 vertices");
    };
    let value = &mut arr.as_mut_slice()[0];
    *value = f32::from_bits(value.to_bits() ^ (1 << (31 - offset)));
}

fn decrypt_err(system: &AdaptiveSystem, enc: &EncryptionResponse, key: Key) -> CipherError {
    system
        .decrypt(&enc.ciphertext, key, &enc.aad)
        .expect_err("tampered ciphertext must not decrypt")
}

#[test]
fn flipped_ciphertext_bit_fails_each_tier() {
    // Default mesh tiers: p = [9, 11), q = [11, 13), r = [13, 23).
    for (tier, offset) in [(Tier::P, 10), (Tier::Q, 12), (Tier::R, 20)] {
        let (system, mut enc) = encrypted(b"ciphertext");
        flip_first_element(&mut enc.ciphertext, offset);
        let key = enc.key.disclose(tier).unwrap();
        assert_eq!(decrypt_err(&system, &enc, key), CipherError::InvalidKey);
    }
}

#[test]
fn untouched_bits_do_not_affect_authentication() {
    let (system, mut enc) = encrypted(b"outside");
    flip_first_element(&mut enc.ciphertext, 30);
    let dec = system
        .decrypt(&enc.ciphertext, enc.key.clone(), &enc.aad)
        .unwrap();
    assert!(dec.key.filled());
}

#[test]
fn flipped_metadata_fails() {
    let (system, enc) = encrypted(b"metadata");
    let arrays = enc.aad.table.array_count();
    for tier in Tier::ALL {
        let key = enc.key.disclose(tier).unwrap();
        for row in [0, arrays, arrays + 2, arrays + META_WORDS - 1] {
            let mut forged = enc.clone();
            forged.aad.table.rows_mut()[row][tier.index()] ^= 0x0000_0100;
            assert_eq!(
                decrypt_err(&system, &forged, key.clone()),
                CipherError::InvalidKey,
                "row {row} of {tier:?}"
            );
        }
    }
}

#[test]
fn wrong_key_is_reported_as_invalid() {
    let (system, enc) = encrypted(b"wrong-key");
    let key = Key::new(Some([0x11; 32]), None, None).unwrap();
    assert_eq!(decrypt_err(&system, &enc, key), CipherError::InvalidKey);
}
