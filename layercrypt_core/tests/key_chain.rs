use layercrypt_core::{
    AdaptiveSystem, BlockSelection, CipherConfig, CipherError, CipherParams, CryptoSystem,
    DecryptionContext, Key, KeyPolicy, MeshArray, NdArray, Plaintext, Progress, Tier,
    derive_session_rng, generate_keys, get_subkey,
};

fn meshes(count: usize, rows: usize) -> Vec<NdArray<f32>> {
    shifted_meshes(count, rows, 0.0)
}

fn shifted_meshes(count: usize, rows: usize, phase: f32) -> Vec<NdArray<f32>> {
    (0..count)
        .map(|m| {
            let data = (0..rows * 3)
                .map(|i| (((m * 1000 + i) as f32 * 0.017) + phase).cos() * 5.0)
                .collect();
            NdArray::new(vec![rows, 3], data).unwrap()
        })
        .collect()
}

fn bundle(arrays: &[NdArray<f32>]) -> Plaintext {
    Plaintext::new(
        arrays.iter().cloned().map(MeshArray::Float32).collect(),
        vec![],
    )
}

#[test]
fn decrypted_r_tier_reproduces_k2() {
    let params = CipherParams::mesh(3, 5, 9).unwrap();
    let config = CipherConfig::new(params, CipherParams::image(1, 1, 6).unwrap());
    let system = AdaptiveSystem::new(config);
    // Many small arrays so the sample prefix spans several of them.
    let arrays = meshes(12, 10);
    let plain = bundle(&arrays);
    let mut rng = derive_session_rng(b"chain", 0, b"encrypt");
    let enc = system.encrypt(&plain, None, &mut rng).unwrap();

    let k3 = enc.key.disclose(Tier::R).unwrap();
    let mut ctx = DecryptionContext::new(&enc.ciphertext, k3, &enc.aad, None).unwrap();
    assert_eq!(ctx.step().unwrap(), Progress::Pending(Tier::Q));
    assert_eq!(ctx.key().k2(), enc.key.k2());

    let direct = get_subkey(
        &arrays,
        &params,
        enc.key.k3().unwrap(),
        BlockSelection::only(Tier::R),
    )
    .unwrap();
    assert_eq!(Some(&direct), enc.key.k2());
}

#[test]
fn seeded_keys_are_stable_across_runs() {
    let params = CipherParams::mesh(2, 2, 10).unwrap();
    let arrays = meshes(3, 80);
    let mut a = derive_session_rng(b"chain", 1, b"a");
    let mut b = derive_session_rng(b"chain", 2, b"b");
    let first = generate_keys(&arrays, &params, Some([0x5A; 32]), &mut a).unwrap();
    let second = generate_keys(&arrays, &params, Some([0x5A; 32]), &mut b).unwrap();
    assert_eq!(first, second);

    let unseeded = generate_keys(&arrays, &params, None, &mut a).unwrap();
    assert_ne!(unseeded.k3(), first.k3());
}

#[test]
fn supplied_key_is_reused_for_encryption() {
    let system = AdaptiveSystem::default();
    let plain = bundle(&meshes(2, 100));
    let mut rng = derive_session_rng(b"chain", 3, b"encrypt");
    let master = Key::from_master([0x77; 32]);
    let first = system.encrypt(&plain, Some(&master), &mut rng).unwrap();
    let second = system.encrypt(&plain, Some(&first.key), &mut rng).unwrap();
    assert_eq!(first.key, second.key);
    assert_ne!(first.ciphertext, second.ciphertext);
}

#[test]
fn strict_policy_rejects_foreign_key() {
    let config = CipherConfig::default().with_key_policy(KeyPolicy::Strict);
    let system = AdaptiveSystem::new(config);
    let mut rng = derive_session_rng(b"chain", 4, b"encrypt");
    let other = system.encrypt(&bundle(&meshes(2, 100)), None, &mut rng).unwrap();
    let err = system
        .encrypt(&bundle(&shifted_meshes(3, 60, 0.9)), Some(&other.key), &mut rng)
        .unwrap_err();
    assert_eq!(err, CipherError::KeyMismatch);
}

#[test]
fn single_small_array_is_too_small() {
    let system = AdaptiveSystem::default();
    let tiny = NdArray::new(vec![8, 1], vec![1.5f32; 8]).unwrap();
    let plain = Plaintext::new(vec![MeshArray::Float32(tiny)], vec![]);
    let mut rng = derive_session_rng(b"chain", 5, b"encrypt");
    let err = system.encrypt(&plain, None, &mut rng).unwrap_err();
    assert!(matches!(
        err,
        CipherError::InsufficientPlaintext {
            required: 129,
            available: 8
        }
    ));
    assert!(err.to_string().contains("too small"));
}

#[test]
fn parameter_boundaries() {
    assert!(CipherParams::mesh(1, 1, 1).is_ok());
    assert!(CipherParams::mesh(7, 8, 8).is_ok());
    assert!(CipherParams::mesh(8, 8, 8).is_err());
    assert!(CipherParams::image(1, 1, 6).is_ok());
    assert!(CipherParams::image(1, 1, 5).is_err());
}

#[test]
fn empty_key_is_rejected() {
    assert_eq!(Key::new(None, None, None), Err(CipherError::EmptyKey));
}
