use layercrypt_core::{
    AdaptiveSystem, CipherConfig, CryptoSystem, MeshArray, NdArray, Plaintext, Tier, VisualLevel,
    derive_session_rng,
};

fn terrain(rows: usize) -> Plaintext {
    let data = (0..rows * 3)
        .map(|i| {
            let x = i as f32 * 0.013;
            x.sin() * 12.0 + (x * 3.7).cos() * 0.5 + 20.0
        })
        .collect();
    let verts = NdArray::new(vec![rows, 3], data).unwrap();
    Plaintext::new(vec![MeshArray::Float32(verts)], vec![])
}

fn floats(bundle: &Plaintext) -> Vec<f32> {
    match &bundle.meshes[0] {
        MeshArray::Float32(arr) => arr.as_slice().to_vec(),
        other => panic!("unexpected mesh array {other:?}"),
    }
}

fn rmse(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum();
    (sum / a.len() as f64).sqrt()
}

#[test]
fn deeper_subkeys_reduce_distortion() {
    let config = CipherConfig::default().with_mesh_widths(2, 2, 10).unwrap();
    let system = AdaptiveSystem::new(config);
    let plain = terrain(3000);
    let reference = floats(&plain);
    let mut rng = derive_session_rng(b"disclosure", 0, b"encrypt");
    let enc = system.encrypt(&plain, None, &mut rng).unwrap();

    let high = rmse(&reference, &floats(&enc.ciphertext));
    let mut levels = Vec::new();
    for tier in [Tier::P, Tier::Q, Tier::R] {
        let key = enc.key.disclose(tier).unwrap();
        let dec = system.decrypt(&enc.ciphertext, key, &enc.aad).unwrap();
        levels.push((dec.level, rmse(&reference, &floats(&dec.plaintext))));
    }
    let (mid_level, mid) = levels[0];
    let (low_level, low) = levels[1];
    let (clear_level, clear) = levels[2];

    assert_eq!(mid_level, VisualLevel::Mid);
    assert_eq!(low_level, VisualLevel::Low);
    assert_eq!(clear_level, VisualLevel::Clear);
    assert!(high > mid, "high {high} <= mid {mid}");
    assert!(mid > low, "mid {mid} <= low {low}");
    assert!(low > clear, "low {low} <= clear {clear}");
    assert_eq!(clear, 0.0);
}

#[test]
fn ciphertext_stays_finite() {
    let config = CipherConfig::default().with_mesh_widths(7, 8, 8).unwrap();
    let system = AdaptiveSystem::new(config);
    let plain = terrain(500);
    let mut rng = derive_session_rng(b"disclosure", 1, b"encrypt");
    let enc = system.encrypt(&plain, None, &mut rng).unwrap();
    let reference = floats(&plain);
    for (orig, ct) in reference.iter().zip(floats(&enc.ciphertext)) {
        assert!(ct.is_finite());
        assert_eq!(orig.is_sign_negative(), ct.is_sign_negative());
        assert!(ct.abs() < orig.abs() * 2.0 && ct.abs() >= orig.abs() / 2.0);
    }
}
