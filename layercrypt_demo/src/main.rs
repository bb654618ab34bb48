use anyhow::{Context, Result, bail};
use blake3::Hasher;
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use hex::FromHex;
use layercrypt_core::{
    AdaptiveSystem, AeadAlgorithm, Asset, AssetContainer, CipherConfig, CryptoSystem,
    DistortionLevel, Key, KeyPolicy, MeshArray, NdArray, OffContainer, Plaintext, SubKey, Tier,
    cipher_preset, derive_session_rng, master_from_passphrase,
};
use log::{LevelFilter, debug, info};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "layercrypt",
    author,
    version,
    about = "Progressive-disclosure encryption for OFF meshes"
)]
struct Cli {
    #[arg(long, global = true)]
    debug: bool,
    #[arg(long, global = true, value_enum, default_value = "standard")]
    level: LevelArg,
    /// Mesh tier widths as `p,q,r`, overriding the preset.
    #[arg(long, global = true, value_name = "P,Q,R")]
    mesh_widths: Option<String>,
    #[arg(long, global = true, value_enum)]
    algorithm: Option<AlgorithmArg>,
    /// Reject supplied keys that do not match the asset instead of
    /// re-deriving them.
    #[arg(long, global = true)]
    strict: bool,
    /// Freshness window in seconds enforced on decryption.
    #[arg(long, global = true, value_name = "SECS")]
    ttl: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LevelArg {
    Light,
    Standard,
    Heavy,
}

impl From<LevelArg> for DistortionLevel {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Light => DistortionLevel::Light,
            LevelArg::Standard => DistortionLevel::Standard,
            LevelArg::Heavy => DistortionLevel::Heavy,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AlgorithmArg {
    AesGcm,
    Chacha20,
}

impl From<AlgorithmArg> for AeadAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::AesGcm => AeadAlgorithm::Aes256Gcm,
            AlgorithmArg::Chacha20 => AeadAlgorithm::ChaCha20Poly1305,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TierArg {
    P,
    Q,
    R,
}

impl From<TierArg> for Tier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::P => Tier::P,
            TierArg::Q => Tier::Q,
            TierArg::R => Tier::R,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt an OFF mesh in place and write the key chain to disk.
    Encrypt {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        #[arg(long, value_name = "FILE")]
        key_out: PathBuf,
        /// Reuse an existing key file.
        #[arg(long, value_name = "FILE", conflicts_with = "seed")]
        key: Option<PathBuf>,
        /// Derive the master subkey from a passphrase (`hex:` prefix for raw bytes).
        #[arg(long)]
        seed: Option<String>,
    },
    /// Decrypt an encrypted OFF mesh as far as the key allows.
    Decrypt {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        #[arg(long, value_name = "FILE")]
        key: PathBuf,
    },
    /// Write a key holding only the subkey for one tier.
    Disclose {
        #[arg(long, value_name = "FILE")]
        key: PathBuf,
        #[arg(long, value_enum)]
        tier: TierArg,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Print the metadata embedded in an encrypted OFF mesh.
    Inspect {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
    },
    /// Encrypt a synthetic mesh and report the error left at each level.
    Demo {
        #[arg(long, default_value = "layercrypt-demo-seed")]
        seed: String,
        #[arg(long, default_value_t = 4096)]
        vertices: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let config = build_config(&cli)?;
    debug!("cipher config: {:?}", config);
    match cli.command {
        Commands::Encrypt {
            input,
            out,
            key_out,
            key,
            seed,
        } => cmd_encrypt(input, out, key_out, key, seed, config),
        Commands::Decrypt { input, out, key } => cmd_decrypt(input, out, key, config),
        Commands::Disclose { key, tier, out } => cmd_disclose(key, tier.into(), out),
        Commands::Inspect { input } => cmd_inspect(input),
        Commands::Demo { seed, vertices } => cmd_demo(seed, vertices, config),
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default));
    builder.format_timestamp(None);
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn build_config(cli: &Cli) -> Result<CipherConfig> {
    let mut config = cipher_preset(cli.level.into()).with_ttl(cli.ttl);
    if let Some(widths) = cli.mesh_widths.as_deref() {
        let (p, q, r) = parse_widths(widths)?;
        config = config
            .with_mesh_widths(p, q, r)
            .with_context(|| format!("invalid mesh widths {widths}"))?;
    }
    if let Some(algorithm) = cli.algorithm {
        config = config.with_algorithm(algorithm.into());
    }
    if cli.strict {
        config = config.with_key_policy(KeyPolicy::Strict);
    }
    Ok(config)
}

fn parse_widths(text: &str) -> Result<(u32, u32, u32)> {
    let widths = text
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing tier widths from '{text}'"))?;
    match widths.as_slice() {
        [p, q, r] => Ok((*p, *q, *r)),
        _ => bail!("Expected three comma-separated widths, got '{text}'."),
    }
}

fn cmd_encrypt(
    input: PathBuf,
    out: PathBuf,
    key_out: PathBuf,
    key_path: Option<PathBuf>,
    seed: Option<String>,
    config: CipherConfig,
) -> Result<()> {
    let mut asset = Asset::load(&input, config)
        .with_context(|| format!("loading mesh from {}", input.display()))?;
    let supplied = match (key_path, seed) {
        (Some(path), _) => Some(load_json::<Key>(&path, "key")?),
        (None, Some(seed)) => Some(Key::from_master(master_from_seed(&seed)?)),
        (None, None) => None,
    };
    let response = asset
        .encrypt(supplied.as_ref())
        .with_context(|| format!("encrypting {}", input.display()))?;
    asset
        .save(&out)
        .with_context(|| format!("writing ciphertext to {}", out.display()))?;
    save_json(&key_out, "key", &response.key)?;
    println!("Wrote encrypted mesh to {}", out.display());
    println!(
        "Wrote key ({} subkeys) to {}",
        response.key.size(),
        key_out.display()
    );
    Ok(())
}

fn cmd_decrypt(
    input: PathBuf,
    out: PathBuf,
    key_path: PathBuf,
    config: CipherConfig,
) -> Result<()> {
    let key: Key = load_json(&key_path, "key")?;
    let mut asset = Asset::load(&input, config)
        .with_context(|| format!("loading mesh from {}", input.display()))?;
    let level = asset
        .decrypt_to_level(key)
        .with_context(|| format!("decrypting {}", input.display()))?;
    asset
        .save(&out)
        .with_context(|| format!("writing plaintext to {}", out.display()))?;
    println!("Decrypted to visual level {level}, wrote {}", out.display());
    Ok(())
}

fn cmd_disclose(key_path: PathBuf, tier: Tier, out: PathBuf) -> Result<()> {
    let key: Key = load_json(&key_path, "key")?;
    let Some(reduced) = key.disclose(tier) else {
        bail!("Key in {} has no {:?} tier subkey.", key_path.display(), tier);
    };
    save_json(&out, "key", &reduced)?;
    println!("Wrote {:?} tier key to {}", tier, out.display());
    Ok(())
}

fn cmd_inspect(input: PathBuf) -> Result<()> {
    let mut container = OffContainer::load(&input)
        .with_context(|| format!("loading mesh from {}", input.display()))?;
    let aad = container
        .retrieve_metadata()
        .with_context(|| format!("reading metadata from {}", input.display()))?;
    println!("system:     {:?}", aad.system);
    println!("algorithm:  {:?}", aad.algorithm);
    println!("mesh tiers: {:?}", aad.meshes_params.widths());
    if aad.encrypt_images {
        println!("image tiers: {:?}", aad.images_params.widths());
    }
    println!("arrays:     {}", aad.table.array_count());
    for tier in Tier::ALL {
        let meta = aad.table.metadata(tier)?;
        println!(
            "{:?} tier:     sealed at {} nonce {}",
            tier,
            meta.timestamp,
            hex::encode(meta.nonce)
        );
    }
    println!("vertices:   {}", vertex_digest(container.vertices()));
    Ok(())
}

fn cmd_demo(seed: String, vertices: usize, config: CipherConfig) -> Result<()> {
    let seed_bytes = parse_seed(&seed)?;
    let plain = synthetic_mesh(vertices)?;
    let reference = mesh_values(&plain)?;
    let system = AdaptiveSystem::new(config);
    let mut rng = derive_session_rng(&seed_bytes, 0, b"layercrypt::demo");
    let enc = system
        .encrypt(&plain, None, &mut rng)
        .context("encrypting synthetic mesh")?;
    println!(
        "High  (no key): rmse {:.6}",
        rmse(&reference, &mesh_values(&enc.ciphertext)?)
    );
    for tier in [Tier::P, Tier::Q, Tier::R] {
        let Some(key) = enc.key.disclose(tier) else {
            bail!("Generated key lacks the {:?} tier subkey.", tier);
        };
        let dec = system.decrypt(&enc.ciphertext, key, &enc.aad)?;
        let label = format!("{}", dec.level);
        println!(
            "{label:<5} ({:?} key): rmse {:.6}",
            tier,
            rmse(&reference, &mesh_values(&dec.plaintext)?)
        );
    }
    info!("demo finished with {} vertices", vertices);
    Ok(())
}

fn synthetic_mesh(vertices: usize) -> Result<Plaintext> {
    let data = (0..vertices * 3)
        .map(|i| {
            let t = i as f32 * 0.011;
            t.sin() * 10.0 + (t * 5.3).cos() + 15.0
        })
        .collect();
    let array = NdArray::new(vec![vertices, 3], data).context("building synthetic mesh")?;
    Ok(Plaintext::new(vec![MeshArray::Float32(array)], Vec::new()))
}

fn mesh_values(bundle: &Plaintext) -> Result<Vec<f32>> {
    match bundle.meshes.first() {
        Some(MeshArray::Float32(array)) => Ok(array.as_slice().to_vec()),
        _ => bail!("Bundle has no float32 mesh."),
    }
}

fn rmse(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
        .sum();
    (sum / a.len() as f64).sqrt()
}

fn vertex_digest(vertices: &NdArray<f32>) -> String {
    let mut hasher = Hasher::new();
    for value in vertices.as_slice() {
        hasher.update(&value.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn load_json<T: DeserializeOwned>(path: &Path, label: &str) -> Result<T> {
    let data =
        fs::read(path).with_context(|| format!("reading {} from {}", label, path.display()))?;
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {} from {}", label, path.display()))?;
    Ok(value)
}

fn save_json<T: ?Sized + serde::Serialize>(path: &Path, label: &str, value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    fs::write(path, serialized)
        .with_context(|| format!("writing {} to {}", label, path.display()))?;
    Ok(())
}

fn parse_seed(seed: &str) -> Result<Vec<u8>> {
    if let Some(hex) = seed.strip_prefix("hex:") {
        let bytes = Vec::from_hex(hex.trim())
            .with_context(|| "failed to parse hex-encoded seed".to_string())?;
        Ok(bytes)
    } else {
        Ok(seed.as_bytes().to_vec())
    }
}

fn master_from_seed(seed: &str) -> Result<SubKey> {
    Ok(master_from_passphrase(&parse_seed(seed)?))
}
