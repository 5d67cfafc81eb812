use anyhow::Context;
use clap::{Parser, ValueEnum};
use he_gc_bridge::gc::session::LocalParty;
use he_gc_bridge::gc::{plain, tfhe_boolean, ClientKeyT, ContextT};
use he_gc_bridge::he::rns::{self, RnsCiphertext, RnsParams};
use he_gc_bridge::he::{HeTensor, HeValue, Packing};
use he_gc_bridge::{logger, BridgeConfig, ServerExecutor};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, level_filters::LevelFilter};

const RELU: &str = r#"{"function": "Relu"}"#;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Engine {
    /// Cleartext gates
    Plain,
    /// Gates over tfhe boolean ciphertexts
    TfheBoolean,
}

#[derive(Debug, Parser)]
#[command(version, about = "Evaluate ReLU over encrypted values through a boolean circuit")]
struct Cli {
    /// Values to encrypt, packed into one ciphertext
    #[arg(required = true, allow_negative_numbers = true)]
    values: Vec<f64>,
    #[arg(long, value_enum, default_value_t = Engine::Plain)]
    engine: Engine,
    /// Seed for keys and masks, drawn from the OS when absent
    #[arg(long)]
    seed: Option<u64>,
    /// JSON file with `rns` and `bridge` sections
    #[arg(long)]
    config: Option<PathBuf>,
    /// Leave circuit outputs unmasked
    #[arg(long)]
    no_output_mask: bool,
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    rns: RnsParams,
    bridge: BridgeConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(cli.log_level);

    let mut config = load_config(cli.config.as_ref())?;
    if cli.no_output_mask {
        config.rns.mask_gc_outputs = false;
    }
    let mut rng = match cli.seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_os_rng(),
    };

    let start = Instant::now();
    let outputs = match cli.engine {
        Engine::Plain => {
            let (client_key, context) = plain::generate_keys();
            run_relu(&cli.values, config, client_key, context, &mut rng)?
        }
        Engine::TfheBoolean => {
            let (client_key, context) = tfhe_boolean::generate_keys();
            debug!("tfhe boolean keys generated {:?}", start.elapsed());
            run_relu(&cli.values, config, client_key, context, &mut rng)?
        }
    };
    info!("relu over {} values took {:?}", outputs.len(), start.elapsed());

    for (value, output) in cli.values.iter().zip(&outputs) {
        println!("relu({}) = {}", value, output);
    }
    Ok(())
}

fn run_relu<CK, Ctx>(
    values: &[f64],
    config: FileConfig,
    client_key: CK,
    context: Ctx,
    rng: &mut ChaCha20Rng,
) -> anyhow::Result<Vec<f64>>
where
    CK: ClientKeyT<Bit = Ctx::Bit>,
    Ctx: ContextT,
{
    // Client side: HE keys and encrypted input
    let (he_client, backend) = rns::generate_keys(config.rns, rng)?;
    let ct = he_client.encrypt(values, false)?;
    let packing = Packing {
        plaintext_packing: true,
        complex_packing: false,
    };
    let mut tensor: HeTensor<RnsCiphertext> =
        HeTensor::new(vec![values.len(), 1], packing, vec![HeValue::Ciphertext(ct)])?;

    // Server side: mask, evaluate, unmask
    let party = LocalParty::new(he_client, client_key, context);
    let mut executor = ServerExecutor::new(backend, party, rng.clone(), config.bridge)?;
    executor.evaluate(RELU, &mut tensor)?;

    // Client side: decrypt result
    let ct = tensor.data()[0]
        .ciphertext()
        .context("result is not a ciphertext")?;
    Ok(executor.evaluator().he_client().decrypt(ct))
}
