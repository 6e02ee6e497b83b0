//! tdx-attest CLI: enclave identity and measured deployment
//!
//! Commands:
//!   tdx-attest identity      derive the enclave's Ethereum identity
//!   tdx-attest hash-dir      hash a directory tree
//!   tdx-attest hash-volumes  hash the bind-mount volumes of a compose file
//!   tdx-attest start         measure volumes into an RTMR, launch, quote
//!   tdx-attest quote         quote the current RTMR value
//!   tdx-attest rtmr          show all RTMR values

use serde::Serialize;
use serde_json::json;
use std::env;
use std::path::{Path, PathBuf};
use tdx_attest_core::deploy::Orchestrator;
use tdx_attest_core::identity::KeyTool;
use tdx_attest_core::measure::{hash_directory, MeasurementRegister, QuoteGenerator, VolumeHasher};
use tdx_attest_core::tee::{open_device, RTMR_COUNT};
use tdx_attest_core::{Result, TeeError, ToolConfig};

fn print_usage() {
    println!(
        r#"
tdx-attest: hardware-rooted identity and measured deployment for Intel TDX

Usage: tdx-attest [--config <file>] <command> [options]

Commands:
  identity     [pubkey|address]     Derive the enclave identity from a fresh TD report
  hash-dir     <path>               Hash a directory tree (SHA-384)
  hash-volumes <compose-file>       Hash all bind-mount volumes of a compose file
  start        <compose-file> [n]   Measure volumes, extend the RTMR, launch (n retries)
  quote        [--with-address]     Quote the current RTMR value
  rtmr                              Show all RTMR values

Environment:
  TDX_ATTEST_BACKEND      auto | tdx | simulated
  TDX_ATTEST_RTMR         register extended by `start` (default 3)
  TDX_ATTEST_SKIP_LAUNCH  measure without launching (1/true)
  TDX_ATTEST_SEED         hex seed of the simulated TD
  RUST_LOG                log filter (default info)

Examples:
  tdx-attest identity address
  tdx-attest hash-volumes docker-compose.yml
  tdx-attest start docker-compose.yml 3
  tdx-attest --config tdx-attest.json quote --with-address
"#
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config_path = match take_option(&mut args, "--config") {
        Ok(path) => path,
        Err(e) => fail(e),
    };
    if args.is_empty() {
        print_usage();
        return;
    }

    let command = args.remove(0);
    if matches!(command.as_str(), "help" | "--help" | "-h") {
        print_usage();
        return;
    }

    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => fail(e),
    };

    let result = match command.as_str() {
        "identity" => cmd_identity(&config, &args),
        "hash-dir" => cmd_hash_dir(&args),
        "hash-volumes" => cmd_hash_volumes(&config, &args),
        "start" => cmd_start(config, &args),
        "quote" => cmd_quote(&config, &args),
        "rtmr" => cmd_rtmr(&config),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        fail(e);
    }
}

fn fail(e: TeeError) -> ! {
    eprintln!("Error: {}", e);
    std::process::exit(e.code().abs());
}

/// Remove `--name <value>` from `args`
fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        return Err(TeeError::InvalidParam(format!("{} needs a value", name)));
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn load_config(path: Option<&str>) -> Result<ToolConfig> {
    let config = match path {
        Some(path) => ToolConfig::load(path)?,
        None => ToolConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| TeeError::InvalidParam(format!("cannot serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn read_descriptor(path: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| TeeError::InvalidParam(format!("cannot read {}: {}", path, e)))
}

/// Relative volumes resolve against the compose file's directory unless `work_dir` is set
fn descriptor_base(config: &ToolConfig, path: &str) -> Result<PathBuf> {
    if let Some(dir) = &config.work_dir {
        return Ok(dir.clone());
    }
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => config.base_dir(),
    }
}

fn cmd_identity(config: &ToolConfig, args: &[String]) -> Result<()> {
    let keytool = KeyTool::open(config)?;
    match args.first().map(|s| s.as_str()) {
        None | Some("full") => print_json(&keytool.derive_full_identity()?),
        Some("pubkey") => print_json(&json!({ "public_key": keytool.public_key_only()?.to_hex() })),
        Some("address") => print_json(&json!({ "address": keytool.address_only()?.to_hex() })),
        Some(other) => Err(TeeError::InvalidParam(format!(
            "unknown identity view '{}', expected pubkey or address",
            other
        ))),
    }
}

fn cmd_hash_dir(args: &[String]) -> Result<()> {
    let path = args
        .first()
        .ok_or_else(|| TeeError::InvalidParam("usage: tdx-attest hash-dir <path>".into()))?;
    let hash = hash_directory(path)?;
    print_json(&json!({ "path": path, "hash": format!("0x{}", hex::encode(hash)) }))
}

fn cmd_hash_volumes(config: &ToolConfig, args: &[String]) -> Result<()> {
    let path = args.first().ok_or_else(|| {
        TeeError::InvalidParam("usage: tdx-attest hash-volumes <compose-file>".into())
    })?;
    let descriptor = read_descriptor(path)?;
    let hasher = VolumeHasher::new(descriptor_base(config, path)?);

    let volumes = hasher.volume_digests(&descriptor)?;
    let combined = hasher.hash_compose_volumes(&descriptor)?;
    print_json(&json!({
        "volumes": volumes,
        "volumes_hash": format!("0x{}", hex::encode(combined)),
    }))
}

fn cmd_start(mut config: ToolConfig, args: &[String]) -> Result<()> {
    let path = args.first().ok_or_else(|| {
        TeeError::InvalidParam("usage: tdx-attest start <compose-file> [retries]".into())
    })?;
    let retries: u32 = match args.get(1) {
        Some(n) => n
            .parse()
            .map_err(|_| TeeError::InvalidParam(format!("retries must be a number, got {}", n)))?,
        None => 3,
    };

    let descriptor = read_descriptor(path)?;
    config.work_dir = Some(descriptor_base(&config, path)?);
    let orchestrator = Orchestrator::open(&config)?;
    let outcome = orchestrator.start_app(&descriptor, retries)?;
    print_json(&outcome)?;

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_quote(config: &ToolConfig, args: &[String]) -> Result<()> {
    let with_address = args.iter().any(|a| a == "--with-address");
    let device = open_device(config)?;
    let register = MeasurementRegister::open(device.clone(), config.rtmr_index as usize)?;

    let address = if with_address {
        Some(KeyTool::new(device.clone()).address_only()?)
    } else {
        None
    };
    let quote = QuoteGenerator::new(device).quote_register(&register, address.as_ref())?;
    print_json(&quote)
}

fn cmd_rtmr(config: &ToolConfig) -> Result<()> {
    let device = open_device(config)?;
    let mut values = serde_json::Map::new();
    for index in 0..RTMR_COUNT {
        let value = device.read_rtmr(index)?;
        values.insert(format!("rtmr{}", index), json!(format!("0x{}", hex::encode(value))));
    }
    print_json(&json!({ "backend": device.backend(), "rtmrs": values }))
}
