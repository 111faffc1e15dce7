//! Enclave Signer CLI: sealed keys and signed responses
//!
//! Commands:
//!   enclave-signer pubkey       print the signature and box public keys
//!   enclave-signer import-key   provision an Ed25519 keypair
//!   enclave-signer respond      sign a payload cell into the JSON response
//!   enclave-signer pack         sign a payload cell into a response cell

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use enclave_signer::keys::{BoxKeyService, KeyManager, SignatureService};
use enclave_signer::response::ResponseService;
use enclave_signer::tee::{EnclaveMeasurement, SealedCodec, SimulatedEnclave};
use enclave_signer::{Cell, Config};
use std::env;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

type CliResult = Result<(), Box<dyn Error>>;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    println!(
        r#"
Enclave Signer v{}: sealed keys and signed response cells

Usage: enclave-signer <command> [args]

Commands:
  pubkey                             Print the signature and box public keys
  import-key <keypair base64>        Provision a 64-byte Ed25519 keypair
  respond    <payload boc base64>    Sign the payload, write the JSON response
  pack       <payload boc base64> <op code hex>
                                     Sign the payload into a response cell
  help                               Show this message

Keys and responses live under ./{}/
"#,
        APP_VERSION,
        enclave_signer::config::DEFAULT_ROOT
    );
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let result = match args[1].as_str() {
        "pubkey" => cmd_pubkey(),
        "import-key" => cmd_import_key(&args[2..]),
        "respond" => cmd_respond(&args[2..]),
        "pack" => cmd_pack(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

struct Services {
    config: Config,
    codec: SealedCodec,
}

impl Services {
    fn open() -> Result<Self, Box<dyn Error>> {
        let config = Config::load(APP_VERSION)?;
        let measurement = EnclaveMeasurement::compute(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_AUTHORS"),
            1,
            1,
        );
        let enclave = SimulatedEnclave::new(measurement)?;
        Ok(Self {
            config,
            codec: SealedCodec::new(Arc::new(enclave)),
        })
    }

    fn signer(&self) -> SignatureService {
        SignatureService::new(KeyManager::new(
            self.config.signature_keys.clone(),
            self.codec.clone(),
        ))
    }

    fn box_keys(&self) -> BoxKeyService {
        BoxKeyService::new(KeyManager::new(
            self.config.encryption_keys.clone(),
            self.codec.clone(),
        ))
    }

    fn responses(&self) -> ResponseService {
        ResponseService::new(self.config.response.clone(), self.signer())
    }
}

fn parse_payload(arg: Option<&String>, usage: &str) -> Result<Cell, Box<dyn Error>> {
    let encoded = arg.ok_or_else(|| format!("Usage: {}", usage))?;
    Ok(Cell::from_boc(&STANDARD.decode(encoded)?)?)
}

fn cmd_pubkey() -> CliResult {
    let services = Services::open()?;
    let signature = services.signer().get_public_key()?;
    let encryption = services.box_keys().get_public_key()?;

    println!("  Signature key:  {}", hex::encode(signature));
    println!("  Box key:        {}", hex::encode(encryption));
    Ok(())
}

fn cmd_import_key(args: &[String]) -> CliResult {
    let encoded = args
        .first()
        .ok_or("Usage: enclave-signer import-key <keypair base64>")?;
    let key_data = zeroize::Zeroizing::new(STANDARD.decode(encoded)?);

    let signer = Services::open()?.signer();
    signer.save_signature_key(&key_data)?;
    println!("  Imported key:   {}", hex::encode(signer.get_public_key()?));
    Ok(())
}

fn cmd_respond(args: &[String]) -> CliResult {
    let payload = parse_payload(args.first(), "enclave-signer respond <payload boc base64>")?;

    let services = Services::open()?;
    let response = services.responses().save_response(&payload)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn cmd_pack(args: &[String]) -> CliResult {
    const USAGE: &str = "enclave-signer pack <payload boc base64> <op code hex>";
    let payload = parse_payload(args.first(), USAGE)?;
    let op_arg = args.get(1).ok_or_else(|| format!("Usage: {}", USAGE))?;
    let op_code = u32::from_str_radix(op_arg.trim_start_matches("0x"), 16)?;

    let services = Services::open()?;
    let cell = services.responses().pack_response_to_cell(&payload, op_code)?;
    println!("{}", STANDARD.encode(cell.to_boc()));
    Ok(())
}
