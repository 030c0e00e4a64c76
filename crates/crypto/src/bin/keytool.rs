//! Sigil key tool
//!
//! Command-line interface for generating RSA key files, extracting public
//! keys and printing thumbprints, independently of any running service.

use anyhow::{anyhow, bail, Context};
use rand::rngs::OsRng;
use serde::Serialize;
use sigil_core::{Config, MIN_SIGNING_KEY_BITS};
use sigil_crypto::{KeyThumbprint, PrivateKeyMaterial, PublicKeyMaterial, RsaEngine};
use std::fs;
use std::path::PathBuf;
use std::process;

/// JSON output for generate command
#[derive(Debug, Serialize)]
struct GenerateOutput {
    bits: u32,
    thumbprint: String,
    private_key_file: String,
    public_key_file: Option<String>,
}

/// JSON output for thumbprint and check commands
#[derive(Debug, Serialize)]
struct KeyInfoOutput {
    kind: &'static str,
    bits: u32,
    thumbprint: String,
    valid: bool,
}

/// Loads either key kind from a file.
fn read_key(path: &PathBuf) -> anyhow::Result<(Option<PrivateKeyMaterial>, PublicKeyMaterial)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if let Some(private) = PrivateKeyMaterial::from_xml(&text) {
        let public = private.public_key().clone();
        return Ok((Some(private), public));
    }
    if let Some(public) = PublicKeyMaterial::from_xml(&text) {
        return Ok((None, public));
    }
    bail!("{} does not contain a valid RSA key", path.display())
}

fn cmd_generate(
    bits: Option<u32>,
    output: PathBuf,
    public: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default_config(),
    };
    let bits = bits.unwrap_or(config.rsa.key_bits);
    if bits < MIN_SIGNING_KEY_BITS {
        bail!(
            "{} bits is too small to sign requests, use at least {}",
            bits,
            MIN_SIGNING_KEY_BITS
        );
    }

    let engine = RsaEngine::new(&config.rsa);
    let key = engine.generate_key(bits, &mut OsRng)?;
    let thumbprint = KeyThumbprint::from_private_key(&key);

    fs::write(&output, key.to_xml().as_bytes())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if let Some(public) = &public {
        fs::write(public, key.public_key().to_xml())
            .with_context(|| format!("Failed to write {}", public.display()))?;
    }

    if json {
        let out = GenerateOutput {
            bits,
            thumbprint: thumbprint.to_string(),
            private_key_file: output.display().to_string(),
            public_key_file: public.map(|p| p.display().to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("✓ Generated {}-bit key {}", bits, thumbprint);
        println!("  Private key: {}", output.display());
        if let Some(public) = public {
            println!("  Public key:  {}", public.display());
        }
    }

    Ok(())
}

fn cmd_public(key: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, public) = read_key(&key)?;
    let xml = public.to_xml();
    match output {
        Some(path) => fs::write(&path, xml)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", xml),
    }
    Ok(())
}

fn cmd_thumbprint(key: PathBuf, json: bool) -> anyhow::Result<()> {
    let (private, public) = read_key(&key)?;
    let thumbprint = KeyThumbprint::from_public_key(&public);

    if json {
        let out = KeyInfoOutput {
            kind: if private.is_some() { "private" } else { "public" },
            bits: public.key_length_bits(),
            thumbprint: thumbprint.to_string(),
            valid: true,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", thumbprint);
    }
    Ok(())
}

fn cmd_check(key: PathBuf, json: bool) -> anyhow::Result<()> {
    let (private, public) = read_key(&key)?;
    let private = private.ok_or_else(|| anyhow!("{} is not a private key", key.display()))?;

    // Parsing already validated the invariants; also confirm the key works.
    let engine = RsaEngine::default();
    let sample = sigil_crypto::BigUint::from(42u32);
    let valid = engine
        .sign(&sample, &private)
        .and_then(|signed| engine.verify(&signed, &public))
        .map(|opened| opened == sample)
        .unwrap_or(false);

    if json {
        let out = KeyInfoOutput {
            kind: "private",
            bits: public.key_length_bits(),
            thumbprint: KeyThumbprint::from_public_key(&public).to_string(),
            valid,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if valid {
        println!("✓ Key is VALID");
    } else {
        println!("✗ Key is INVALID");
    }

    if valid {
        Ok(())
    } else {
        Err(anyhow!("Key check failed"))
    }
}

fn parse_args() -> Result<(String, Vec<String>), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Err("Usage: sigil-keytool <command> [options]".to_string());
    }

    Ok((args[1].clone(), args[2..].to_vec()))
}

fn print_usage() {
    println!("Sigil key tool - Generate and inspect RSA key files");
    println!();
    println!("USAGE:");
    println!("    sigil-keytool generate --output <file> [--bits <n>] [--public <file>] [--config <file>] [--json]");
    println!("    sigil-keytool public --key <file> [--output <file>]");
    println!("    sigil-keytool thumbprint --key <file> [--json]");
    println!("    sigil-keytool check --key <file> [--json]");
    println!();
    println!("COMMANDS:");
    println!("    generate    Generate a new key pair");
    println!("    public      Extract the public key from a private key file");
    println!("    thumbprint  Print the thumbprint of a public or private key");
    println!("    check       Validate a private key file");
    println!();
    println!("EXAMPLES:");
    println!("    sigil-keytool generate --bits 2048 --output client.key --public client.pub");
    println!("    sigil-keytool thumbprint --key client.pub");
}

/// Flags shared by all subcommands.
#[derive(Debug, Default, PartialEq)]
struct Options {
    bits: Option<u32>,
    key: Option<PathBuf>,
    output: Option<PathBuf>,
    public: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
}

fn parse_options(args: &[String]) -> anyhow::Result<Options> {
    let mut options = Options::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--bits" | "-b" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| anyhow!("Missing value for --bits"))?;
                let bits = value
                    .parse()
                    .map_err(|_| anyhow!("Invalid --bits value '{}'", value))?;
                options.bits = Some(bits);
            }
            "--key" | "-k" => {
                i += 1;
                options.key = args.get(i).map(PathBuf::from);
            }
            "--output" | "-o" => {
                i += 1;
                options.output = args.get(i).map(PathBuf::from);
            }
            "--public" | "-p" => {
                i += 1;
                options.public = args.get(i).map(PathBuf::from);
            }
            "--config" | "-c" => {
                i += 1;
                options.config = args.get(i).map(PathBuf::from);
            }
            "--json" => options.json = true,
            _ => {}
        }
        i += 1;
    }
    Ok(options)
}

fn main() {
    sigil_core::logging::init();

    let (command, args) = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            println!();
            print_usage();
            process::exit(1);
        }
    };

    let Options {
        bits,
        key,
        output,
        public,
        config,
        json,
    } = match parse_options(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let result = match command.as_str() {
        "generate" => match output {
            Some(output) => cmd_generate(bits, output, public, config, json),
            None => Err(anyhow!("Missing --output argument")),
        },
        "public" => match key {
            Some(key) => cmd_public(key, output),
            None => Err(anyhow!("Missing --key argument")),
        },
        "thumbprint" => match key {
            Some(key) => cmd_thumbprint(key, json),
            None => Err(anyhow!("Missing --key argument")),
        },
        "check" => match key {
            Some(key) => cmd_check(key, json),
            None => Err(anyhow!("Missing --key argument")),
        },
        _ => {
            print_usage();
            Err(anyhow!("Unknown command: {}", command))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
