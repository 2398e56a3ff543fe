//! evidence_decrypt - operator tool for the authenticated decryption path.
//!
//! Decrypts one `.enc` evidence container, verifies the embedded payload
//! hash, prints segment metadata and the fingerprint, and can dump the
//! recovered frames as JPEG files.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use sentinel_edge::evidence::decode_package;
use sentinel_edge::vault::{hybrid, peek_header, EvidenceSealer, HybridVault, Vault};

#[derive(Parser, Debug)]
#[command(name = "evidence_decrypt", version, about = "Decrypt an evidence container")]
struct Args {
    /// Path to the `.enc` evidence container.
    container: PathBuf,

    /// Symmetric vault key file (32 bytes).
    #[arg(long, env = "SENTINEL_KEY_PATH")]
    key: Option<PathBuf>,

    /// RSA public key PEM (hybrid containers).
    #[arg(long)]
    rsa_public_key: Option<PathBuf>,

    /// RSA private key PEM (hybrid containers).
    #[arg(long)]
    rsa_private_key: Option<PathBuf>,

    /// Write the recovered frames as JPEG files into this directory.
    #[arg(long)]
    dump_frames: Option<PathBuf>,

    /// Print the cleartext header only; no key required.
    #[arg(long)]
    peek: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let container = fs::read(&args.container)
        .with_context(|| format!("cannot read {}", args.container.display()))?;

    if args.peek {
        if hybrid::is_hybrid(&container) {
            println!("format: hybrid (RSA-wrapped session key)");
            return Ok(());
        }
        let header = peek_header(&container)?;
        println!("format: symmetric");
        println!("sealed_at: {:.3}", header.timestamp);
        println!("meta: {}", header.meta_json);
        return Ok(());
    }

    let sealer: Box<dyn EvidenceSealer> = if hybrid::is_hybrid(&container) {
        let public = args
            .rsa_public_key
            .as_deref()
            .ok_or_else(|| anyhow!("hybrid container: --rsa-public-key is required"))?;
        let private = args
            .rsa_private_key
            .as_deref()
            .ok_or_else(|| anyhow!("hybrid container: --rsa-private-key is required"))?;
        Box::new(HybridVault::from_pem_files(public, Some(private))?)
    } else {
        let key_path = args
            .key
            .as_deref()
            .ok_or_else(|| anyhow!("symmetric container: --key is required"))?;
        Box::new(Vault::open(key_path)?)
    };

    let decrypted = sealer.decrypt(&container)?;
    let package = decode_package(&decrypted.payload)?;

    println!("fingerprint: {}", decrypted.fingerprint);
    println!("camera: {}", package.meta.camera_id);
    println!(
        "window: {:.3} .. {:.3} ({} frames, {} detections)",
        package.meta.start_ts,
        package.meta.end_ts,
        package.meta.frame_count,
        package.meta.total_detections
    );

    if let Some(dir) = args.dump_frames {
        fs::create_dir_all(&dir)?;
        for (i, record) in package.records.iter().enumerate() {
            let path = dir.join(format!("frame_{:05}_{:.3}.jpg", i, record.ts));
            fs::write(&path, &record.jpeg)?;
        }
        println!("wrote {} frames to {}", package.records.len(), dir.display());
    }

    Ok(())
}
