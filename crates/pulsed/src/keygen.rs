use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use pulse_core::security::generate_key_pair;
use tracing::info;

pub const DEFAULT_BITS: usize = 4096;

/// Generate an RSA key pair into `out_dir` as PKCS#1 PEM files.
///
/// Returns the private and public key paths. The private key is written
/// with mode 0600 on unix.
pub fn write_key_pair(out_dir: &Path, bits: usize) -> anyhow::Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    info!(bits, "generating RSA key pair");
    let pair = generate_key_pair(bits).context("key generation failed")?;

    let private_path = out_dir.join("private.pem");
    let public_path = out_dir.join("public.pem");
    write_private(&private_path, pair.private_pem.as_bytes())?;
    fs::write(&public_path, pair.public_pem.as_bytes())
        .with_context(|| format!("failed to write {}", public_path.display()))?;

    info!(
        private = %private_path.display(),
        public = %public_path.display(),
        "key pair written"
    );
    Ok((private_path, public_path))
}

fn write_private(path: &Path, pem: &[u8]) -> anyhow::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(pem)
        .with_context(|| format!("failed to write {}", path.display()))
}
