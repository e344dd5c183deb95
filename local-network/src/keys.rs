// Copyright (c) 2024 Botho Foundation

//! Ed25519 key material, produced by external tools.

use crate::{
    error::Result,
    process::{CommandSpec, ProcessLauncher},
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use std::{fs, path::Path};

/// Seed of the minting trust root. The consensus enclave is built trusting
/// the public key derived from it.
pub const MINTING_TRUST_ROOT_SEED: &str =
    "abababababababababababababababababababababababababababababababab";

/// Write a fresh ed25519 private key (PKCS#8 PEM) to `out`.
pub fn generate_ed25519(launcher: &dyn ProcessLauncher, openssl: &Path, out: &Path) -> Result<()> {
    let spec = CommandSpec::new(openssl)
        .args(["genpkey", "-algorithm", "ed25519"])
        .path_arg("-out", out);
    launcher.run(&spec)?.check("openssl genpkey")?;
    Ok(())
}

/// Write the public half of `private_key` as a PEM file.
pub fn write_public_key(
    launcher: &dyn ProcessLauncher,
    openssl: &Path,
    private_key: &Path,
    out: &Path,
) -> Result<()> {
    let spec = CommandSpec::new(openssl)
        .arg("pkey")
        .arg("-pubout")
        .path_arg("-in", private_key)
        .path_arg("-out", out);
    launcher.run(&spec)?.check("openssl pkey")?;
    Ok(())
}

/// URL-safe, unpadded base64 of the DER public key matching `private_key`.
pub fn public_key_fingerprint(
    launcher: &dyn ProcessLauncher,
    openssl: &Path,
    private_key: &Path,
) -> Result<String> {
    let spec = CommandSpec::new(openssl)
        .arg("pkey")
        .path_arg("-in", private_key)
        .arg("-pubout");
    let output = launcher.run(&spec)?.check("openssl pkey")?;
    let public = pem::parse(&output.stdout)?;
    Ok(URL_SAFE_NO_PAD.encode(public.contents()))
}

/// Base64 body of a PEM private key, as the consensus service expects for
/// `--msg-signer-key`.
pub fn private_key_body(private_key: &Path) -> Result<String> {
    let contents = fs::read(private_key)?;
    let key = pem::parse(contents)?;
    Ok(STANDARD.encode(key.contents()))
}

/// Run the seeded key generator and store its PEM output in `out`.
pub fn seeded_ed25519(
    launcher: &dyn ProcessLauncher,
    generator: &Path,
    current_dir: &Path,
    seed: &str,
    out: &Path,
) -> Result<()> {
    let spec = CommandSpec::new(generator)
        .current_dir(current_dir)
        .args(["--seed", seed]);
    let output = launcher.run(&spec)?.check("mc-util-seeded-ed25519-key-gen")?;
    fs::write(out, output.stdout)?;
    Ok(())
}
