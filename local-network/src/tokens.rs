// Copyright (c) 2024 Botho Foundation

//! Token configuration handed to each consensus node.

use crate::{
    error::Result,
    process::{CommandSpec, ProcessLauncher},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Governors authorized to mint a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorsConfig {
    /// PEM encoded public key(s)
    pub signers: String,
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub token_id: u64,
    pub minimum_fee: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governors: Option<GovernorsConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensConfig {
    pub tokens: Vec<TokenConfig>,
}

impl TokensConfig {
    /// Token 0 pays fees only; tokens 1 and 2 are each minted by one governor.
    pub fn local_network(
        minimum_fee: u64,
        governor_minimum_fee: u64,
        governor1_pub: String,
        governor2_pub: String,
    ) -> Self {
        let governed = |token_id, signers| TokenConfig {
            token_id,
            minimum_fee: governor_minimum_fee,
            governors: Some(GovernorsConfig {
                signers,
                threshold: 1,
            }),
        };

        Self {
            tokens: vec![
                TokenConfig {
                    token_id: 0,
                    minimum_fee,
                    governors: None,
                },
                governed(1, governor1_pub),
                governed(2, governor2_pub),
            ],
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

/// Have the mint client counter-sign the governors in `tokens_file` in place.
pub fn sign_governors(
    launcher: &dyn ProcessLauncher,
    mint_client: &Path,
    current_dir: &Path,
    tokens_file: &Path,
    signing_key: &Path,
) -> Result<()> {
    let spec = CommandSpec::new(mint_client)
        .current_dir(current_dir)
        .arg("sign-governors")
        .path_arg("--tokens", tokens_file)
        .path_arg("--signing-key", signing_key)
        .path_arg("--output-json", tokens_file);
    launcher.run(&spec)?.check("mc-consensus-mint-client sign-governors")?;
    Ok(())
}
