use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use tracing::error;

use crate::config::PasswordConfig;

pub const SALT_LEN: usize = 16;

/// Argon2id key derivation with configured cost parameters and secret.
#[derive(Clone)]
pub struct PasswordHasher {
    cfg: PasswordConfig,
}

impl PasswordHasher {
    pub fn new(cfg: PasswordConfig) -> anyhow::Result<Self> {
        // Reject bad cost parameters at startup rather than on the first sign-up.
        build_params(&cfg)?;
        Ok(Self { cfg })
    }

    pub fn generate_salt() -> Vec<u8> {
        let mut salt = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    }

    pub fn derive(&self, plain: &str, salt: &[u8]) -> anyhow::Result<Vec<u8>> {
        let argon2 = Argon2::new_with_secret(
            &self.cfg.pepper,
            Algorithm::Argon2id,
            Version::V0x13,
            build_params(&self.cfg)?,
        )
        .map_err(|e| {
            error!(error = %e, "argon2 init error");
            anyhow::anyhow!(e.to_string())
        })?;

        let mut out = vec![0u8; self.cfg.output_len];
        argon2
            .hash_password_into(plain.as_bytes(), salt, &mut out)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password_into error");
                anyhow::anyhow!(e.to_string())
            })?;
        Ok(out)
    }
}

fn build_params(cfg: &PasswordConfig) -> anyhow::Result<Params> {
    Params::new(
        cfg.memory_kib,
        cfg.iterations,
        cfg.parallelism,
        Some(cfg.output_len),
    )
    .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))
}

#[cfg(test)]
pub(crate) fn test_config() -> PasswordConfig {
    PasswordConfig {
        pepper: b"test-pepper".to_vec(),
        iterations: 1,
        memory_kib: 64,
        parallelism: 1,
        output_len: 32,
    }
}
