//! Weights download for well-known models.
//!
//! Checksum verification is always compiled; the network side needs the
//! `model-fetch` feature.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Check `bytes` against an expected hex digest (case-insensitive).
pub fn verify_sha256(bytes: &[u8], expected_hex: &str) -> Result<()> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected_hex.trim()) {
        Ok(())
    } else {
        Err(anyhow!(
            "checksum mismatch: expected {}, got {}",
            expected_hex.trim(),
            actual
        ))
    }
}

#[cfg(feature = "model-fetch")]
pub use remote::ModelFetcher;

#[cfg(feature = "model-fetch")]
mod remote {
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::path::Path;

    use anyhow::{anyhow, Context, Result};
    use url::Url;

    use super::verify_sha256;

    /// Downloads `<base_url>/<stem>.onnx` into the model directory.
    #[derive(Clone, Debug)]
    pub struct ModelFetcher {
        base_url: Url,
        checksums: HashMap<String, String>,
    }

    impl ModelFetcher {
        pub fn new(base_url: &str) -> Result<Self> {
            let mut base_url =
                Url::parse(base_url).with_context(|| format!("invalid fetch url {}", base_url))?;
            if !matches!(base_url.scheme(), "http" | "https") {
                return Err(anyhow!("model fetch only supports http(s) urls"));
            }
            if !base_url.path().ends_with('/') {
                let path = format!("{}/", base_url.path());
                base_url.set_path(&path);
            }
            Ok(Self {
                base_url,
                checksums: HashMap::new(),
            })
        }

        /// Require the downloaded weights for `stem` to match a SHA-256 digest.
        pub fn with_checksum(mut self, stem: &str, sha256_hex: &str) -> Self {
            self.checksums
                .insert(stem.to_string(), sha256_hex.to_string());
            self
        }

        pub fn url_for(&self, stem: &str) -> Result<Url> {
            self.base_url
                .join(&format!("{stem}.onnx"))
                .with_context(|| format!("build fetch url for {}", stem))
        }

        /// Download weights to `dest`. The file only appears once complete and verified.
        pub fn fetch(&self, stem: &str, dest: &Path) -> Result<()> {
            let url = self.url_for(stem)?;
            log::info!("downloading {} from {}", stem, url);

            let response = ureq::get(url.as_str())
                .call()
                .with_context(|| format!("fetch model weights from {}", url))?;
            let mut bytes = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut bytes)
                .context("read model weights")?;
            if bytes.is_empty() {
                return Err(anyhow!("empty response for {}", url));
            }
            if let Some(expected) = self.checksums.get(stem) {
                verify_sha256(&bytes, expected)
                    .with_context(|| format!("verify weights for {}", stem))?;
            }

            let dir = dest
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create model dir {}", dir.display()))?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir).context("create temp weights")?;
            tmp.write_all(&bytes).context("write temp weights")?;
            tmp.persist(dest)
                .map_err(|e| anyhow!("persist weights to {}: {}", dest.display(), e.error))?;
            log::info!("saved {} ({} bytes)", dest.display(), bytes.len());
            Ok(())
        }
    }

}
