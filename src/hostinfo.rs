// src/hostinfo.rs

//! Identity of the executing host, recorded with every execution.

use anyhow::{anyhow, Context, Result};

/// Host identity at run time.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub hostname: String,
    pub pid: u32,
}

impl HostInfo {
    pub fn get() -> Result<Self> {
        let hostname = nix::unistd::gethostname()
            .context("unable to get hostname")?
            .into_string()
            .map_err(|raw| anyhow!("hostname {raw:?} is not valid UTF-8"))?;

        Ok(Self {
            hostname,
            pid: std::process::id(),
        })
    }
}
