//! Runs the `gdp` binary with config and data directories isolated.

use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

pub struct CliEnv {
    home: TempDir,
}

impl CliEnv {
    pub fn new() -> Self {
        Self {
            home: TempDir::new().expect("temp home"),
        }
    }

    pub fn path(&self) -> &Path {
        self.home.path()
    }

    pub fn gdp(&self) -> Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("gdp");
        cmd.current_dir(self.home.path())
            .env("GDP_CONFIG_DIR", self.home.path().join("config"))
            .env("GDP_DATA_DIR", self.home.path().join("data"))
            .env("GDP_TESTING", "1")
            .env_remove("GDP_CONFIG")
            .env_remove("GDP_ROUTER")
            .env_remove("LOG");
        cmd
    }
}
