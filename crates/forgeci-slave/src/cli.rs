use clap::Parser;
use std::path::PathBuf;

/// `forgeci-slave [--name N] [-f CONFIG] [-d WORKDIR] [-k] [-n] [-s] URL-or-HOST [PORT]`
#[derive(Parser)]
#[clap(version, about = "build slave")]
pub struct Args {
    /// name this slave registers under; defaults to the local hostname
    #[clap(long)]
    pub name: Option<String>,

    /// path to the slave's identity file
    #[clap(short = 'f', long = "config")]
    pub config: Option<PathBuf>,

    /// directory builds are checked out and run in; defaults to a fresh
    /// temporary directory per build
    #[clap(short = 'd', long = "work-dir")]
    pub work_dir: Option<PathBuf>,

    /// leave the build's working directory on disk after completion
    #[clap(short = 'k', long = "keep-files")]
    pub keep_files: bool,

    /// run recipes but never report their outcome back to the master
    #[clap(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// exit after completing a single build instead of polling forever
    #[clap(short = 's', long = "single")]
    pub single: bool,

    /// the master's bare host, or a full `http://` / `forgeci://` URL
    pub host: String,

    /// the master's port; ignored when `host` is a full URL
    pub port: Option<u16>,
}

impl Args {
    /// resolves `host`/`port` into the base URL the HTTP binding is
    /// reached at
    pub fn master_url(&self) -> String {
        if self.host.contains("://") {
            return self.host.trim_end_matches('/').to_string();
        }
        format!("http://{}:{}", self.host, self.port.unwrap_or(7634))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_defaults_to_http_and_standard_port() {
        let args = Args {
            name: None,
            config: None,
            work_dir: None,
            keep_files: false,
            dry_run: false,
            single: false,
            host: "master.example.com".into(),
            port: None,
        };
        assert_eq!(args.master_url(), "http://master.example.com:7634");
    }

    #[test]
    fn full_url_is_used_verbatim() {
        let args = Args {
            name: None,
            config: None,
            work_dir: None,
            keep_files: false,
            dry_run: false,
            single: false,
            host: "https://master.example.com/".into(),
            port: Some(9999),
        };
        assert_eq!(args.master_url(), "https://master.example.com");
    }
}
