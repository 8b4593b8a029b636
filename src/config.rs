use std::env;
use std::path::PathBuf;

use clap::Parser;

/// Runtime configuration. Loading itself is plumbing; `from_env`/`from_args`
/// stay a thin env-var layer with an optional CLI overlay, mirroring the
/// required-in-prod / defaulted-in-dev split this service has always used.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub base_url: String,
    pub is_dev: bool,
    /// Filesystem root of the static VoD asset tree.
    pub vod_root: PathBuf,
    /// Sidecar cache root for parsed `RepData`. `None` disables the cache.
    pub rep_data_root: Option<PathBuf>,
    /// Tolerance added to `tsbd` in the Gone-vs-available check.
    pub availability_margin_s: u64,
    /// Per-IP request budget for the rate-limiting middleware. `0` disables
    /// the middleware entirely.
    pub rate_limit_rpm: u32,
}

/// CLI flags, layered on top of the environment-variable defaults. A flag
/// that is present always wins over its env-var counterpart.
#[derive(Parser, Debug, Default)]
#[command(name = "livesim-rs")]
pub struct Args {
    #[arg(long, env = "VOD_ROOT")]
    pub vod_root: Option<PathBuf>,
    #[arg(long, env = "REP_DATA_ROOT")]
    pub rep_data_root: Option<PathBuf>,
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,
    #[arg(long, env = "RATE_LIMIT_RPM")]
    pub rate_limit_rpm: Option<u32>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Self::from_args(Args::default())
    }

    pub fn from_args(args: Args) -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let port = match args.port {
            Some(p) => p,
            None if is_dev => env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            None => env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?,
        };

        let base_url = match args.base_url {
            Some(u) => u,
            None if is_dev => {
                env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
            }
            None => env::var("BASE_URL").map_err(|_| "BASE_URL is required in production")?,
        };

        let vod_root = match args.vod_root {
            Some(p) => p,
            None if is_dev => {
                PathBuf::from(env::var("VOD_ROOT").unwrap_or_else(|_| "./vod".to_string()))
            }
            None => PathBuf::from(
                env::var("VOD_ROOT").map_err(|_| "VOD_ROOT is required in production")?,
            ),
        };

        let rep_data_root = args
            .rep_data_root
            .or_else(|| env::var("REP_DATA_ROOT").ok().map(PathBuf::from));

        let availability_margin_s = env::var("AVAILABILITY_MARGIN_S")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let rate_limit_rpm = args.rate_limit_rpm.unwrap_or_else(|| {
            env::var("RATE_LIMIT_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        });

        Ok(Config {
            port,
            base_url,
            is_dev,
            vod_root,
            rep_data_root,
            availability_margin_s,
            rate_limit_rpm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_args_override_env_defaults() {
        let args = Args {
            vod_root: Some(PathBuf::from("/tmp/vod")),
            rep_data_root: None,
            port: Some(4000),
            base_url: Some("http://localhost:4000".into()),
            rate_limit_rpm: None,
        };
        let cfg = Config::from_args(args).unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.vod_root, PathBuf::from("/tmp/vod"));
        assert_eq!(cfg.availability_margin_s, 10);
    }
}
