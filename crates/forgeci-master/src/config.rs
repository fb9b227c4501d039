use lazy_static::lazy_static;
use log::warn;
use std::env;
use std::str::FromStr;

lazy_static! {
    pub static ref CONFIG: Config = Config::env();
}

pub struct Config {
    /// port the HTTP and long-lived bindings listen on
    pub port: u16,
    /// path to the sqlite database file
    pub database_path: String,
    /// directory build logs are archived under once a build finishes
    pub logs_dir: String,
    /// shared secret mutating admin requests must present; no admin writes
    /// are possible when unset
    pub admin_secret: Option<String>,
    /// allow unauthenticated clients to read build and config state
    pub allow_reads: bool,
    /// queue builds for every known revision instead of only the latest
    pub build_all: bool,
    /// use the wall-clock time a revision was discovered instead of the
    /// revision's own commit time when ordering builds
    pub adjust_timestamps: bool,
    /// seconds a repository must stay unchanged before it is collected
    pub stabilize_wait: u32,
    /// seconds a slave may stay silent before its active build is orphaned
    pub slave_timeout: u32,
    /// seconds between master loop passes over the environments
    pub check_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7000,
            database_path: "forgeci.db".to_string(),
            logs_dir: "log".to_string(),
            admin_secret: None,
            allow_reads: true,
            build_all: false,
            adjust_timestamps: false,
            stabilize_wait: 0,
            slave_timeout: 3600,
            check_interval: 120,
        }
    }
}

impl Config {
    fn env_string(name: &str, default: String) -> String {
        env::var(name).unwrap_or(default)
    }

    fn env_string_option(name: &str, default: Option<String>) -> Option<String> {
        env::var(name).ok().or(default)
    }

    fn env_u16(name: &str, default: u16) -> u16 {
        env::var(name)
            .ok()
            .and_then(|s| {
                u16::from_str(&s).map_err(|_| warn!("failed to parse {name}, using default")).ok()
            })
            .unwrap_or(default)
    }

    fn env_u32(name: &str, default: u32) -> u32 {
        env::var(name)
            .ok()
            .and_then(|s| {
                u32::from_str(&s).map_err(|_| warn!("failed to parse {name}, using default")).ok()
            })
            .unwrap_or(default)
    }

    fn env_bool(name: &str, default: bool) -> bool {
        env::var(name)
            .ok()
            .and_then(|s| {
                bool::from_str(&s).map_err(|_| warn!("failed to parse {name}, using default")).ok()
            })
            .unwrap_or(default)
    }

    #[rustfmt::skip]
    fn env() -> Self {
        let default = Self::default();

        Self {
            port: Self::env_u16("FORGECI_PORT", default.port),
            database_path: Self::env_string("FORGECI_DATABASE", default.database_path),
            logs_dir: Self::env_string("FORGECI_LOGS_DIR", default.logs_dir),
            admin_secret: Self::env_string_option("FORGECI_ADMIN_SECRET", default.admin_secret),
            allow_reads: Self::env_bool("FORGECI_ALLOW_READS", default.allow_reads),
            build_all: Self::env_bool("FORGECI_BUILD_ALL", default.build_all),
            adjust_timestamps: Self::env_bool("FORGECI_ADJUST_TIMESTAMPS", default.adjust_timestamps),
            stabilize_wait: Self::env_u32("FORGECI_STABILIZE_WAIT", default.stabilize_wait),
            slave_timeout: Self::env_u32("FORGECI_SLAVE_TIMEOUT", default.slave_timeout),
            check_interval: Self::env_u32("FORGECI_CHECK_INTERVAL", default.check_interval),
        }
    }
}
