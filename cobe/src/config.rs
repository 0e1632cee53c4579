//! IRC client configuration.
//!
//! Settings come from command-line flags, an optional TOML file given with
//! `--config`, and built-in defaults, in that order of precedence.
//!
//! ```toml
//! server = "irc.libera.chat"
//! port = 6697
//! tls = true
//! nick = "cobe"
//! channels = ["#cobe", "#secret hunter2"]
//! ignored_nicks = ["otherbot"]
//! random_replies = 2.5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use cobe_irc::client::ConnectConfig;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::normalize::{Decoder, NickFilter};
use crate::session::PendingJoin;

pub const DEFAULT_PORT: u16 = 6667;
pub const DEFAULT_NICK: &str = "cobe";
pub const DEFAULT_ENCODING: &str = "utf-8";
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(120);

/// `irc-client` flags.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct IrcArgs {
    /// IRC server hostname
    #[arg(short, long)]
    pub server: Option<String>,

    /// IRC server port [default: 6667]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// IRC server password
    #[arg(short = 'w', long, env = "COBE_IRC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Bot nickname [default: cobe]
    #[arg(short, long)]
    pub nick: Option<String>,

    /// Text encoding of the channel [default: utf-8]
    #[arg(short, long)]
    pub encoding: Option<String>,

    /// Answer undecodable messages with the decoding error instead of
    /// replacing bad bytes
    #[arg(long)]
    pub strict_decoding: bool,

    /// Connect with TLS (implied by port 6697)
    #[arg(long)]
    pub tls: bool,

    /// Channel to join, as "#name" or "#name key" (repeatable)
    #[arg(short, long = "channel")]
    pub channels: Vec<String>,

    /// Nick to ignore (repeatable)
    #[arg(short = 'i', long = "ignore-nick")]
    pub ignored_nicks: Vec<String>,

    /// Only learn from this nick (repeatable)
    #[arg(short = 'o', long = "only-nick")]
    pub only_nicks: Vec<String>,

    /// Percentage of unaddressed messages to answer anyway [default: 0]
    #[arg(short = 'r', long = "random-replies", alias = "random-reply")]
    pub random_replies: Option<f64>,

    /// TOML file with any of the settings above
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Contents of the `--config` file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub nick: Option<String>,
    pub encoding: Option<String>,
    pub strict_decoding: Option<bool>,
    pub tls: Option<bool>,
    pub channels: Vec<String>,
    pub ignored_nicks: Vec<String>,
    pub only_nicks: Vec<String>,
    pub random_replies: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved session settings.
#[derive(Debug, Clone)]
pub struct IrcConfig {
    pub server: String,
    pub port: u16,
    pub password: Option<String>,
    pub nick: String,
    pub decoder: Decoder,
    pub tls: bool,
    pub channels: Vec<PendingJoin>,
    pub filter: NickFilter,
    pub random_reply_percent: f64,
    pub health_check_interval: Duration,
}

impl IrcConfig {
    /// Defaults for everything but the server; no channels.
    pub fn for_server(server: &str) -> Self {
        Self {
            server: server.to_string(),
            port: DEFAULT_PORT,
            password: None,
            nick: DEFAULT_NICK.to_string(),
            decoder: Decoder::default(),
            tls: false,
            channels: Vec::new(),
            filter: NickFilter::default(),
            random_reply_percent: 0.0,
            health_check_interval: HEALTH_CHECK_INTERVAL,
        }
    }

    /// Read the `--config` file, if any, and merge it under the flags.
    pub fn from_args(args: IrcArgs) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Flags win over the file; list options from the file are used only
    /// when no flag of that kind was given.
    pub fn resolve(args: IrcArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let server = args
            .server
            .or(file.server)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingServer)?;

        let channel_specs = prefer(args.channels, file.channels);
        if channel_specs.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        let channels = channel_specs
            .iter()
            .map(|spec| PendingJoin::parse(spec).ok_or_else(|| ConfigError::BadChannel(spec.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let random_reply_percent = args.random_replies.or(file.random_replies).unwrap_or(0.0);
        if !(0.0..=100.0).contains(&random_reply_percent) {
            return Err(ConfigError::RandomReplyOutOfRange(random_reply_percent));
        }

        let strict = args.strict_decoding || file.strict_decoding.unwrap_or(false);
        let encoding = args
            .encoding
            .or(file.encoding)
            .unwrap_or_else(|| DEFAULT_ENCODING.to_string());
        let decoder = Decoder::for_label(&encoding, strict)?;

        Ok(Self {
            server,
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            password: args.password.or(file.password),
            nick: args
                .nick
                .or(file.nick)
                .unwrap_or_else(|| DEFAULT_NICK.to_string()),
            decoder,
            tls: args.tls || file.tls.unwrap_or(false),
            channels,
            filter: NickFilter::new(
                prefer(args.ignored_nicks, file.ignored_nicks),
                prefer(args.only_nicks, file.only_nicks),
            ),
            random_reply_percent,
            health_check_interval: HEALTH_CHECK_INTERVAL,
        })
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_addr: format!("{}:{}", self.server, self.port),
            nick: self.nick.clone(),
            user: self.nick.clone(),
            realname: "cobe".to_string(),
            password: self.password.clone(),
            tls: self.tls,
        }
    }
}

fn prefer(flags: Vec<String>, file: Vec<String>) -> Vec<String> {
    if flags.is_empty() { file } else { flags }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(server: &str, channels: &[&str]) -> IrcArgs {
        IrcArgs {
            server: Some(server.to_string()),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_apply() {
        let config =
            IrcConfig::resolve(args("irc.example.net", &["#cobe"]), FileConfig::default()).unwrap();
        assert_eq!(config.port, 6667);
        assert_eq!(config.nick, "cobe");
        assert_eq!(config.decoder.name(), "UTF-8");
        assert_eq!(config.random_reply_percent, 0.0);
        assert_eq!(config.health_check_interval, Duration::from_secs(120));
        assert!(!config.tls);
        assert_eq!(config.channels, vec![PendingJoin::new("#cobe", None)]);

        let connect = config.connect_config();
        assert_eq!(connect.server_addr, "irc.example.net:6667");
        assert_eq!(connect.nick, "cobe");
        assert_eq!(connect.password, None);
    }

    #[test]
    fn flags_override_file() {
        let file: FileConfig = toml::from_str(
            r##"
            server = "file.example.net"
            port = 7000
            nick = "filebot"
            channels = ["#file"]
            ignored_nicks = ["spam"]
            random_replies = 5.0
            "##,
        )
        .unwrap();
        let cli = IrcArgs {
            nick: Some("clibot".into()),
            ..args("cli.example.net", &[])
        };
        let config = IrcConfig::resolve(cli, file).unwrap();
        assert_eq!(config.server, "cli.example.net");
        assert_eq!(config.port, 7000);
        assert_eq!(config.nick, "clibot");
        assert_eq!(config.channels, vec![PendingJoin::new("#file", None)]);
        assert!(config.filter.is_ignored("spam"));
        assert_eq!(config.random_reply_percent, 5.0);
    }

    #[test]
    fn channel_keys_are_parsed() {
        let cli = args("irc.example.net", &["#open", "#locked s3cret"]);
        let config = IrcConfig::resolve(cli, FileConfig::default()).unwrap();
        assert_eq!(
            config.channels,
            vec![PendingJoin::new("#open", None), PendingJoin::new("#locked", Some("s3cret"))]
        );
    }

    #[test]
    fn missing_server_or_channels_is_rejected() {
        let no_server = IrcArgs {
            channels: vec!["#cobe".into()],
            ..Default::default()
        };
        assert!(matches!(
            IrcConfig::resolve(no_server, FileConfig::default()),
            Err(ConfigError::MissingServer)
        ));
        assert!(matches!(
            IrcConfig::resolve(args("irc.example.net", &[]), FileConfig::default()),
            Err(ConfigError::NoChannels)
        ));
        assert!(matches!(
            IrcConfig::resolve(args("irc.example.net", &["cobe"]), FileConfig::default()),
            Err(ConfigError::BadChannel(_))
        ));
    }

    #[test]
    fn bad_values_are_rejected() {
        let cli = IrcArgs {
            random_replies: Some(150.0),
            ..args("irc.example.net", &["#cobe"])
        };
        assert!(matches!(
            IrcConfig::resolve(cli, FileConfig::default()),
            Err(ConfigError::RandomReplyOutOfRange(_))
        ));

        let cli = IrcArgs {
            encoding: Some("klingon".into()),
            ..args("irc.example.net", &["#cobe"])
        };
        assert!(matches!(
            IrcConfig::resolve(cli, FileConfig::default()),
            Err(ConfigError::UnknownEncoding(_))
        ));
    }

    #[test]
    fn random_reply_flag_spellings() {
        use clap::Parser;

        #[derive(Parser)]
        struct Cli {
            #[command(flatten)]
            args: IrcArgs,
        }

        for flag in ["--random-replies", "--random-reply", "-r"] {
            let argv = ["cobe", "-s", "irc.example.net", "-c", "#cobe", flag, "5"];
            let cli = Cli::try_parse_from(argv).unwrap_or_else(|e| panic!("{flag}: {e}"));
            assert_eq!(cli.args.random_replies, Some(5.0), "{flag}");
        }
    }

    #[test]
    fn unknown_file_keys_fail_to_parse() {
        assert!(toml::from_str::<FileConfig>("sever = \"typo\"").is_err());
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cobe.toml");
        std::fs::write(
            &path,
            "server = \"irc.example.net\"\nchannels = [\"#cobe\"]\nstrict_decoding = true\n",
        )
        .unwrap();
        let cli = IrcArgs {
            config: Some(path),
            ..Default::default()
        };
        let config = IrcConfig::from_args(cli).unwrap();
        assert_eq!(config.server, "irc.example.net");
        assert_eq!(config.channels.len(), 1);

        let missing = IrcArgs {
            config: Some(dir.path().join("nope.toml")),
            ..Default::default()
        };
        assert!(matches!(IrcConfig::from_args(missing), Err(ConfigError::Read { .. })));
    }
}
