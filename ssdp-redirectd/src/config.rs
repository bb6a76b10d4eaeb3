use std::{collections::BTreeMap, fmt, io, net::SocketAddr, path::Path};

use clap::Args;
use http::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use ssdp_redirect::{SSDP_IPV4_GROUP, SSDP_IPV6_LINK_LOCAL_GROUP};
use tokio::fs;

use crate::relay::HeaderEdits;

/// Redirection settings which can be given on the command line.
#[derive(Debug, Default, Args)]
pub struct RedirectArguments {
    /// IPv4 multicast group (and port) to redirect advertisements of.
    ///
    /// Defaults to 239.255.255.250:1900.
    #[arg(long = "ipv4-group")]
    ipv4_group: Option<SocketAddr>,

    /// IPv6 multicast group (and port) to redirect advertisements of, if IPv6 is enabled.
    ///
    /// Defaults to [ff02::c]:1900.
    #[arg(long = "ipv6-group")]
    ipv6_group: Option<SocketAddr>,

    /// Don't redirect advertisements sent to the IPv4 group.
    #[arg(long = "disable-ipv4", default_value_t = false)]
    disable_ipv4: bool,

    /// Also redirect advertisements sent to the IPv6 group.
    #[arg(long = "enable-ipv6", default_value_t = false)]
    enable_ipv6: bool,

    /// Names of the interfaces to redirect between. If none are given, all multicast capable
    /// interfaces are used.
    #[arg(short = 'i', long = "interface", num_args = 1..)]
    interfaces: Vec<String>,

    /// Header to set on every redirected advertisement, in the form `NAME: value`. An existing
    /// header with the same name is replaced.
    #[arg(long = "set-header")]
    set_headers: Vec<String>,

    /// Name of a header to remove from every redirected advertisement.
    #[arg(long = "remove-header")]
    remove_headers: Vec<String>,
}

/// Redirection settings loaded from a config file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    ipv4_group: Option<SocketAddr>,
    ipv6_group: Option<SocketAddr>,
    disable_ipv4: Option<bool>,
    enable_ipv6: Option<bool>,
    interfaces: Option<Vec<String>>,
    set_headers: Option<BTreeMap<String, String>>,
    remove_headers: Option<Vec<String>>,
}

/// The effective redirection settings, after merging command line arguments, the config file,
/// and defaults.
#[derive(Debug)]
pub struct RedirectConfig {
    /// Multicast groups to redirect advertisements of.
    pub groups: Vec<SocketAddr>,
    /// Names of the interfaces to use, empty for all interfaces.
    pub interfaces: Vec<String>,
    /// Modifications applied to every redirected advertisement.
    pub header_edits: HeaderEdits,
}

/// Error returned when the configuration is not valid.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(io::Error),
    /// The config file is not valid TOML, or contains unknown keys.
    Parse(toml::de::Error),
    /// A header in a header edit is not valid.
    Header(String),
    /// Both IPv4 and IPv6 are disabled.
    NoGroups,
}

impl FileConfig {
    /// Load a `FileConfig` from the TOML file at the given path.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        Ok(toml::from_str(&content)?)
    }
}

impl RedirectConfig {
    /// Merge command line arguments with the config file. Values given on the command line take
    /// precedence.
    pub fn merge(args: RedirectArguments, file: FileConfig) -> Result<Self, ConfigError> {
        let mut groups = Vec::new();
        if !(args.disable_ipv4 || file.disable_ipv4.unwrap_or(false)) {
            groups.push(args.ipv4_group.or(file.ipv4_group).unwrap_or(SSDP_IPV4_GROUP));
        }
        if args.enable_ipv6 || file.enable_ipv6.unwrap_or(false) {
            groups.push(
                args.ipv6_group
                    .or(file.ipv6_group)
                    .unwrap_or(SSDP_IPV6_LINK_LOCAL_GROUP),
            );
        }
        if groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }

        let interfaces = if args.interfaces.is_empty() {
            file.interfaces.unwrap_or_default()
        } else {
            args.interfaces
        };

        let mut header_edits = HeaderEdits::default();
        for (name, value) in file.set_headers.unwrap_or_default() {
            header_edits.set(parse_header_name(&name)?, parse_header_value(&value)?);
        }
        for header in args.set_headers {
            let Some((name, value)) = header.split_once(':') else {
                return Err(ConfigError::Header(format!(
                    "expected `NAME: value`, got `{header}`"
                )));
            };
            header_edits.set(parse_header_name(name)?, parse_header_value(value)?);
        }
        for name in file
            .remove_headers
            .unwrap_or_default()
            .iter()
            .chain(args.remove_headers.iter())
        {
            header_edits.remove(parse_header_name(name)?);
        }

        Ok(Self {
            groups,
            interfaces,
            header_edits,
        })
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| ConfigError::Header(format!("invalid header name `{name}`")))
}

fn parse_header_value(value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value.trim())
        .map_err(|_| ConfigError::Header(format!("invalid header value `{value}`")))
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => f.write_fmt(format_args!("could not read config file: {e}")),
            Self::Parse(e) => f.write_fmt(format_args!("could not parse config file: {e}")),
            Self::Header(e) => f.write_str(e),
            Self::NoGroups => f.write_str("both IPv4 and IPv6 are disabled, nothing to redirect"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}
