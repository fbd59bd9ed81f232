use anyhow::{Context, bail};
use clap::Parser;
use keymaker_tonic_core::{
    Error, Result, TlsMaterial,
    keymaker::{Algorithm, check_algorithm},
};
use std::path::{Path, PathBuf};

/// Default number of keys a stream may hold before its producer blocks.
pub const DEFAULT_BUFFER_SIZE: usize = 8;

/// Command line of the `keymaker-pilot` binary.
///
/// The pilot requests keys of every `--type` from the `--drone` cluster and
/// reports per-type counts once a second until interrupted.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "keymaker-pilot",
    version,
    about = "Generates keys from a cluster of keymaker drones and displays stats"
)]
pub struct PilotArgs {
    /// Drone address; repeat or comma-separate for a cluster.
    ///
    /// Environment variable: `PILOT_DRONES`
    #[arg(short, long = "drone", env = "PILOT_DRONES", value_delimiter = ',', required = true)]
    pub drones: Vec<String>,

    /// Key type to generate; repeat or comma-separate for several.
    ///
    /// Environment variable: `PILOT_TYPES`
    #[arg(short, long = "type", env = "PILOT_TYPES", value_delimiter = ',', required = true)]
    pub types: Vec<String>,

    /// Keys buffered per stream ahead of the consumer.
    ///
    /// Environment variable: `PILOT_BUFFER_SIZE`
    #[arg(short, long, env = "PILOT_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// PEM client certificate chain.
    ///
    /// Environment variable: `PILOT_CERTIFICATE`
    #[arg(long, env = "PILOT_CERTIFICATE", default_value = "drone-client.pem")]
    pub certificate: PathBuf,

    /// PEM private key matching `--certificate`.
    ///
    /// Environment variable: `PILOT_PRIVATE_KEY`
    #[arg(long, env = "PILOT_PRIVATE_KEY", default_value = "drone-client-key.pem")]
    pub private_key: PathBuf,

    /// PEM bundle of CAs trusted to sign drone certificates.
    ///
    /// Environment variable: `PILOT_CA_BUNDLE`
    #[arg(long, env = "PILOT_CA_BUNDLE", default_value = "ca.pem")]
    pub ca_bundle: PathBuf,

    /// Base directory for relative certificate and key paths.
    ///
    /// Environment variable: `PILOT_DIR`
    #[arg(long, env = "PILOT_DIR")]
    pub dir: Option<PathBuf>,

    /// Print every generated key and log at debug level.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Drone `host:port` addresses, used round-robin.
    pub addresses: Vec<String>,
    /// Capacity of each key stream.
    pub buffer_size: usize,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub ca_bundle: PathBuf,
    /// Key types validated when the client is opened.
    pub key_types: Vec<String>,
}

impl ClientConfig {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            certificate: PathBuf::new(),
            private_key: PathBuf::new(),
            ca_bundle: PathBuf::new(),
            key_types: Vec::new(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_key_types<I, S>(mut self, key_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_types = key_types.into_iter().map(Into::into).collect();
        self
    }

    /// Checks everything that can be checked without the network.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for a zero buffer size or no addresses.
    /// - [`Error::Key`] wrapping `InvalidAlgorithm` for an unknown key type.
    pub fn validate(&self) -> Result<Vec<Algorithm>> {
        if self.buffer_size == 0 {
            return Err(Error::Config("buffer size must be greater than 0".to_string()));
        }
        if self.addresses.is_empty() {
            return Err(Error::Config("no drone addresses configured".to_string()));
        }
        Ok(self
            .key_types
            .iter()
            .map(|name| check_algorithm(name))
            .collect::<keymaker_tonic_core::keymaker::Result<_>>()?)
    }

    /// Reads the certificate, key and CA bundle files.
    ///
    /// # Errors
    ///
    /// Fails naming the first file that cannot be read.
    pub fn read_tls_material(&self) -> anyhow::Result<TlsMaterial> {
        let read = |what: &str, path: &Path| {
            std::fs::read(path).with_context(|| format!("reading {what} {}", path.display()))
        };
        Ok(TlsMaterial::new(
            read("certificate", &self.certificate)?,
            read("private key", &self.private_key)?,
            read("CA bundle", &self.ca_bundle)?,
        ))
    }
}

impl TryFrom<PilotArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: PilotArgs) -> Result<Self, Self::Error> {
        let drones: Vec<String> = args
            .drones
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if drones.is_empty() {
            bail!("no drone addresses specified");
        }

        let types: Vec<String> = args
            .types
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if types.is_empty() {
            bail!("no key types specified");
        }

        if args.buffer_size == 0 {
            bail!("PILOT_BUFFER_SIZE must be greater than 0");
        }

        let resolve = |path: &PathBuf| match &args.dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.clone(),
        };

        let config = Self {
            addresses: drones,
            buffer_size: args.buffer_size,
            certificate: resolve(&args.certificate),
            private_key: resolve(&args.private_key),
            ca_bundle: resolve(&args.ca_bundle),
            key_types: types,
        };
        config.validate()?;
        Ok(config)
    }
}
