use anyhow::{Context, bail};
use clap::Parser;
use keymaker_tonic_core::{ClientAuthMode, TlsMaterial};
use std::path::{Path, PathBuf};

/// Default listen address of a drone.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:10101";

/// Runtime configuration for the `keymaker-drone` binary.
///
/// Every option can also be supplied through the environment (or a `.env`
/// file in the working directory).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "keymaker-drone",
    version,
    about = "A gRPC drone issuing freshly generated private keys over mutual TLS"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `DRONE_ADDR`
    #[arg(long, env = "DRONE_ADDR", default_value_t = String::from(DEFAULT_ADDRESS))]
    pub addr: String,

    /// Maximum number of keys generated at the same time.
    ///
    /// Zero or a negative value uses the number of logical CPUs.
    ///
    /// Environment variable: `DRONE_CONCURRENCY`
    #[arg(long, env = "DRONE_CONCURRENCY", default_value_t = 0, allow_negative_numbers = true)]
    pub concurrency: i64,

    /// PEM certificate chain presented to clients.
    ///
    /// Environment variable: `DRONE_CERTIFICATE`
    #[arg(long, env = "DRONE_CERTIFICATE", default_value = "drone.pem")]
    pub certificate: PathBuf,

    /// PEM private key matching `--certificate`.
    ///
    /// Environment variable: `DRONE_PRIVATE_KEY`
    #[arg(long, env = "DRONE_PRIVATE_KEY", default_value = "drone-key.pem")]
    pub private_key: PathBuf,

    /// PEM bundle of CAs trusted to sign client certificates.
    ///
    /// Environment variable: `DRONE_CA_BUNDLE`
    #[arg(long, env = "DRONE_CA_BUNDLE", default_value = "ca.pem")]
    pub ca_bundle: PathBuf,

    /// Client certificate policy: none, request, any or require-and-verify.
    ///
    /// Environment variable: `DRONE_CLIENT_AUTH`
    #[arg(long, env = "DRONE_CLIENT_AUTH", default_value_t = ClientAuthMode::default())]
    pub client_auth: ClientAuthMode,

    /// Regular expression the client certificate Common Name must match.
    ///
    /// Environment variable: `DRONE_CLIENT_CN_REGEXP`
    #[arg(long, env = "DRONE_CLIENT_CN_REGEXP")]
    pub client_cn_regexp: Option<String>,

    /// Base directory for relative certificate and key paths.
    ///
    /// Environment variable: `DRONE_DIR`
    #[arg(short, long, env = "DRONE_DIR")]
    pub dir: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Maps a requested permit count to the one a drone uses: zero means one
/// permit per logical CPU.
pub fn resolve_concurrency(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroneConfig {
    pub address: String,
    /// Generation permits; zero means one per logical CPU.
    pub concurrency: usize,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub ca_bundle: PathBuf,
    pub client_auth: ClientAuthMode,
    pub client_cn_regexp: Option<String>,
}

impl DroneConfig {
    /// A configuration listening on `address` with one permit per CPU,
    /// `require-and-verify` client auth and no CN restriction. The file paths
    /// are left empty.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            concurrency: resolve_concurrency(0),
            certificate: PathBuf::new(),
            private_key: PathBuf::new(),
            ca_bundle: PathBuf::new(),
            client_auth: ClientAuthMode::default(),
            client_cn_regexp: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = resolve_concurrency(concurrency);
        self
    }

    pub fn with_client_auth(mut self, client_auth: ClientAuthMode) -> Self {
        self.client_auth = client_auth;
        self
    }

    pub fn with_client_cn_regexp(mut self, pattern: impl Into<String>) -> Self {
        self.client_cn_regexp = Some(pattern.into());
        self
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

impl TryFrom<CliArgs> for DroneConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.addr.trim().is_empty() {
            bail!("DRONE_ADDR must not be empty");
        }

        let concurrency = resolve_concurrency(usize::try_from(args.concurrency).unwrap_or(0));

        let resolve = |path: PathBuf| match &args.dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        };

        let client_cn_regexp = args.client_cn_regexp.clone().filter(|p| !p.is_empty());
        if client_cn_regexp.is_some() && !args.client_auth.requests_certificate() {
            bail!(
                "DRONE_CLIENT_CN_REGEXP requires client certificates, but DRONE_CLIENT_AUTH is {}",
                args.client_auth
            );
        }

        Ok(Self {
            address: args.addr.clone(),
            concurrency,
            certificate: resolve(args.certificate.clone()),
            private_key: resolve(args.private_key.clone()),
            ca_bundle: resolve(args.ca_bundle.clone()),
            client_auth: args.client_auth,
            client_cn_regexp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(core::iter::once("keymaker-drone").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.addr, DEFAULT_ADDRESS);
        assert_eq!(args.client_auth, ClientAuthMode::RequireAndVerify);

        let config = DroneConfig::try_from(args).unwrap();
        assert_eq!(config.concurrency, num_cpus::get().max(1));
        assert_eq!(config.client_cn_regexp, None);
        assert_eq!(config.certificate, PathBuf::from("drone.pem"));
    }

    #[test]
    fn non_positive_concurrency_means_cpu_count() {
        for value in ["0", "-3"] {
            let config = DroneConfig::try_from(parse(&["--concurrency", value])).unwrap();
            assert_eq!(config.concurrency, num_cpus::get().max(1));
        }
        let config = DroneConfig::try_from(parse(&["--concurrency", "3"])).unwrap();
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn zero_builder_concurrency_means_cpu_count() {
        let config = DroneConfig::new("127.0.0.1:0").with_concurrency(0);
        assert_eq!(config.concurrency, num_cpus::get().max(1));
        assert_eq!(DroneConfig::new("127.0.0.1:0").with_concurrency(5).concurrency, 5);
    }

    #[test]
    fn dir_prefixes_relative_paths_only() {
        let config = DroneConfig::try_from(parse(&[
            "--dir",
            "/etc/keymaker",
            "--certificate",
            "/abs/drone.pem",
        ]))
        .unwrap();
        assert_eq!(config.certificate, PathBuf::from("/abs/drone.pem"));
        assert_eq!(config.private_key, PathBuf::from("/etc/keymaker/drone-key.pem"));
        assert_eq!(config.ca_bundle, PathBuf::from("/etc/keymaker/ca.pem"));
    }

    #[test]
    fn client_auth_parses() {
        let config = DroneConfig::try_from(parse(&["--client-auth", "any"])).unwrap();
        assert_eq!(config.client_auth, ClientAuthMode::Any);
        assert!(CliArgs::try_parse_from(["keymaker-drone", "--client-auth", "sometimes"]).is_err());
    }

    #[test]
    fn cn_regexp_requires_client_certificates() {
        let args = parse(&["--client-auth", "none", "--client-cn-regexp", "^drone-client$"]);
        assert!(DroneConfig::try_from(args).is_err());

        let args = parse(&["--client-auth", "none", "--client-cn-regexp", ""]);
        assert_eq!(DroneConfig::try_from(args).unwrap().client_cn_regexp, None);
    }

    #[test]
    fn reads_fixture_material() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../testdata");
        let config = DroneConfig::try_from(parse(&["--dir", root.to_str().unwrap()])).unwrap();
        let material = config.read_tls_material().unwrap();
        assert!(material.certificate.starts_with(b"-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let config = DroneConfig::new("127.0.0.1:0");
        let err = config.read_tls_material().unwrap_err();
        assert!(format!("{err:#}").contains("certificate"));
    }
}
